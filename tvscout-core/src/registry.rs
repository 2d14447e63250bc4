use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ConfigError, Result};

/// One channel entry from a registry file. The registry files are JSON
/// arrays with camelCase keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelDescriptor {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub click_selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub second_click_selector: Option<String>,
}

/// Ordered, immutable set of channels for one region.
#[derive(Debug, Clone)]
pub struct ChannelRegistry {
    channels: Vec<ChannelDescriptor>,
}

impl ChannelRegistry {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            source,
            path: path.to_path_buf(),
        })?;
        let channels: Vec<ChannelDescriptor> =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Registry {
                source,
                path: path.to_path_buf(),
            })?;
        if channels.is_empty() {
            return Err(ConfigError::EmptyRegistry {
                path: path.to_path_buf(),
            });
        }
        for channel in &channels {
            Url::parse(&channel.url).map_err(|err| ConfigError::InvalidChannel {
                id: channel.id.clone(),
                reason: format!("bad url {}: {err}", channel.url),
            })?;
        }
        Ok(Self { channels })
    }

    pub fn channels(&self) -> &[ChannelDescriptor] {
        &self.channels
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    fn write_registry(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn parses_camel_case_descriptors() {
        let file = write_registry(
            r##"[
                {"id": "k1", "name": "Kanal 1", "url": "https://example.mk/k1",
                 "clickSelector": "#play"},
                {"id": "k2", "name": "Kanal 2", "url": "https://example.mk/k2"}
            ]"##,
        );
        let registry = ChannelRegistry::load(file.path()).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.channels()[0].click_selector.as_deref(),
            Some("#play")
        );
        assert!(registry.channels()[1].click_selector.is_none());
    }

    #[test]
    fn empty_registry_is_an_error() {
        let file = write_registry("[]");
        assert!(matches!(
            ChannelRegistry::load(file.path()),
            Err(ConfigError::EmptyRegistry { .. })
        ));
    }

    #[test]
    fn invalid_url_is_an_error() {
        let file = write_registry(r#"[{"id": "x", "name": "X", "url": "not a url"}]"#);
        assert!(matches!(
            ChannelRegistry::load(file.path()),
            Err(ConfigError::InvalidChannel { .. })
        ));
    }

    #[test]
    fn bundled_registries_parse() {
        let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../sources");
        for name in ["mkchannels.json", "atchannels.json", "rochannels.json"] {
            let registry = ChannelRegistry::load(&dir.join(name)).unwrap();
            assert!(!registry.is_empty(), "{name} should not be empty");
        }
    }
}
