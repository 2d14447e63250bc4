use std::io;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::browser::{DiscoveryResult, DiscoveryStatus};

/// Renders confirmed channels as an extended M3U playlist. Channels
/// without a confirmed manifest are omitted.
pub fn to_m3u(results: &[DiscoveryResult]) -> String {
    let mut playlist = String::from("#EXTM3U\n");
    for result in results {
        if result.status != DiscoveryStatus::Found {
            continue;
        }
        let Some(url) = &result.play_url else {
            continue;
        };
        playlist.push_str(&format!(
            "#EXTINF:-1 tvg-id=\"{}\" tvg-name=\"{}\",{}\n{}\n",
            result.channel.id, result.channel.name, result.channel.name, url
        ));
    }
    playlist
}

#[derive(Debug, Clone)]
pub struct PlaylistWriter {
    path: PathBuf,
}

impl PlaylistWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the playlist and returns the number of entries it holds.
    pub async fn write(&self, results: &[DiscoveryResult]) -> io::Result<usize> {
        let entries = results
            .iter()
            .filter(|result| result.status == DiscoveryStatus::Found)
            .count();
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(&self.path, to_m3u(results)).await?;
        info!(path = %self.path.display(), entries, "playlist written");
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ChannelDescriptor;

    fn channel(id: &str, name: &str) -> ChannelDescriptor {
        ChannelDescriptor {
            id: id.to_string(),
            name: name.to_string(),
            url: format!("https://example.com/{id}"),
            click_selector: None,
            second_click_selector: None,
        }
    }

    fn found(id: &str, name: &str, play_url: &str) -> DiscoveryResult {
        DiscoveryResult {
            channel: channel(id, name),
            play_url: Some(play_url.to_string()),
            status: DiscoveryStatus::Found,
            diagnostic: None,
            error: None,
            elapsed_ms: 0,
        }
    }

    fn missed(id: &str, name: &str) -> DiscoveryResult {
        DiscoveryResult {
            channel: channel(id, name),
            play_url: None,
            status: DiscoveryStatus::NotFound,
            diagnostic: None,
            error: None,
            elapsed_ms: 0,
        }
    }

    #[test]
    fn renders_only_confirmed_channels() {
        let results = vec![
            found("k1", "Kanal 1", "https://cdn.example.mk/k1/index.m3u8"),
            missed("k2", "Kanal 2"),
        ];
        let playlist = to_m3u(&results);
        assert!(playlist.starts_with("#EXTM3U\n"));
        assert!(playlist.contains(
            "#EXTINF:-1 tvg-id=\"k1\" tvg-name=\"Kanal 1\",Kanal 1\nhttps://cdn.example.mk/k1/index.m3u8\n"
        ));
        assert!(!playlist.contains("Kanal 2"));
    }

    #[tokio::test]
    async fn writes_playlist_and_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("playlists/mk.m3u");
        let writer = PlaylistWriter::new(&path);
        let entries = writer
            .write(&[found("k1", "Kanal 1", "https://cdn.example.mk/k1.m3u8")])
            .await
            .unwrap();
        assert_eq!(entries, 1);
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("https://cdn.example.mk/k1.m3u8"));
    }
}
