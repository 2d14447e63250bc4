use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::browser::{ConfirmationPolicy, DirectionFilter, WaitPolicy};
use crate::error::{ConfigError, Result};

/// Top-level configuration loaded from `tvscout.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct ScoutConfig {
    pub paths: PathsSection,
    pub chromium: ChromiumSection,
    #[serde(default)]
    pub flags: FlagsSection,
    #[serde(default)]
    pub user_agents: UserAgentSection,
    pub discovery: DiscoverySection,
    pub sources: Vec<SourceSection>,
}

impl ScoutConfig {
    /// Resolves a configured path against `paths.base_dir` unless it is
    /// already absolute.
    pub fn resolve_path(&self, value: &str) -> PathBuf {
        let candidate = PathBuf::from(value);
        if candidate.is_absolute() {
            candidate
        } else {
            PathBuf::from(&self.paths.base_dir).join(candidate)
        }
    }

    pub fn source(&self, region: &str) -> Result<&SourceSection> {
        self.sources
            .iter()
            .find(|source| source.region == region)
            .ok_or_else(|| ConfigError::UnknownRegion(region.to_string()))
    }

    pub fn diagnostics_dir(&self) -> PathBuf {
        self.resolve_path(&self.discovery.diagnostics_dir)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub base_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChromiumSection {
    pub executable_path: Option<String>,
    #[serde(default = "default_true")]
    pub headless: bool,
    #[serde(default)]
    pub sandbox: bool,
    #[serde(default = "default_true")]
    pub disable_gpu: bool,
    pub request_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FlagsSection {
    pub no_first_run: bool,
    pub disable_automation_controlled: bool,
    pub mute_audio: bool,
    pub autoplay_policy: Option<String>,
    pub lang: Option<String>,
    pub accept_language: Option<String>,
    pub disable_blink_features: Vec<String>,
}

impl Default for FlagsSection {
    fn default() -> Self {
        Self {
            no_first_run: true,
            disable_automation_controlled: true,
            mute_audio: true,
            autoplay_policy: Some("no-user-gesture-required".to_string()),
            lang: None,
            accept_language: None,
            disable_blink_features: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserAgentSection {
    #[serde(default)]
    pub pool: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoverySection {
    #[serde(default = "default_diagnostics_dir")]
    pub diagnostics_dir: String,
    #[serde(default = "default_navigation_timeout_ms")]
    pub navigation_timeout_ms: u64,
}

/// One per-region discovery profile. The durations and the confirmation
/// threshold are operational tuning knobs, not constants.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceSection {
    pub region: String,
    pub channels_file: String,
    pub playlist_file: String,
    pub wait_policy: WaitPolicy,
    pub confirmation: ConfirmationPolicy,
    #[serde(default)]
    pub observe: DirectionFilter,
    #[serde(default = "default_manifest_patterns")]
    pub manifest_patterns: Vec<String>,
    pub max_wait_ms: u64,
    #[serde(default = "default_step_timeout_ms")]
    pub step_timeout_ms: u64,
    #[serde(default)]
    pub fixed_steps: Vec<String>,
    #[serde(default)]
    pub capture_step_snapshots: bool,
}

fn default_true() -> bool {
    true
}

fn default_diagnostics_dir() -> String {
    "diagnostics".to_string()
}

fn default_navigation_timeout_ms() -> u64 {
    30_000
}

fn default_manifest_patterns() -> Vec<String> {
    vec![".m3u8".to_string()]
}

fn default_step_timeout_ms() -> u64 {
    8_000
}

fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

pub fn load_scout_config(path: &Path) -> Result<ScoutConfig> {
    load_toml(path)
}
