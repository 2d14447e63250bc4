use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        source: toml::de::Error,
        path: PathBuf,
    },
    #[error("failed to parse channel registry {path}: {source}")]
    Registry {
        source: serde_json::Error,
        path: PathBuf,
    },
    #[error("channel registry {path} contains no channels")]
    EmptyRegistry { path: PathBuf },
    #[error("no source configured for region {0}")]
    UnknownRegion(String),
    #[error("invalid channel {id}: {reason}")]
    InvalidChannel { id: String, reason: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;
