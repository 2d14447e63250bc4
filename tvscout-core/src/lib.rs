//! Core library for tvscout: a headless-Chromium engine that visits
//! live TV channel pages and confirms their stream manifest URLs by
//! watching network traffic.

pub mod browser;
pub mod config;
pub mod error;
pub mod playlist;
pub mod registry;

pub use config::{load_scout_config, ScoutConfig, SourceSection};
pub use error::{ConfigError, Result};
pub use playlist::{to_m3u, PlaylistWriter};
pub use registry::{ChannelDescriptor, ChannelRegistry};
