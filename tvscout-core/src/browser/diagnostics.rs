use std::path::{Path, PathBuf};

use tracing::warn;

use super::error::BrowserResult;
use super::surface::DiscoverySurface;
use crate::registry::ChannelDescriptor;

/// Makes a channel name safe for use in a file name: lowercase, with
/// every non-alphanumeric run of characters replaced by underscores.
pub fn sanitize_channel_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Writes page screenshots into the diagnostics directory. Capture
/// failures are logged and swallowed; diagnostics never fail a run.
#[derive(Debug, Clone)]
pub struct DiagnosticCapturer {
    dir: PathBuf,
}

impl DiagnosticCapturer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn snapshot_path(&self, channel_name: &str, reason: &str) -> PathBuf {
        self.dir
            .join(format!("{}_{reason}.png", sanitize_channel_name(channel_name)))
    }

    /// Captures a snapshot after a channel attempt came up empty.
    pub async fn capture_failure(
        &self,
        surface: &mut dyn DiscoverySurface,
        channel: &ChannelDescriptor,
        reason: &str,
    ) -> Option<PathBuf> {
        self.capture(surface, channel, reason).await
    }

    /// Captures an audit snapshot after interaction step `step`.
    pub async fn capture_step(
        &self,
        surface: &mut dyn DiscoverySurface,
        channel: &ChannelDescriptor,
        step: usize,
    ) -> Option<PathBuf> {
        self.capture(surface, channel, &format!("after_step_{step}"))
            .await
    }

    async fn capture(
        &self,
        surface: &mut dyn DiscoverySurface,
        channel: &ChannelDescriptor,
        reason: &str,
    ) -> Option<PathBuf> {
        let path = self.snapshot_path(&channel.name, reason);
        match self.write_snapshot(surface, &path).await {
            Ok(()) => Some(path),
            Err(err) => {
                warn!(
                    channel = %channel.name,
                    path = %path.display(),
                    error = %err,
                    "diagnostic snapshot failed"
                );
                None
            }
        }
    }

    async fn write_snapshot(
        &self,
        surface: &mut dyn DiscoverySurface,
        path: &Path,
    ) -> BrowserResult<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        surface.capture_screenshot(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_like_the_playlist_filenames() {
        assert_eq!(sanitize_channel_name("Kanal 5"), "kanal_5");
        assert_eq!(sanitize_channel_name("TV-21 (HD)"), "tv_21__hd_");
        assert_eq!(sanitize_channel_name("Сител"), "_____");
    }

    #[test]
    fn snapshot_path_follows_the_naming_convention() {
        let capturer = DiagnosticCapturer::new("/tmp/diag");
        assert_eq!(
            capturer.snapshot_path("Kanal 5", "no_manifest"),
            PathBuf::from("/tmp/diag/kanal_5_no_manifest.png")
        );
    }
}
