use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::diagnostics::DiagnosticCapturer;
use super::error::BrowserResult;
use super::interact::{build_steps, InteractionSequencer};
use super::navigate::WaitPolicy;
use super::observer::{ConfirmationPolicy, DirectionFilter, ManifestMatcher, TrafficObserver};
use super::surface::{DiscoverySurface, ObservationSpec};
use crate::config::SourceSection;
use crate::registry::ChannelDescriptor;

/// Lifecycle of one channel attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelPhase {
    Idle,
    Navigating,
    Interacting,
    Observing,
    Found,
    NotFound,
    Failed,
}

impl fmt::Display for ChannelPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelPhase::Idle => "idle",
            ChannelPhase::Navigating => "navigating",
            ChannelPhase::Interacting => "interacting",
            ChannelPhase::Observing => "observing",
            ChannelPhase::Found => "found",
            ChannelPhase::NotFound => "not_found",
            ChannelPhase::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryStatus {
    Found,
    NotFound,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryResult {
    pub channel: ChannelDescriptor,
    pub play_url: Option<String>,
    pub status: DiscoveryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

/// Everything that differs between source profiles, collapsed into one
/// descriptor so a single engine serves every region.
#[derive(Debug, Clone)]
pub struct DiscoveryPolicy {
    pub wait_policy: WaitPolicy,
    pub confirmation: ConfirmationPolicy,
    pub manifest_patterns: Vec<String>,
    pub observe: DirectionFilter,
    pub max_wait: Duration,
    pub step_timeout: Duration,
    pub fixed_steps: Vec<String>,
    pub capture_step_snapshots: bool,
}

impl DiscoveryPolicy {
    pub fn from_source(source: &SourceSection) -> Self {
        Self {
            wait_policy: source.wait_policy,
            confirmation: source.confirmation.clone(),
            manifest_patterns: source.manifest_patterns.clone(),
            observe: source.observe,
            max_wait: Duration::from_millis(source.max_wait_ms),
            step_timeout: Duration::from_millis(source.step_timeout_ms),
            fixed_steps: source.fixed_steps.clone(),
            capture_step_snapshots: source.capture_step_snapshots,
        }
    }

    pub fn matcher(&self) -> ManifestMatcher {
        ManifestMatcher::new(self.manifest_patterns.clone(), self.observe)
    }
}

enum ChannelOutcome {
    Confirmed(String),
    Exhausted { diagnostic: Option<PathBuf> },
}

/// Drives channels through the attempt lifecycle, one at a time, on a
/// shared surface. A channel failure is folded into its result; the
/// batch always continues.
#[derive(Debug, Clone)]
pub struct DiscoveryEngine {
    capturer: DiagnosticCapturer,
}

impl DiscoveryEngine {
    pub fn new(capturer: DiagnosticCapturer) -> Self {
        Self { capturer }
    }

    pub async fn run(
        &self,
        surface: &mut dyn DiscoverySurface,
        policy: &DiscoveryPolicy,
        channels: &[ChannelDescriptor],
        cancel: &CancellationToken,
    ) -> (Vec<DiscoveryResult>, bool) {
        let mut results = Vec::with_capacity(channels.len());
        let mut cancelled = false;
        for channel in channels {
            if cancel.is_cancelled() {
                info!(
                    processed = results.len(),
                    remaining = channels.len() - results.len(),
                    "discovery cancelled between channels"
                );
                cancelled = true;
                break;
            }
            results.push(self.process_channel(surface, policy, channel).await);
        }
        (results, cancelled)
    }

    async fn process_channel(
        &self,
        surface: &mut dyn DiscoverySurface,
        policy: &DiscoveryPolicy,
        channel: &ChannelDescriptor,
    ) -> DiscoveryResult {
        let started = tokio::time::Instant::now();
        let mut phase = ChannelPhase::Idle;
        debug!(channel = %channel.name, url = %channel.url, phase = %phase, "channel dequeued");

        let outcome = self.attempt(surface, policy, channel, &mut phase).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(ChannelOutcome::Confirmed(url)) => {
                info!(channel = %channel.name, url = %url, elapsed_ms, "manifest found");
                DiscoveryResult {
                    channel: channel.clone(),
                    play_url: Some(url),
                    status: DiscoveryStatus::Found,
                    diagnostic: None,
                    error: None,
                    elapsed_ms,
                }
            }
            Ok(ChannelOutcome::Exhausted { diagnostic }) => {
                warn!(channel = %channel.name, elapsed_ms, "no manifest confirmed");
                DiscoveryResult {
                    channel: channel.clone(),
                    play_url: None,
                    status: DiscoveryStatus::NotFound,
                    diagnostic,
                    error: None,
                    elapsed_ms,
                }
            }
            Err(err) => {
                warn!(
                    channel = %channel.name,
                    phase = %phase,
                    error = %err,
                    elapsed_ms,
                    "channel attempt failed, continuing batch"
                );
                DiscoveryResult {
                    channel: channel.clone(),
                    play_url: None,
                    status: DiscoveryStatus::Error,
                    diagnostic: None,
                    error: Some(err.to_string()),
                    elapsed_ms,
                }
            }
        }
    }

    async fn attempt(
        &self,
        surface: &mut dyn DiscoverySurface,
        policy: &DiscoveryPolicy,
        channel: &ChannelDescriptor,
        phase: &mut ChannelPhase,
    ) -> BrowserResult<ChannelOutcome> {
        // The observer scope must open before navigation so the
        // earliest requests are already covered.
        let spec = ObservationSpec {
            matcher: policy.matcher(),
            policy: policy.confirmation.clone(),
        };
        let mut observer = surface.observe(&spec).await?;
        let outcome = self
            .drive(surface, policy, channel, phase, &observer)
            .await;
        if let Err(err) = &outcome {
            debug!(channel = %channel.name, phase = %phase, error = %err, "attempt aborted");
            *phase = ChannelPhase::Failed;
        }
        observer.unregister();
        outcome
    }

    async fn drive(
        &self,
        surface: &mut dyn DiscoverySurface,
        policy: &DiscoveryPolicy,
        channel: &ChannelDescriptor,
        phase: &mut ChannelPhase,
        observer: &TrafficObserver,
    ) -> BrowserResult<ChannelOutcome> {
        *phase = ChannelPhase::Navigating;
        surface.navigate(&channel.url, policy.wait_policy).await?;

        match surface.sanitize().await {
            Ok(removed) if removed > 0 => {
                debug!(channel = %channel.name, removed, "page sanitized")
            }
            Ok(_) => {}
            Err(err) => warn!(channel = %channel.name, error = %err, "page sanitize failed"),
        }

        *phase = ChannelPhase::Interacting;
        let steps = build_steps(channel, &policy.fixed_steps, policy.step_timeout);
        let sequencer = InteractionSequencer::new(policy.capture_step_snapshots);
        let outcomes = sequencer
            .run(surface, &self.capturer, channel, &steps)
            .await;
        debug!(
            channel = %channel.name,
            steps = outcomes.len(),
            clicked = outcomes.iter().filter(|o| o.clicked).count(),
            "interaction sequence finished"
        );

        *phase = ChannelPhase::Observing;
        match observer.wait_confirmed(policy.max_wait).await {
            Some(url) => {
                *phase = ChannelPhase::Found;
                Ok(ChannelOutcome::Confirmed(url))
            }
            None => {
                *phase = ChannelPhase::NotFound;
                debug!(
                    channel = %channel.name,
                    candidates = observer.distinct_candidates(),
                    "observation budget exhausted"
                );
                let diagnostic = self
                    .capturer
                    .capture_failure(surface, channel, "no_manifest")
                    .await;
                Ok(ChannelOutcome::Exhausted { diagnostic })
            }
        }
    }
}
