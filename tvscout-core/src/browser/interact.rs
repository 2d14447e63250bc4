use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use super::diagnostics::DiagnosticCapturer;
use super::surface::DiscoverySurface;
use crate::registry::ChannelDescriptor;

/// One click target with its readiness budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractionStep {
    pub locator: String,
    pub timeout: Duration,
}

impl InteractionStep {
    pub fn new(locator: impl Into<String>, timeout: Duration) -> Self {
        Self {
            locator: locator.into(),
            timeout,
        }
    }
}

/// Builds the click sequence for one channel: its own selectors first,
/// then the profile-wide fixed steps.
pub fn build_steps(
    channel: &ChannelDescriptor,
    fixed_steps: &[String],
    step_timeout: Duration,
) -> Vec<InteractionStep> {
    let mut steps = Vec::new();
    if let Some(selector) = &channel.click_selector {
        steps.push(InteractionStep::new(selector, step_timeout));
    }
    if let Some(selector) = &channel.second_click_selector {
        steps.push(InteractionStep::new(selector, step_timeout));
    }
    for selector in fixed_steps {
        steps.push(InteractionStep::new(selector, step_timeout));
    }
    steps
}

#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub locator: String,
    pub clicked: bool,
}

/// Runs a click sequence best-effort: a step that never becomes ready
/// is logged and skipped, the rest of the sequence still runs. Player
/// markup varies per channel, so a missing overlay button is routine.
#[derive(Debug, Clone)]
pub struct InteractionSequencer {
    capture_snapshots: bool,
}

impl InteractionSequencer {
    pub fn new(capture_snapshots: bool) -> Self {
        Self { capture_snapshots }
    }

    pub async fn run(
        &self,
        surface: &mut dyn DiscoverySurface,
        capturer: &DiagnosticCapturer,
        channel: &ChannelDescriptor,
        steps: &[InteractionStep],
    ) -> Vec<StepOutcome> {
        let mut outcomes = Vec::with_capacity(steps.len());
        for (index, step) in steps.iter().enumerate() {
            match surface.click_when_ready(&step.locator, step.timeout).await {
                Ok(()) => {
                    debug!(channel = %channel.name, locator = %step.locator, "step clicked");
                    if self.capture_snapshots {
                        capturer.capture_step(surface, channel, index + 1).await;
                    }
                    outcomes.push(StepOutcome {
                        locator: step.locator.clone(),
                        clicked: true,
                    });
                }
                Err(err) => {
                    warn!(
                        channel = %channel.name,
                        locator = %step.locator,
                        error = %err,
                        "interaction step skipped"
                    );
                    outcomes.push(StepOutcome {
                        locator: step.locator.clone(),
                        clicked: false,
                    });
                }
            }
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(click: Option<&str>, second: Option<&str>) -> ChannelDescriptor {
        ChannelDescriptor {
            id: "c1".to_string(),
            name: "Canal 1".to_string(),
            url: "https://example.ro/c1".to_string(),
            click_selector: click.map(String::from),
            second_click_selector: second.map(String::from),
        }
    }

    #[test]
    fn builds_channel_steps_before_fixed_steps() {
        let fixed = vec!["#my-video > button > span.vjs-icon-placeholder".to_string()];
        let steps = build_steps(
            &channel(Some("#consent"), Some("#play")),
            &fixed,
            Duration::from_millis(8_000),
        );
        let locators: Vec<&str> = steps.iter().map(|s| s.locator.as_str()).collect();
        assert_eq!(
            locators,
            [
                "#consent",
                "#play",
                "#my-video > button > span.vjs-icon-placeholder"
            ]
        );
    }

    #[test]
    fn channel_without_selectors_yields_only_fixed_steps() {
        let steps = build_steps(&channel(None, None), &[], Duration::from_millis(8_000));
        assert!(steps.is_empty());
    }
}
