use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::page::EventLifecycleEvent;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

/// How long to stay on a page before interaction starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitPolicy {
    /// Proceed once the DOM has been parsed.
    DomContentLoaded,
    /// Wait until network activity settles. Stream-heavy pages may
    /// never go idle, so expiry of this wait is not fatal.
    NetworkIdle,
}

impl WaitPolicy {
    /// CDP lifecycle event name this policy waits for.
    pub fn lifecycle_event(&self) -> &'static str {
        match self {
            WaitPolicy::DomContentLoaded => "DOMContentLoaded",
            WaitPolicy::NetworkIdle => "networkIdle",
        }
    }
}

impl fmt::Display for WaitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitPolicy::DomContentLoaded => write!(f, "dom_content_loaded"),
            WaitPolicy::NetworkIdle => write!(f, "network_idle"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LifecycleWait {
    Reached,
    StreamClosed,
    Expired,
}

/// Drains the lifecycle event stream until the target event arrives,
/// the stream closes, or the budget runs out.
pub(crate) async fn wait_for_lifecycle<S>(events: S, target: &str, budget: Duration) -> LifecycleWait
where
    S: Stream<Item = Arc<EventLifecycleEvent>>,
{
    let reached = async move {
        futures::pin_mut!(events);
        while let Some(event) = events.next().await {
            if event.name == target {
                return true;
            }
        }
        false
    };
    match tokio::time::timeout(budget, reached).await {
        Ok(true) => LifecycleWait::Reached,
        Ok(false) => LifecycleWait::StreamClosed,
        Err(_) => LifecycleWait::Expired,
    }
}

/// Strips anti-automation tooling the target pages ship. Some feeds
/// bundle a devtools detector that blanks the player when it fires.
/// Returns the number of removed script nodes.
pub(crate) const SANITIZE_SCRIPT: &str = r#"
(() => {
    let removed = 0;
    for (const script of Array.from(document.querySelectorAll('script'))) {
        const src = (script.src || '').toLowerCase();
        if (src.includes('devtools') || src.includes('disable-devtool')) {
            script.remove();
            removed += 1;
        }
    }
    if (typeof window.DisableDevtool === 'function') {
        try { window.DisableDevtool.isSuspend = true; } catch (_) {}
    }
    return removed;
})()
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    fn lifecycle(name: &str) -> Arc<EventLifecycleEvent> {
        let event = serde_json::from_value(serde_json::json!({
            "frameId": "frame",
            "loaderId": "loader",
            "name": name,
            "timestamp": 0.0,
        }))
        .unwrap();
        Arc::new(event)
    }

    #[tokio::test(start_paused = true)]
    async fn reaches_target_event() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        tx.send(lifecycle("init")).unwrap();
        tx.send(lifecycle("DOMContentLoaded")).unwrap();
        let outcome = wait_for_lifecycle(
            UnboundedReceiverStream::new(rx),
            "DOMContentLoaded",
            Duration::from_millis(5_000),
        )
        .await;
        assert_eq!(outcome, LifecycleWait::Reached);
    }

    #[tokio::test(start_paused = true)]
    async fn expires_when_event_never_arrives() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Arc<EventLifecycleEvent>>();
        let started = tokio::time::Instant::now();
        let outcome = wait_for_lifecycle(
            UnboundedReceiverStream::new(rx),
            "networkIdle",
            Duration::from_millis(2_000),
        )
        .await;
        drop(tx);
        assert_eq!(outcome, LifecycleWait::Expired);
        assert_eq!(started.elapsed(), Duration::from_millis(2_000));
    }
}
