use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Resource classification taken from the CDP event. Only XHR and
/// fetch traffic can carry a manifest candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Xhr,
    Fetch,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Request,
    Response,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Request => write!(f, "request"),
            Direction::Response => write!(f, "response"),
        }
    }
}

/// Which side of the wire a profile inspects for candidates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectionFilter {
    #[default]
    Request,
    Response,
    Both,
}

impl DirectionFilter {
    pub fn accepts(&self, direction: Direction) -> bool {
        match self {
            DirectionFilter::Request => direction == Direction::Request,
            DirectionFilter::Response => direction == Direction::Response,
            DirectionFilter::Both => true,
        }
    }
}

/// One observed network event, normalized from either the request or
/// the response side.
#[derive(Debug, Clone)]
pub struct TrafficEvent {
    pub url: String,
    pub resource_kind: ResourceKind,
    pub direction: Direction,
    pub timestamp: DateTime<Utc>,
}

impl TrafficEvent {
    pub fn new(url: impl Into<String>, resource_kind: ResourceKind, direction: Direction) -> Self {
        Self {
            url: url.into(),
            resource_kind,
            direction,
            timestamp: Utc::now(),
        }
    }
}

/// Classifies traffic events as manifest candidates. Matching is
/// substring based; stream manifests advertise themselves in the URL.
#[derive(Debug, Clone)]
pub struct ManifestMatcher {
    patterns: Vec<String>,
    direction: DirectionFilter,
}

impl ManifestMatcher {
    pub fn new(patterns: Vec<String>, direction: DirectionFilter) -> Self {
        Self {
            patterns,
            direction,
        }
    }

    pub fn matches(&self, event: &TrafficEvent) -> bool {
        if !self.direction.accepts(event.direction) {
            return false;
        }
        if !matches!(event.resource_kind, ResourceKind::Xhr | ResourceKind::Fetch) {
            return false;
        }
        self.patterns.iter().any(|pattern| event.url.contains(pattern))
    }
}

impl Default for ManifestMatcher {
    fn default() -> Self {
        Self::new(vec![".m3u8".to_string()], DirectionFilter::default())
    }
}

/// How many sightings of a candidate URL it takes before we trust it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ConfirmationPolicy {
    /// The first candidate wins.
    FirstMatch,
    /// A candidate wins once it has been seen `threshold` times. Ties
    /// go to whichever URL reaches the threshold first.
    FrequencyThreshold { threshold: u32 },
}

/// Pure confirmation state for one channel attempt.
#[derive(Debug)]
pub struct ConfirmationTracker {
    policy: ConfirmationPolicy,
    counts: HashMap<String, u32>,
    confirmed: Option<String>,
}

impl ConfirmationTracker {
    pub fn new(policy: ConfirmationPolicy) -> Self {
        Self {
            policy,
            counts: HashMap::new(),
            confirmed: None,
        }
    }

    /// Feeds one candidate sighting. Returns the confirmed URL on the
    /// sighting that crosses the policy's bar, and never again after.
    pub fn observe(&mut self, url: &str) -> Option<String> {
        if self.confirmed.is_some() {
            return None;
        }
        match &self.policy {
            ConfirmationPolicy::FirstMatch => {
                self.confirmed = Some(url.to_string());
            }
            ConfirmationPolicy::FrequencyThreshold { threshold } => {
                let seen = self.counts.entry(url.to_string()).or_insert(0);
                *seen += 1;
                if *seen >= (*threshold).max(1) {
                    self.confirmed = Some(url.to_string());
                }
            }
        }
        self.confirmed.clone()
    }

    pub fn confirmed(&self) -> Option<&str> {
        self.confirmed.as_deref()
    }

    pub fn distinct_candidates(&self) -> usize {
        match self.policy {
            ConfirmationPolicy::FirstMatch => usize::from(self.confirmed.is_some()),
            ConfirmationPolicy::FrequencyThreshold { .. } => self.counts.len(),
        }
    }
}

/// Scoped network observer for a single channel attempt.
///
/// Event streams are pumped into the tracker by background tasks;
/// confirmation is published through a `watch` channel so waiters wake
/// the moment the bar is crossed. Dropping the observer (or calling
/// [`TrafficObserver::unregister`]) aborts the pumps, so no listener
/// state can survive into the next channel.
#[derive(Debug)]
pub struct TrafficObserver {
    matcher: ManifestMatcher,
    tracker: Arc<Mutex<ConfirmationTracker>>,
    confirmed_tx: watch::Sender<Option<String>>,
    confirmed_rx: watch::Receiver<Option<String>>,
    pumps: Vec<JoinHandle<()>>,
}

impl TrafficObserver {
    pub fn new(matcher: ManifestMatcher, policy: ConfirmationPolicy) -> Self {
        let (confirmed_tx, confirmed_rx) = watch::channel(None);
        Self {
            matcher,
            tracker: Arc::new(Mutex::new(ConfirmationTracker::new(policy))),
            confirmed_tx,
            confirmed_rx,
            pumps: Vec::new(),
        }
    }

    /// Attaches an event stream. May be called once per side of the
    /// wire; each stream gets its own pump task.
    pub fn ingest<S>(&mut self, events: S)
    where
        S: Stream<Item = TrafficEvent> + Send + 'static,
    {
        let matcher = self.matcher.clone();
        let tracker = Arc::clone(&self.tracker);
        let confirmed_tx = self.confirmed_tx.clone();
        let pump = tokio::spawn(async move {
            futures::pin_mut!(events);
            while let Some(event) = events.next().await {
                if !matcher.matches(&event) {
                    continue;
                }
                trace!(url = %event.url, direction = %event.direction, "manifest candidate");
                let confirmed = match tracker.lock() {
                    Ok(mut tracker) => tracker.observe(&event.url),
                    Err(_) => break,
                };
                if let Some(url) = confirmed {
                    debug!(url = %url, "manifest confirmed");
                    let _ = confirmed_tx.send(Some(url));
                }
            }
        });
        self.pumps.push(pump);
    }

    /// Waits until a manifest is confirmed or the budget runs out.
    pub async fn wait_confirmed(&self, max_wait: Duration) -> Option<String> {
        let mut rx = self.confirmed_rx.clone();
        let confirmed = async move {
            loop {
                if let Some(url) = rx.borrow_and_update().clone() {
                    return Some(url);
                }
                if rx.changed().await.is_err() {
                    return None;
                }
            }
        };
        match tokio::time::timeout(max_wait, confirmed).await {
            Ok(url) => url,
            Err(_) => {
                debug!(budget_ms = max_wait.as_millis() as u64, "observation budget exhausted");
                None
            }
        }
    }

    pub fn confirmed(&self) -> Option<String> {
        self.confirmed_rx.borrow().clone()
    }

    pub fn distinct_candidates(&self) -> usize {
        self.tracker
            .lock()
            .map(|tracker| tracker.distinct_candidates())
            .unwrap_or(0)
    }

    /// Detaches from the underlying streams. Idempotent; also runs on
    /// drop.
    pub fn unregister(&mut self) {
        for pump in self.pumps.drain(..) {
            pump.abort();
        }
    }
}

impl Drop for TrafficObserver {
    fn drop(&mut self) {
        self.unregister();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    fn xhr(url: &str) -> TrafficEvent {
        TrafficEvent::new(url, ResourceKind::Xhr, Direction::Request)
    }

    #[test]
    fn first_match_confirms_immediately_and_once() {
        let mut tracker = ConfirmationTracker::new(ConfirmationPolicy::FirstMatch);
        assert_eq!(
            tracker.observe("https://a/x.m3u8").as_deref(),
            Some("https://a/x.m3u8")
        );
        assert_eq!(tracker.observe("https://b/y.m3u8"), None);
        assert_eq!(tracker.confirmed(), Some("https://a/x.m3u8"));
    }

    #[test]
    fn frequency_threshold_needs_k_sightings_of_one_url() {
        let mut tracker =
            ConfirmationTracker::new(ConfirmationPolicy::FrequencyThreshold { threshold: 3 });
        assert_eq!(tracker.observe("https://a/x.m3u8"), None);
        assert_eq!(tracker.observe("https://a/x.m3u8"), None);
        assert_eq!(
            tracker.observe("https://a/x.m3u8").as_deref(),
            Some("https://a/x.m3u8")
        );
        assert_eq!(tracker.observe("https://a/x.m3u8"), None);
    }

    #[test]
    fn two_sightings_never_confirm_under_threshold_three() {
        let mut tracker =
            ConfirmationTracker::new(ConfirmationPolicy::FrequencyThreshold { threshold: 3 });
        tracker.observe("https://a/x.m3u8");
        tracker.observe("https://a/x.m3u8");
        assert_eq!(tracker.confirmed(), None);
    }

    #[test]
    fn tie_break_goes_to_first_url_reaching_threshold() {
        let mut tracker =
            ConfirmationTracker::new(ConfirmationPolicy::FrequencyThreshold { threshold: 3 });
        // A, B, A, B, B -> B crosses first even though A was seen first.
        tracker.observe("https://a/x.m3u8");
        tracker.observe("https://b/y.m3u8");
        tracker.observe("https://a/x.m3u8");
        tracker.observe("https://b/y.m3u8");
        assert_eq!(
            tracker.observe("https://b/y.m3u8").as_deref(),
            Some("https://b/y.m3u8")
        );
        // A crossing afterwards changes nothing.
        assert_eq!(tracker.observe("https://a/x.m3u8"), None);
        assert_eq!(tracker.confirmed(), Some("https://b/y.m3u8"));
    }

    #[test]
    fn matcher_ignores_non_xhr_fetch_traffic() {
        let matcher = ManifestMatcher::default();
        assert!(matcher.matches(&xhr("https://cdn/live/index.m3u8?x=1")));
        assert!(!matcher.matches(&TrafficEvent::new(
            "https://cdn/live/index.m3u8",
            ResourceKind::Other,
            Direction::Request,
        )));
        assert!(!matcher.matches(&xhr("https://cdn/live/app.js")));
    }

    #[test]
    fn matcher_respects_direction_filter() {
        let matcher = ManifestMatcher::new(vec![".m3u8".to_string()], DirectionFilter::Response);
        assert!(!matcher.matches(&xhr("https://cdn/x.m3u8")));
        assert!(matcher.matches(&TrafficEvent::new(
            "https://cdn/x.m3u8",
            ResourceKind::Fetch,
            Direction::Response,
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn observer_confirms_from_stream() {
        let mut observer =
            TrafficObserver::new(ManifestMatcher::default(), ConfirmationPolicy::FirstMatch);
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        observer.ingest(UnboundedReceiverStream::new(rx));

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            let _ = tx.send(xhr("https://cdn/live/index.m3u8"));
        });

        let started = tokio::time::Instant::now();
        let confirmed = observer.wait_confirmed(Duration::from_millis(8_000)).await;
        assert_eq!(confirmed.as_deref(), Some("https://cdn/live/index.m3u8"));
        assert_eq!(started.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn observer_times_out_at_exactly_max_wait() {
        let mut observer = TrafficObserver::new(
            ManifestMatcher::default(),
            ConfirmationPolicy::FrequencyThreshold { threshold: 3 },
        );
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        observer.ingest(UnboundedReceiverStream::new(rx));
        // Two sightings stay below the bar.
        tx.send(xhr("https://cdn/x.m3u8")).unwrap();
        tx.send(xhr("https://cdn/x.m3u8")).unwrap();

        let started = tokio::time::Instant::now();
        let confirmed = observer.wait_confirmed(Duration::from_millis(15_000)).await;
        assert_eq!(confirmed, None);
        assert_eq!(started.elapsed(), Duration::from_millis(15_000));
        assert_eq!(observer.distinct_candidates(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_observer_carries_no_state_from_previous_channels() {
        let policy = ConfirmationPolicy::FrequencyThreshold { threshold: 3 };
        let mut first =
            TrafficObserver::new(ManifestMatcher::default(), policy.clone());
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        first.ingest(UnboundedReceiverStream::new(rx));
        for _ in 0..3 {
            tx.send(xhr("https://cdn/shared.m3u8")).unwrap();
        }
        assert!(first
            .wait_confirmed(Duration::from_millis(1_000))
            .await
            .is_some());
        first.unregister();

        // Same URL again, but only twice: a fresh observer must not
        // remember the earlier sightings.
        let mut second = TrafficObserver::new(ManifestMatcher::default(), policy);
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        second.ingest(UnboundedReceiverStream::new(rx));
        tx.send(xhr("https://cdn/shared.m3u8")).unwrap();
        tx.send(xhr("https://cdn/shared.m3u8")).unwrap();
        assert!(second
            .wait_confirmed(Duration::from_millis(1_000))
            .await
            .is_none());
    }
}
