use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::{
    EventRequestWillBeSent, EventResponseReceived, ResourceType,
};
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, NavigateParams, SetLifecycleEventsEnabledParams,
};
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use tracing::{debug, warn};

use super::error::{BrowserError, BrowserResult};
use super::navigate::{wait_for_lifecycle, LifecycleWait, WaitPolicy, SANITIZE_SCRIPT};
use super::observer::{
    ConfirmationPolicy, Direction, ManifestMatcher, ResourceKind, TrafficEvent, TrafficObserver,
};

const CLICK_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// What a channel attempt wants to observe on the wire.
#[derive(Debug, Clone)]
pub struct ObservationSpec {
    pub matcher: ManifestMatcher,
    pub policy: ConfirmationPolicy,
}

/// A page-shaped automation target. The engine drives this trait; the
/// production implementation sits on a CDP page, tests substitute a
/// scripted one.
#[async_trait(?Send)]
pub trait DiscoverySurface {
    /// Subscribes to network traffic for one channel attempt. Must be
    /// called before `navigate` so early requests are not missed.
    async fn observe(&mut self, spec: &ObservationSpec) -> BrowserResult<TrafficObserver>;

    async fn navigate(&mut self, url: &str, wait: WaitPolicy) -> BrowserResult<()>;

    /// Strips anti-automation tooling from the loaded page. Returns
    /// the number of removed nodes.
    async fn sanitize(&mut self) -> BrowserResult<u64>;

    /// Waits for the locator to appear, then clicks it.
    async fn click_when_ready(&mut self, locator: &str, timeout: Duration) -> BrowserResult<()>;

    async fn capture_screenshot(&mut self, path: &Path) -> BrowserResult<()>;
}

/// CDP-backed surface over a chromiumoxide page.
pub struct CdpSurface {
    page: Page,
    navigation_timeout: Duration,
}

impl CdpSurface {
    pub async fn attach(page: Page, navigation_timeout: Duration) -> BrowserResult<Self> {
        page.execute(SetLifecycleEventsEnabledParams::new(true))
            .await?;
        Ok(Self {
            page,
            navigation_timeout,
        })
    }

    pub fn page(&self) -> &Page {
        &self.page
    }
}

fn resource_kind(resource_type: Option<&ResourceType>) -> ResourceKind {
    match resource_type {
        Some(ResourceType::Xhr) => ResourceKind::Xhr,
        Some(ResourceType::Fetch) => ResourceKind::Fetch,
        _ => ResourceKind::Other,
    }
}

#[async_trait(?Send)]
impl DiscoverySurface for CdpSurface {
    async fn observe(&mut self, spec: &ObservationSpec) -> BrowserResult<TrafficObserver> {
        let requests = self
            .page
            .event_listener::<EventRequestWillBeSent>()
            .await?;
        let responses = self
            .page
            .event_listener::<EventResponseReceived>()
            .await?;

        let mut observer = TrafficObserver::new(spec.matcher.clone(), spec.policy.clone());
        observer.ingest(requests.map(|event| {
            TrafficEvent::new(
                event.request.url.clone(),
                resource_kind(event.r#type.as_ref()),
                Direction::Request,
            )
        }));
        observer.ingest(responses.map(|event| {
            TrafficEvent::new(
                event.response.url.clone(),
                resource_kind(Some(&event.r#type)),
                Direction::Response,
            )
        }));
        Ok(observer)
    }

    async fn navigate(&mut self, url: &str, wait: WaitPolicy) -> BrowserResult<()> {
        let lifecycle = self.page.event_listener::<chromiumoxide::cdp::browser_protocol::page::EventLifecycleEvent>().await?;
        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(BrowserError::Configuration)?;
        self.page
            .goto(params)
            .await
            .map_err(|err| BrowserError::Navigation {
                url: url.to_string(),
                reason: err.to_string(),
            })?;

        let target = wait.lifecycle_event();
        match wait_for_lifecycle(lifecycle, target, self.navigation_timeout).await {
            LifecycleWait::Reached => {
                debug!(url, %wait, "navigation settled");
                Ok(())
            }
            LifecycleWait::StreamClosed => Err(BrowserError::Navigation {
                url: url.to_string(),
                reason: "lifecycle event stream closed".to_string(),
            }),
            LifecycleWait::Expired => match wait {
                // Live pages keep the network busy; treat idle expiry
                // as settled.
                WaitPolicy::NetworkIdle => {
                    warn!(url, "network never went idle, continuing");
                    Ok(())
                }
                WaitPolicy::DomContentLoaded => {
                    Err(BrowserError::Timeout(format!("page load of {url}")))
                }
            },
        }
    }

    async fn sanitize(&mut self) -> BrowserResult<u64> {
        let removed: u64 = self
            .page
            .evaluate(SANITIZE_SCRIPT)
            .await?
            .into_value()
            .map_err(|err| {
                BrowserError::Unexpected(format!("sanitize result not a number: {err}"))
            })?;
        Ok(removed)
    }

    async fn click_when_ready(&mut self, locator: &str, timeout: Duration) -> BrowserResult<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Ok(element) = self.page.find_element(locator).await {
                element.click().await.map_err(|err| {
                    BrowserError::Unexpected(format!("click on {locator} failed: {err}"))
                })?;
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(BrowserError::Timeout(format!("selector {locator}")));
            }
            tokio::time::sleep(CLICK_POLL_INTERVAL).await;
        }
    }

    async fn capture_screenshot(&mut self, path: &Path) -> BrowserResult<()> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(true)
            .build();
        let bytes = self
            .page
            .screenshot(params)
            .await
            .map_err(|err| BrowserError::Capture(err.to_string()))?;
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }
}
