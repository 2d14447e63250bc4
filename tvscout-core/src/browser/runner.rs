use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use super::engine::{DiscoveryEngine, DiscoveryPolicy, DiscoveryResult, DiscoveryStatus};
use super::error::BrowserResult;
use super::session::SessionFactory;
use crate::registry::ChannelDescriptor;

/// Outcome of one region run.
#[derive(Debug, Clone, Serialize)]
pub struct RegionReport {
    pub run_id: Uuid,
    pub region: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub found: usize,
    pub not_found: usize,
    pub errors: usize,
    pub cancelled: bool,
    pub results: Vec<DiscoveryResult>,
}

/// Session lifecycle around the engine: acquire a browser, run the
/// batch on one surface, release the browser on every path.
pub struct DiscoveryRunner {
    sessions: Arc<dyn SessionFactory>,
    engine: DiscoveryEngine,
}

impl DiscoveryRunner {
    pub fn new(sessions: Arc<dyn SessionFactory>, engine: DiscoveryEngine) -> Self {
        Self { sessions, engine }
    }

    pub async fn run_region(
        &self,
        region: &str,
        policy: &DiscoveryPolicy,
        channels: &[ChannelDescriptor],
        cancel: &CancellationToken,
    ) -> BrowserResult<RegionReport> {
        let started_at = Utc::now();
        let clock = tokio::time::Instant::now();
        info!(region, channels = channels.len(), "starting discovery run");

        let mut session = self.sessions.create().await?;
        let outcome = match session.surface().await {
            Ok(mut surface) => Ok(self
                .engine
                .run(surface.as_mut(), policy, channels, cancel)
                .await),
            Err(err) => Err(err),
        };
        let shutdown_result = session.shutdown().await;
        shutdown_result?;
        let (results, cancelled) = outcome?;

        let report = RegionReport {
            run_id: Uuid::new_v4(),
            region: region.to_string(),
            started_at,
            duration_ms: clock.elapsed().as_millis() as u64,
            found: count(&results, DiscoveryStatus::Found),
            not_found: count(&results, DiscoveryStatus::NotFound),
            errors: count(&results, DiscoveryStatus::Error),
            cancelled,
            results,
        };
        info!(
            run_id = %report.run_id,
            region,
            found = report.found,
            not_found = report.not_found,
            errors = report.errors,
            cancelled = report.cancelled,
            duration_ms = report.duration_ms,
            "discovery run finished"
        );
        Ok(report)
    }
}

fn count(results: &[DiscoveryResult], status: DiscoveryStatus) -> usize {
    results.iter().filter(|r| r.status == status).count()
}
