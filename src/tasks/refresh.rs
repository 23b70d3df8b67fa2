//! Critical Refresh Task
//!
//! Keeps dashboard-style aggregates fresh even when nothing reads them.

use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::service::CacheService;

/// Spawns the refresh loop. Runs are skipped while offline.
pub fn spawn_refresh_task(service: Weak<CacheService>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "Starting critical refresh task");

        loop {
            tokio::time::sleep(interval).await;

            let Some(service) = service.upgrade() else {
                return;
            };
            if !service.connectivity().is_online() {
                debug!("Offline, skipping critical refresh");
                continue;
            }

            let report = service.refresh_critical().await;
            debug!(
                refreshed = report.loaded,
                failed = report.failed,
                "Critical refresh finished"
            );
        }
    })
}
