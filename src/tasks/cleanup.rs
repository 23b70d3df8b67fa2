//! TTL Cleanup Task
//!
//! Periodically removes expired entries from memory and the durable mirror.

use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::service::CacheService;

/// Spawns the cleanup loop.
///
/// The first pass runs one `interval` after spawning. The loop ends when
/// the service has been dropped; abort the handle to stop it earlier.
pub fn spawn_cleanup_task(service: Weak<CacheService>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "Starting TTL cleanup task");

        loop {
            tokio::time::sleep(interval).await;

            let Some(service) = service.upgrade() else {
                debug!("Service dropped, stopping cleanup task");
                return;
            };
            let removed = service.cleanup_expired().await;

            if removed > 0 {
                info!(removed, "TTL cleanup removed expired entries");
            } else {
                debug!("TTL cleanup: no expired entries found");
            }
        }
    })
}
