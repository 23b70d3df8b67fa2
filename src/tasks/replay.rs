//! Replay-on-Reconnect Task
//!
//! Watches connectivity and runs one replay pass per transition to online.
//! When started online it first drains whatever the queue restored from
//! disk. Overlapping passes are prevented by the queue's replay guard.

use std::sync::Weak;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::service::CacheService;
use crate::sync::Connectivity;

pub fn spawn_replay_task(
    service: Weak<CacheService>,
    mut connectivity: watch::Receiver<Connectivity>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Starting replay-on-reconnect task");

        if *connectivity.borrow_and_update() == Connectivity::Online {
            let Some(service) = service.upgrade() else {
                return;
            };
            if !service.queue().is_empty() {
                info!(pending = service.queue().len(), "Replaying writes restored at startup");
                service.replay_queue().await;
            }
        }

        while connectivity.changed().await.is_ok() {
            let state = *connectivity.borrow_and_update();
            if state != Connectivity::Online {
                continue;
            }

            let Some(service) = service.upgrade() else {
                return;
            };
            let report = service.replay_queue().await;
            if report.skipped {
                debug!("Reconnect replay skipped, running pass will pick it up");
            }
        }
        debug!("Connectivity channel closed, stopping replay task");
    })
}
