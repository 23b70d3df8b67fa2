//! Background Tasks Module
//!
//! Timers that run beside request-driven cache use.
//!
//! # Tasks
//! - Cleanup: removes expired entries at a fixed interval
//! - Refresh: re-fetches the critical reads at a fixed interval
//! - Replay: runs a sync queue replay pass on every transition to online
//!
//! Every task holds a `Weak` service handle and exits once the service is
//! gone. [`BackgroundTasks`] aborts them on drop.

mod cleanup;
mod refresh;
mod replay;

use tokio::task::JoinHandle;

pub use cleanup::spawn_cleanup_task;
pub use refresh::spawn_refresh_task;
pub use replay::spawn_replay_task;

/// Owns spawned task handles.
#[derive(Debug, Default)]
pub struct BackgroundTasks {
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    pub fn new(handles: Vec<JoinHandle<()>>) -> Self {
        Self { handles }
    }

    pub fn abort_all(mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}
