//! Offline Sync Module
//!
//! Connectivity tracking and the durable queue of writes awaiting replay.

mod connectivity;
mod queue;

pub use connectivity::{Connectivity, ConnectivityMonitor, TransitionHandler};
pub use queue::{DeadLetter, ReplayGuard, SyncEvent, SyncQueue, SyncQueueItem};
