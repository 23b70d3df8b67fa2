//! Connectivity Monitor
//!
//! Two-state machine (online / offline) driven by external signals. Observers
//! either register a callback or subscribe to a watch channel.

use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    Online,
    Offline,
}

impl std::fmt::Display for Connectivity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Connectivity::Online => write!(f, "online"),
            Connectivity::Offline => write!(f, "offline"),
        }
    }
}

/// Callback invoked with the new state after every transition.
pub type TransitionHandler = Arc<dyn Fn(Connectivity) + Send + Sync>;

pub struct ConnectivityMonitor {
    state: watch::Sender<Connectivity>,
    handlers: Mutex<Vec<TransitionHandler>>,
}

impl ConnectivityMonitor {
    pub fn new(initial: Connectivity) -> Self {
        let (state, _) = watch::channel(initial);
        Self {
            state,
            handlers: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> Connectivity {
        *self.state.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.state() == Connectivity::Online
    }

    /// Returns true if this call changed the state.
    pub fn mark_online(&self) -> bool {
        self.set(Connectivity::Online)
    }

    /// Returns true if this call changed the state.
    pub fn mark_offline(&self) -> bool {
        self.set(Connectivity::Offline)
    }

    pub fn set(&self, next: Connectivity) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });

        if changed {
            info!(state = %next, "Connectivity changed");
            // Clone out so handlers may register further handlers
            let handlers: Vec<TransitionHandler> = self
                .handlers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            for handler in handlers {
                handler(next);
            }
        }
        changed
    }

    pub fn on_transition(&self, handler: impl Fn(Connectivity) + Send + Sync + 'static) {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(handler));
    }

    /// Receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.state.subscribe()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(Connectivity::Online)
    }
}

impl std::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("state", &self.state())
            .finish()
    }
}
