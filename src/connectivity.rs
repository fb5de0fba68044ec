//! Process-wide online/offline signals.
//!
//! The host (terminal UI, a network watcher, a test) reports link changes
//! through a [`ConnectivityMonitor`].  A feed claims the monitor's listener
//! slot with [`ConnectivityMonitor::register`]; only one registration may be
//! live at a time, and dropping the returned [`Registration`] releases it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::error::FeedError;

/// An external link-state notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSignal {
    Online,
    Offline,
}

/// Hub for link signals.  Cheap to clone; clones share the listener slot.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    tx: broadcast::Sender<LinkSignal>,
    claimed: Arc<AtomicBool>,
}

/// Exclusive claim on a monitor's listener slot.
#[derive(Debug)]
pub struct Registration {
    rx: Option<broadcast::Receiver<LinkSignal>>,
    claimed: Arc<AtomicBool>,
}

impl ConnectivityMonitor {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self {
            tx,
            claimed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Report a link change to the registered listener, if any.
    pub fn notify(&self, signal: LinkSignal) {
        tracing::info!(?signal, "link signal");
        // No listener registered is fine; the signal is simply not observed.
        let _ = self.tx.send(signal);
    }

    /// Claim the listener slot.
    pub fn register(&self) -> Result<Registration, FeedError> {
        if self
            .claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(FeedError::ListenerInUse);
        }
        Ok(Registration {
            rx: Some(self.tx.subscribe()),
            claimed: Arc::clone(&self.claimed),
        })
    }

    /// Whether a listener currently holds the slot.
    #[cfg(test)]
    pub fn is_registered(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Registration {
    /// Hand the signal receiver to the task that consumes it.  The slot stays
    /// claimed until the registration itself is dropped.
    pub fn take_receiver(&mut self) -> Option<broadcast::Receiver<LinkSignal>> {
        self.rx.take()
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.claimed.store(false, Ordering::Release);
    }
}
