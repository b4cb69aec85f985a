//! Live-reload hub shared by every reload action
//!
//! The hub is created once at startup and handed to the runner as an
//! `Arc<dyn ReloadHub>`. Viewer transports subscribe to it and turn each
//! [`Refresh`] notice into whatever push message their clients understand.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::broadcast;

use crate::error::ReloadError;

/// Capacity of the notice buffer per subscriber. Slow viewers miss notices
/// rather than holding up the sender; a missed refresh is harmless.
const NOTICE_BUFFER: usize = 16;

/// "Every connected viewer should refresh now"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Refresh {
    pub seq: u64,
}

pub trait ReloadHub: Send + Sync {
    /// Ask all connected viewers to refresh. Must not block.
    fn force_refresh(&self) -> Result<(), ReloadError>;
}

/// Hub backed by a tokio broadcast channel
pub struct BroadcastHub {
    tx: broadcast::Sender<Refresh>,
    seq: AtomicU64,
    closed: AtomicBool,
}

impl BroadcastHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(NOTICE_BUFFER);
        Self {
            tx,
            seq: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Refresh> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Number of refreshes issued so far
    pub fn refreshes(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    /// Stop accepting refreshes, used on shutdown
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ReloadHub for BroadcastHub {
    fn force_refresh(&self) -> Result<(), ReloadError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ReloadError::Closed);
        }

        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        // No subscribers is fine: nobody is looking at a screenshot right now.
        if self.tx.send(Refresh { seq }).is_err() {
            tracing::debug!(seq, "no viewers connected, refresh dropped");
        }
        Ok(())
    }
}
