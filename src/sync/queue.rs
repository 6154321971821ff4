//! Coalescing sync work queue.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct QueueInner {
    notify: Notify,
    pending: AtomicBool,
    coalesced: AtomicU64,
}

/// Requests a reconciliation tick.
///
/// Any number of requests made while one is pending collapse into that one;
/// the tick always reads full state, so only the latest request matters.
#[derive(Debug, Clone, Default)]
pub struct SyncQueue {
    inner: Arc<QueueInner>,
}

impl SyncQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, reason: &str) {
        if self.inner.pending.swap(true, Ordering::SeqCst) {
            self.inner.coalesced.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(reason, "Sync already pending");
            return;
        }
        tracing::debug!(reason, "Sync requested");
        self.inner.notify.notify_one();
    }

    /// Wait for a pending request and take it.
    pub async fn next(&self) {
        loop {
            if self.inner.pending.swap(false, Ordering::SeqCst) {
                return;
            }
            self.inner.notify.notified().await;
        }
    }

    pub fn is_pending(&self) -> bool {
        self.inner.pending.load(Ordering::SeqCst)
    }

    /// Requests folded into an already pending one.
    pub fn coalesced(&self) -> u64 {
        self.inner.coalesced.load(Ordering::Relaxed)
    }
}
