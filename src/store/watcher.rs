//! Snapshot file watcher.

use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};

use crate::store::file::FileStore;
use crate::sync::SyncQueue;

/// Reloads the file store when its snapshot changes and asks for a sync.
pub struct SnapshotWatcher {
    store: Arc<FileStore>,
    queue: SyncQueue,
}

impl SnapshotWatcher {
    pub fn new(store: Arc<FileStore>, queue: SyncQueue) -> Self {
        Self { store, queue }
    }

    /// Start watching in notify's background thread.
    ///
    /// The returned watcher must be kept alive for events to keep flowing.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let path = self
            .store
            .path()
            .map(|p| p.to_path_buf())
            .ok_or_else(|| notify::Error::generic("store has no snapshot file"))?;
        let store = Arc::clone(&self.store);
        let queue = self.queue.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        match store.reload() {
                            Ok(true) => queue.enqueue("snapshot changed"),
                            Ok(false) => tracing::debug!("Snapshot touched without changes"),
                            Err(e) => tracing::error!(
                                error = %e,
                                "Failed to reload snapshot, keeping current state"
                            ),
                        }
                    }
                }
                Err(e) => tracing::error!(error = ?e, "Snapshot watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = %path.display(), "Snapshot watcher started");
        Ok(watcher)
    }
}
