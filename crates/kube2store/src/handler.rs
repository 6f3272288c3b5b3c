//! Event handler capability and initial-sync tracking.

use crate::{Result, WatchEvent};
use proxystore::{Set, Tx};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Handles the watch callbacks of one resource.
pub trait EventHandler<T> {
    fn on_add(&mut self, obj: &T) -> Result<()>;

    fn on_update(&mut self, old: &T, new: &T) -> Result<()>;

    fn on_delete(&mut self, obj: &T) -> Result<()>;

    /// Called when the watch reports its initial listing complete without
    /// carrying an object.
    fn on_synced(&mut self);
}

pub fn dispatch<T, H>(handler: &mut H, event: &WatchEvent<T>) -> Result<()>
where
    H: EventHandler<T> + ?Sized,
{
    match event {
        WatchEvent::Added(obj) => handler.on_add(obj),
        WatchEvent::Updated { old, new } => handler.on_update(old, new),
        WatchEvent::Deleted(obj) => handler.on_delete(obj),
    }
}

/// "Has the initial listing completed?" query on a watch source.
pub trait HasSynced: Send + Sync {
    fn has_synced(&self) -> bool;
}

/// One-way flag set when a watch source reports synced.
#[derive(Debug, Default)]
pub struct SyncFlag(AtomicBool);

impl SyncFlag {
    pub fn mark(&self) {
        self.0.store(true, Ordering::Release);
    }
}

impl HasSynced for SyncFlag {
    fn has_synced(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Marks a store entity kind synced, once, after the watch has synced.
pub struct SyncTracker {
    set: Set,
    source: Arc<dyn HasSynced>,
    marked: bool,
}

impl SyncTracker {
    pub fn new(set: Set, source: Arc<dyn HasSynced>) -> Self {
        Self {
            set,
            source,
            marked: false,
        }
    }

    /// Call at the end of every transaction. No-op once marked.
    pub fn update_sync(&mut self, tx: &mut Tx<'_>) {
        if self.marked || !self.source.has_synced() {
            return;
        }
        tx.set_sync(self.set);
        self.marked = true;
        info!(set = ?self.set, "initial listing complete");
    }

    pub fn is_marked(&self) -> bool {
        self.marked
    }
}
