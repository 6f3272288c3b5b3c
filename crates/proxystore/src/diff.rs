//! Pull side of the diff protocol.

use crate::store::{Next, Store};
use kpng_sync_common::Generation;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// One consumer's position in the store's generation sequence.
///
/// The first generation a reader returns is a bootstrap. After that, each
/// [`DiffReader::next`] returns the generation following the last one
/// passed to [`DiffReader::ack`], or a bootstrap if the store no longer
/// retains it. Nothing is returned until every entity kind is synced.
pub struct DiffReader {
    store: Arc<Store>,
    generation_rx: watch::Receiver<u64>,
    acked: Option<u64>,
}

impl DiffReader {
    pub fn new(store: Arc<Store>) -> Self {
        let generation_rx = store.subscribe();
        Self {
            store,
            generation_rx,
            acked: None,
        }
    }

    /// Waits for the next generation.
    ///
    /// Returns `None` only if the store's notification channel closed.
    pub async fn next(&mut self) -> Option<Generation> {
        loop {
            // mark seen before reading so a concurrent commit wakes us
            self.generation_rx.borrow_and_update();
            match self.store.next_for(self.acked) {
                Next::Ready(generation) => return Some(generation),
                Next::Wait => {
                    if self.generation_rx.changed().await.is_err() {
                        return None;
                    }
                }
            }
        }
    }

    /// Records that `number` was fully applied.
    pub fn ack(&mut self, number: u64) {
        self.acked = Some(number);
    }

    /// Forgets the acknowledged position; the next generation is a bootstrap.
    pub fn request_bootstrap(&mut self) {
        debug!(acked = ?self.acked, "bootstrap requested");
        self.acked = None;
    }

    pub fn acked(&self) -> Option<u64> {
        self.acked
    }
}

impl Store {
    /// Creates a reader positioned before the first bootstrap.
    pub fn diff_reader(self: &Arc<Self>) -> DiffReader {
        DiffReader::new(self.clone())
    }
}
