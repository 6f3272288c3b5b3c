//! Store, its configuration and generation history.

use crate::tx::{Tx, View};
use kpng_sync_common::{Generation, Op};
use kpng_types::{EndpointInfo, Service, ServiceKey, SourceKey};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Entity kinds with an independent "initial listing complete" flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Set {
    Services,
    Endpoints,
}

impl Set {
    pub const ALL: [Set; 2] = [Set::Services, Set::Endpoints];
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Incremental generations kept for consumers that fall behind.
    #[serde(default = "default_history_generations")]
    pub history_generations: usize,

    /// Delay before a failed sink is bootstrapped again.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_history_generations() -> usize {
    64
}

fn default_retry_backoff_ms() -> u64 {
    500
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            history_generations: default_history_generations(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl StoreConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// What a consumer should do next.
#[derive(Debug)]
pub(crate) enum Next {
    Ready(Generation),
    Wait,
}

#[derive(Debug, Default)]
pub(crate) struct Inner {
    pub(crate) services: BTreeMap<ServiceKey, Arc<Service>>,
    pub(crate) endpoints: BTreeMap<SourceKey, Arc<[EndpointInfo]>>,
    /// (namespace, source name) -> service name; sources are published
    /// under a namespace but the service they feed can change.
    pub(crate) sources: HashMap<(String, String), String>,
    pub(crate) synced: BTreeSet<Set>,
    pub(crate) generation: u64,
    history: VecDeque<Generation>,
}

impl Inner {
    pub(crate) fn all_synced(&self) -> bool {
        Set::ALL.iter().all(|set| self.synced.contains(set))
    }

    fn bootstrap(&self) -> Generation {
        let mut ops = Vec::with_capacity(self.services.len() + self.endpoints.len());
        ops.extend(self.services.values().cloned().map(Op::SetService));
        ops.extend(self.endpoints.iter().map(|(source, endpoints)| Op::SetEndpoints {
            source: source.clone(),
            endpoints: endpoints.clone(),
        }));
        Generation::bootstrap(self.generation, ops)
    }

    fn incremental(&self, number: u64) -> Option<Generation> {
        let front = self.history.front()?.number;
        let index = number.checked_sub(front)?;
        self.history.get(usize::try_from(index).ok()?).cloned()
    }

    pub(crate) fn next_for(&self, acked: Option<u64>) -> Next {
        if !self.all_synced() {
            return Next::Wait;
        }
        match acked {
            None => Next::Ready(self.bootstrap()),
            Some(acked) if acked >= self.generation => Next::Wait,
            Some(acked) => match self.incremental(acked + 1) {
                Some(generation) => Next::Ready(generation),
                None => {
                    info!(
                        acked,
                        current = self.generation,
                        "consumer fell behind retained history, sending bootstrap"
                    );
                    Next::Ready(self.bootstrap())
                }
            },
        }
    }
}

/// Transactional service/endpoint store.
///
/// Writers are serialized by the write lock; readers run concurrently with
/// each other but never with a transaction.
pub struct Store {
    inner: RwLock<Inner>,
    generation_tx: watch::Sender<u64>,
    history_limit: usize,
}

impl Store {
    pub fn new(config: &StoreConfig) -> Self {
        let (generation_tx, _) = watch::channel(0);
        Self {
            inner: RwLock::new(Inner::default()),
            generation_tx,
            history_limit: config.history_generations.max(1),
        }
    }

    /// Runs `f` in a transaction.
    ///
    /// The transaction's effects become visible to readers and diff
    /// consumers atomically when `f` returns. A transaction that changed
    /// no row and no synced flag does not create a generation.
    pub fn update<R>(&self, f: impl FnOnce(&mut Tx<'_>) -> R) -> R {
        let mut inner = self.inner.write();
        let mut tx = Tx::new(&mut inner);
        let result = f(&mut tx);
        let (changes, synced_changed) = tx.finish();

        if changes.is_empty() && !synced_changed {
            return result;
        }

        inner.generation += 1;
        let number = inner.generation;
        let ops = changes.len();
        inner
            .history
            .push_back(Generation::incremental(number, changes.into_ops()));
        while inner.history.len() > self.history_limit {
            inner.history.pop_front();
        }
        drop(inner);

        debug!(generation = number, ops, "store transaction committed");
        self.generation_tx.send_replace(number);
        result
    }

    /// Runs `f` against a read-only snapshot.
    pub fn view<R>(&self, f: impl FnOnce(&View<'_>) -> R) -> R {
        let inner = self.inner.read();
        f(&View::new(&inner))
    }

    pub fn generation(&self) -> u64 {
        self.inner.read().generation
    }

    /// Watch channel carrying the latest generation number.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation_tx.subscribe()
    }

    pub(crate) fn next_for(&self, acked: Option<u64>) -> Next {
        self.inner.read().next_for(acked)
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new(&StoreConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn service(name: &str) -> Service {
        let mut svc = Service::new("ns", name);
        svc.ips.cluster_ips.insert("10.0.0.5".parse().unwrap());
        svc
    }

    fn synced_store(config: &StoreConfig) -> Store {
        let store = Store::new(config);
        store.update(|tx| {
            tx.set_sync(Set::Services);
            tx.set_sync(Set::Endpoints);
        });
        store
    }

    #[test]
    fn test_generation_bumps_only_on_change() {
        let store = Store::default();
        assert_eq!(store.generation(), 0);

        store.update(|tx| tx.set_service(service("a")));
        assert_eq!(store.generation(), 1);

        // same content, no generation
        store.update(|tx| tx.set_service(service("a")));
        assert_eq!(store.generation(), 1);

        store.update(|_| ());
        assert_eq!(store.generation(), 1);

        store.update(|tx| tx.del_service("ns", "a"));
        assert_eq!(store.generation(), 2);
    }

    #[test]
    fn test_no_generation_before_synced() {
        let store = Store::default();
        store.update(|tx| tx.set_service(service("a")));
        assert!(matches!(store.next_for(None), Next::Wait));

        store.update(|tx| tx.set_sync(Set::Services));
        assert!(matches!(store.next_for(None), Next::Wait));

        store.update(|tx| tx.set_sync(Set::Endpoints));
        match store.next_for(None) {
            Next::Ready(generation) => {
                assert!(generation.is_bootstrap());
                assert_eq!(generation.number, 3);
                assert_eq!(generation.changes().len(), 1);
            }
            Next::Wait => panic!("expected a bootstrap"),
        }
    }

    #[test]
    fn test_incremental_follows_ack() {
        let store = synced_store(&StoreConfig::default());
        let acked = store.generation();

        store.update(|tx| tx.set_service(service("a")));
        store.update(|tx| tx.set_service(service("b")));

        let Next::Ready(first) = store.next_for(Some(acked)) else {
            panic!("expected generation");
        };
        assert!(!first.is_bootstrap());
        assert_eq!(first.number, acked + 1);
        assert!(matches!(&first.ops[0], Op::SetService(s) if s.name == "a"));

        let Next::Ready(second) = store.next_for(Some(first.number)) else {
            panic!("expected generation");
        };
        assert_eq!(second.number, acked + 2);

        assert!(matches!(store.next_for(Some(second.number)), Next::Wait));
    }

    #[test]
    fn test_truncated_history_falls_back_to_bootstrap() {
        let config = StoreConfig {
            history_generations: 2,
            ..StoreConfig::default()
        };
        let store = synced_store(&config);
        let acked = store.generation();

        for name in ["a", "b", "c", "d"] {
            store.update(|tx| tx.set_service(service(name)));
        }

        let Next::Ready(generation) = store.next_for(Some(acked)) else {
            panic!("expected generation");
        };
        assert!(generation.is_bootstrap());
        assert_eq!(generation.number, store.generation());
        assert_eq!(generation.changes().len(), 4);
    }

    #[test]
    fn test_subscribe_sees_latest_generation() {
        let store = Store::default();
        let rx = store.subscribe();
        store.update(|tx| tx.set_service(service("a")));
        assert_eq!(*rx.borrow(), 1);
    }
}
