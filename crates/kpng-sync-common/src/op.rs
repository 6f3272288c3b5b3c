//! Diff protocol operations and per-transaction change logs.

use kpng_types::{EndpointInfo, Service, ServiceKey, SourceKey};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One operation delivered to a sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    SetService(Arc<Service>),
    DeleteService(ServiceKey),
    /// Replaces every endpoint of `source`.
    SetEndpoints {
        source: SourceKey,
        endpoints: Arc<[EndpointInfo]>,
    },
    DeleteEndpoints(SourceKey),
    /// End of generation marker.
    Sync { generation: u64 },
}

/// Row an operation applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OpKey {
    Service(ServiceKey),
    Endpoints(SourceKey),
}

impl Op {
    /// Returns the row this operation touches; `None` for the sync marker.
    pub fn key(&self) -> Option<OpKey> {
        match self {
            Op::SetService(svc) => Some(OpKey::Service(svc.key())),
            Op::DeleteService(key) => Some(OpKey::Service(key.clone())),
            Op::SetEndpoints { source, .. } | Op::DeleteEndpoints(source) => {
                Some(OpKey::Endpoints(source.clone()))
            }
            Op::Sync { .. } => None,
        }
    }

    pub fn is_set(&self) -> bool {
        matches!(self, Op::SetService(_) | Op::SetEndpoints { .. })
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Op::DeleteService(_) | Op::DeleteEndpoints(_))
    }

    pub fn is_sync(&self) -> bool {
        matches!(self, Op::Sync { .. })
    }
}

/// Operations recorded by one store transaction, deduplicated per row.
///
/// Every operation carries the full row state, so only the last operation
/// on a row matters:
/// - SET after DEL: the SET replaces the row, the DEL is dropped
/// - DEL after SET: the row is gone, the SET is dropped
#[derive(Debug, Clone, Default)]
pub struct Changes {
    ops: BTreeMap<OpKey, Op>,
}

impl Changes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `op`, replacing any earlier operation on the same row.
    /// Sync markers are not part of a change log and are ignored.
    pub fn record(&mut self, op: Op) {
        if let Some(key) = op.key() {
            self.ops.insert(key, op);
        }
    }

    /// Drops a pending operation on `key`, if any.
    pub fn forget(&mut self, key: &OpKey) -> Option<Op> {
        self.ops.remove(key)
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Op> {
        self.ops.values()
    }

    /// Operations ordered by row: services first, then endpoint batches.
    pub fn into_ops(self) -> Vec<Op> {
        self.ops.into_values().collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Full replay of the store.
    Bootstrap,
    /// Changes of a single transaction.
    Incremental,
}

/// One batch delivered to a sink, always ending with [`Op::Sync`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub number: u64,
    pub mode: SyncMode,
    pub ops: Vec<Op>,
}

impl Generation {
    pub fn new(number: u64, mode: SyncMode, mut ops: Vec<Op>) -> Self {
        ops.push(Op::Sync { generation: number });
        Self { number, mode, ops }
    }

    pub fn bootstrap(number: u64, ops: Vec<Op>) -> Self {
        Self::new(number, SyncMode::Bootstrap, ops)
    }

    pub fn incremental(number: u64, ops: Vec<Op>) -> Self {
        Self::new(number, SyncMode::Incremental, ops)
    }

    /// True if the last operation is this generation's sync marker and no
    /// other marker precedes it.
    pub fn is_terminated(&self) -> bool {
        let Some((last, rest)) = self.ops.split_last() else {
            return false;
        };
        *last == Op::Sync {
            generation: self.number,
        } && !rest.iter().any(Op::is_sync)
    }

    /// Operations excluding the trailing sync marker.
    pub fn changes(&self) -> &[Op] {
        match self.ops.split_last() {
            Some((last, rest)) if last.is_sync() => rest,
            _ => &self.ops,
        }
    }

    pub fn is_bootstrap(&self) -> bool {
        self.mode == SyncMode::Bootstrap
    }
}
