//! Addresses bound on the dummy interface.
//!
//! Every service address is bound on the dummy interface so the kernel
//! accepts traffic for it. Several services may share an address, so each
//! address is reference counted: bound on the first claim, unbound after
//! the last release. The count tracks claims only; whether the kernel
//! accepted the bind is tracked separately and retried on every sync.

use crate::error::EngineError;
use crate::kernel::{Kernel, KernelOp};
use kpng_sync_common::{HasRefCount, RefTable};
use kpng_types::{IpFamily, IpPrefix, IpSet};
use std::net::IpAddr;
use tracing::{debug, error};

/// A service address wanted on the dummy interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DummyIp {
    refs: u32,
    prefix: IpPrefix,
    bound: bool,
}

impl DummyIp {
    fn new(ip: IpAddr) -> Result<Self, EngineError> {
        let cidr = format!("{}/{}", ip, IpFamily::of(&ip).host_prefix_len());
        let prefix = cidr.parse().map_err(|source| EngineError::InvalidDummyCidr {
            ip: ip.to_string(),
            source,
        })?;
        Ok(Self {
            refs: 0,
            prefix,
            bound: false,
        })
    }

    /// Host prefix added to the link, `/32` or `/128`.
    pub fn prefix(&self) -> &IpPrefix {
        &self.prefix
    }

    /// Whether the kernel currently holds the address.
    pub fn is_bound(&self) -> bool {
        self.bound
    }
}

impl HasRefCount for DummyIp {
    fn increment_ref(&mut self) -> u32 {
        self.refs += 1;
        self.refs
    }

    fn decrement_ref(&mut self) -> Option<u32> {
        self.refs = self.refs.checked_sub(1)?;
        Some(self.refs)
    }

    fn ref_count(&self) -> u32 {
        self.refs
    }

    fn clear_refs(&mut self) {
        self.refs = 0;
    }
}

/// Outcome of one [`DummyIps::reconcile`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reconciled {
    pub bound: usize,
    pub unbound: usize,
    pub failed: usize,
}

/// Reference-counted addresses of the dummy interface.
///
/// Each service holding an address takes one reference. Binding and
/// unbinding happen only in [`DummyIps::reconcile`].
#[derive(Debug)]
pub struct DummyIps {
    link: String,
    table: RefTable<IpAddr, DummyIp>,
}

impl DummyIps {
    pub fn new(link: impl Into<String>) -> Self {
        Self {
            link: link.into(),
            table: RefTable::new(),
        }
    }

    /// Name of the dummy interface.
    pub fn link(&self) -> &str {
        &self.link
    }

    /// Takes a reference on `ip`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidDummyCidr`] if `ip` cannot be turned
    /// into a host prefix.
    pub fn claim(&mut self, ip: IpAddr) -> Result<u32, EngineError> {
        self.table.acquire(&ip, || DummyIp::new(ip))
    }

    /// Drops a reference on `ip`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::RefCount`] if `ip` holds no reference.
    pub fn release(&mut self, ip: IpAddr) -> Result<u32, EngineError> {
        Ok(self.table.release(&ip)?)
    }

    /// Claims addresses new in `next` and releases those gone from `prev`.
    pub fn apply_diff(&mut self, prev: &IpSet, next: &IpSet) -> Result<(), EngineError> {
        let (added, removed) = prev.diff(next);
        for ip in added {
            self.claim(ip)?;
        }
        for ip in removed {
            self.release(ip)?;
        }
        Ok(())
    }

    /// Services currently holding `ip`; 0 if unknown.
    pub fn ref_count(&self, ip: &IpAddr) -> u32 {
        self.table.count(ip)
    }

    pub fn is_bound(&self, ip: &IpAddr) -> bool {
        self.table.get(ip).is_some_and(DummyIp::is_bound)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Zeroes every count, keeping what the kernel has bound so the next
    /// reconcile unbinds whatever is not claimed again.
    pub fn reset(&mut self) {
        self.table.clear_refs();
    }

    /// Binds claimed addresses not yet bound and unbinds released ones.
    /// Failures are logged and retried on the next pass.
    pub async fn reconcile<K: Kernel + ?Sized>(&mut self, kernel: &mut K) -> Reconciled {
        let mut outcome = Reconciled::default();

        let pending: Vec<(IpAddr, u32, bool, IpPrefix)> = self
            .table
            .iter()
            .map(|(ip, d)| (*ip, d.refs, d.bound, d.prefix))
            .filter(|(_, refs, bound, _)| (*refs > 0) != *bound)
            .collect();

        for (ip, refs, bound, prefix) in pending {
            if refs > 0 {
                let op = KernelOp::AddInterfaceAddr {
                    link: self.link.clone(),
                    addr: prefix,
                };
                match kernel.apply(&op).await {
                    Ok(()) => {
                        if let Some(entry) = self.table.get_mut(&ip) {
                            entry.bound = true;
                        }
                        outcome.bound += 1;
                    }
                    Err(e) => {
                        error!(ip = %ip, link = %self.link, error = %e, "failed to bind service address");
                        outcome.failed += 1;
                    }
                }
            } else if bound {
                let op = KernelOp::DelInterfaceAddr {
                    link: self.link.clone(),
                    addr: prefix,
                };
                match kernel.apply(&op).await {
                    Ok(()) => {
                        self.table.remove(&ip);
                        outcome.unbound += 1;
                    }
                    Err(e) => {
                        error!(ip = %ip, link = %self.link, error = %e, "failed to unbind service address");
                        outcome.failed += 1;
                    }
                }
            }
        }

        // released before the kernel ever accepted them
        let stale: Vec<IpAddr> = self
            .table
            .iter()
            .filter(|(_, d)| d.refs == 0 && !d.bound)
            .map(|(ip, _)| *ip)
            .collect();
        for ip in stale {
            debug!(ip = %ip, "dropping unbound address");
            self.table.remove(&ip);
        }

        outcome
    }
}
