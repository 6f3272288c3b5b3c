//! In-memory kernel.
//!
//! Records every operation and keeps the resulting state, so callers can
//! inspect what a real kernel would hold. Failures can be injected per
//! operation kind.

use super::{Kernel, KernelOp};
use crate::error::{KernelError, KernelResult};
use crate::lb::{RealServer, VirtualServer};
use async_trait::async_trait;
use kpng_types::IpPrefix;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::IpAddr;
use tracing::info;

#[derive(Default)]
pub struct DryRunKernel {
    ops: Vec<KernelOp>,
    failures: Vec<fn(&KernelOp) -> bool>,
    quiet: bool,
    links: BTreeSet<String>,
    addresses: BTreeMap<String, BTreeSet<IpPrefix>>,
    ipsets: BTreeMap<String, BTreeSet<String>>,
    virtual_servers: BTreeMap<String, VirtualServer>,
    real_servers: BTreeMap<String, RealServer>,
}

impl DryRunKernel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Same, without logging each operation.
    pub fn quiet() -> Self {
        Self {
            quiet: true,
            ..Self::default()
        }
    }

    /// Rejects every later operation matching `pred`.
    pub fn fail_when(&mut self, pred: fn(&KernelOp) -> bool) {
        self.failures.push(pred);
    }

    pub fn clear_failures(&mut self) {
        self.failures.clear();
    }

    /// Every operation attempted, including rejected ones.
    pub fn ops(&self) -> &[KernelOp] {
        &self.ops
    }

    pub fn take_ops(&mut self) -> Vec<KernelOp> {
        std::mem::take(&mut self.ops)
    }

    pub fn has_link(&self, link: &str) -> bool {
        self.links.contains(link)
    }

    pub fn addresses(&self, link: &str) -> Vec<IpAddr> {
        self.addresses
            .get(link)
            .map(|addrs| addrs.iter().map(|p| *p.address()).collect())
            .unwrap_or_default()
    }

    pub fn has_address(&self, link: &str, ip: &IpAddr) -> bool {
        self.addresses
            .get(link)
            .is_some_and(|addrs| addrs.iter().any(|p| p.address() == ip))
    }

    pub fn has_ipset(&self, name: &str) -> bool {
        self.ipsets.contains_key(name)
    }

    /// Members of ip-set `name`, sorted.
    pub fn ipset_entries(&self, name: &str) -> Vec<String> {
        self.ipsets
            .get(name)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn virtual_servers(&self) -> impl Iterator<Item = &VirtualServer> {
        self.virtual_servers.values()
    }

    pub fn virtual_server(&self, id: &str) -> Option<&VirtualServer> {
        self.virtual_servers.get(id)
    }

    pub fn real_servers(&self) -> impl Iterator<Item = &RealServer> {
        self.real_servers.values()
    }

    /// Real servers of the virtual server displayed as `vs_id`.
    pub fn real_servers_of(&self, vs_id: &str) -> Vec<&RealServer> {
        self.real_servers
            .values()
            .filter(|rs| rs.virtual_server.to_string() == vs_id)
            .collect()
    }

    fn apply_state(&mut self, op: &KernelOp) -> KernelResult<()> {
        match op {
            KernelOp::EnsureDummyLink { link } => {
                self.links.insert(link.clone());
            }
            KernelOp::EnsureIpset(spec) => {
                self.ipsets.entry(spec.name.to_string()).or_default();
            }
            KernelOp::AddIpsetEntry { set, entry } => {
                let members = self
                    .ipsets
                    .get_mut(set)
                    .ok_or_else(|| KernelError::rejected(op, "no such set"))?;
                members.insert(entry.clone());
            }
            KernelOp::DelIpsetEntry { set, entry } => {
                if let Some(members) = self.ipsets.get_mut(set) {
                    members.remove(entry);
                }
            }
            KernelOp::UpsertVirtualServer(vs) => {
                self.virtual_servers.insert(vs.to_string(), vs.clone());
            }
            KernelOp::DelVirtualServer(vs) => {
                let id = vs.to_string();
                // real servers go with their service
                self.real_servers.retain(|_, rs| rs.virtual_server.to_string() != id);
                self.virtual_servers.remove(&id);
            }
            KernelOp::UpsertRealServer(rs) => {
                if !self.virtual_servers.contains_key(&rs.virtual_server.to_string()) {
                    return Err(KernelError::rejected(op, "no such service"));
                }
                self.real_servers.insert(rs.to_string(), rs.clone());
            }
            KernelOp::DelRealServer(rs) => {
                self.real_servers.remove(&rs.to_string());
            }
            KernelOp::AddInterfaceAddr { link, addr } => {
                if !self.links.contains(link) {
                    return Err(KernelError::rejected(op, "no such device"));
                }
                if !self.addresses.entry(link.clone()).or_default().insert(*addr) {
                    return Err(KernelError::rejected(op, "address already assigned"));
                }
            }
            KernelOp::DelInterfaceAddr { link, addr } => {
                let removed = self
                    .addresses
                    .get_mut(link)
                    .is_some_and(|addrs| addrs.remove(addr));
                if !removed {
                    return Err(KernelError::rejected(op, "address not assigned"));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for DryRunKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DryRunKernel")
            .field("ops", &self.ops.len())
            .field("failures", &self.failures.len())
            .field("links", &self.links)
            .field("addresses", &self.addresses)
            .field("ipsets", &self.ipsets)
            .field("virtual_servers", &self.virtual_servers.keys())
            .field("real_servers", &self.real_servers.keys())
            .finish()
    }
}

#[async_trait]
impl Kernel for DryRunKernel {
    async fn apply(&mut self, op: &KernelOp) -> KernelResult<()> {
        self.ops.push(op.clone());

        if self.failures.iter().any(|pred| pred(op)) {
            return Err(KernelError::rejected(op, "injected failure"));
        }
        if !self.quiet {
            info!("dry-run: {}", op);
        }
        self.apply_state(op)
    }
}
