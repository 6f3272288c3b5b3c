//! Kernel access.
//!
//! Every change the engine makes is a [`KernelOp`] handed to a [`Kernel`].

pub mod commands;
mod dry_run;
pub mod shell;
mod system;

pub use dry_run::DryRunKernel;
pub use system::ShellKernel;

use crate::error::KernelResult;
use crate::ipset::IpsetSpec;
use crate::lb::{RealServer, VirtualServer};
use async_trait::async_trait;
use kpng_types::IpPrefix;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelOp {
    /// Creates the dummy interface if missing.
    EnsureDummyLink { link: String },
    /// Creates an ip-set if missing.
    EnsureIpset(IpsetSpec),
    AddIpsetEntry { set: String, entry: String },
    DelIpsetEntry { set: String, entry: String },
    /// Adds the virtual server, or edits it in place if it exists.
    UpsertVirtualServer(VirtualServer),
    DelVirtualServer(VirtualServer),
    /// Adds the real server, or edits it in place if it exists.
    UpsertRealServer(RealServer),
    DelRealServer(RealServer),
    AddInterfaceAddr { link: String, addr: IpPrefix },
    DelInterfaceAddr { link: String, addr: IpPrefix },
}

impl fmt::Display for KernelOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelOp::EnsureDummyLink { link } => write!(f, "ensure dummy link {}", link),
            KernelOp::EnsureIpset(spec) => write!(f, "ensure ip-set {} ({}, {})", spec.name, spec.set_type, spec.family),
            KernelOp::AddIpsetEntry { set, entry } => write!(f, "add {} to ip-set {}", entry, set),
            KernelOp::DelIpsetEntry { set, entry } => write!(f, "del {} from ip-set {}", entry, set),
            KernelOp::UpsertVirtualServer(vs) => write!(f, "upsert virtual server {} ({})", vs, vs.scheduler),
            KernelOp::DelVirtualServer(vs) => write!(f, "del virtual server {}", vs),
            KernelOp::UpsertRealServer(rs) => write!(f, "upsert real server {}", rs),
            KernelOp::DelRealServer(rs) => write!(f, "del real server {}", rs),
            KernelOp::AddInterfaceAddr { link, addr } => write!(f, "add {} on {}", addr, link),
            KernelOp::DelInterfaceAddr { link, addr } => write!(f, "del {} from {}", addr, link),
        }
    }
}

/// Applies kernel operations.
#[async_trait]
pub trait Kernel: Send {
    async fn apply(&mut self, op: &KernelOp) -> KernelResult<()>;
}
