//! IPVS sink.
//!
//! [`Backend`] consumes store generations through the
//! [`kpng_sync_common::Sink`] trait. Staging calls only update in-memory
//! state; `sync()` commits one generation to the kernel in a fixed order:
//!
//! 1. ip-set membership (cluster-IP and loopback sets, per family)
//! 2. virtual-server adds and updates
//! 3. real-server adds, updates and removals
//! 4. virtual-server removals
//! 5. dummy-interface address binding and unbinding
//!
//! Kernel access goes through the [`Kernel`] trait: [`ShellKernel`] runs
//! `ipvsadm`, `ipset` and `ip`; [`DryRunKernel`] models the kernel in
//! memory.

mod backend;
mod config;
mod desired;
mod dummy;
mod error;
mod ipset;
pub mod kernel;
mod lb;

pub use backend::{Backend, SyncStats};
pub use config::IpvsConfig;
pub use dummy::{DummyIp, DummyIps, Reconciled};
pub use error::{EngineError, KernelError, KernelResult};
pub use ipset::{
    Entry, Ipset, IpsetSpec, Ipsets, SetKind, SetType, KUBE_6_CLUSTER_IP, KUBE_6_LOOP_BACK,
    KUBE_CLUSTER_IP, KUBE_LOOP_BACK,
};
pub use kernel::{DryRunKernel, Kernel, KernelOp, ShellKernel};
pub use lb::{lb_key, real_server_key, IpvsLb, RealServer, VirtualServer};
