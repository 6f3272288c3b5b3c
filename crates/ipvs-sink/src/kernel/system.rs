//! Kernel backed by the `ip`, `ipset` and `ipvsadm` tools.

use super::commands::*;
use super::shell;
use super::{Kernel, KernelOp};
use crate::error::KernelResult;
use async_trait::async_trait;
use tracing::debug;

#[derive(Debug, Default)]
pub struct ShellKernel;

impl ShellKernel {
    pub fn new() -> Self {
        Self
    }

    pub fn command_for(op: &KernelOp) -> String {
        match op {
            KernelOp::EnsureDummyLink { link } => build_ensure_dummy_link_cmd(link),
            KernelOp::EnsureIpset(spec) => build_ensure_ipset_cmd(spec),
            KernelOp::AddIpsetEntry { set, entry } => build_add_ipset_entry_cmd(set, entry),
            KernelOp::DelIpsetEntry { set, entry } => build_del_ipset_entry_cmd(set, entry),
            KernelOp::UpsertVirtualServer(vs) => build_upsert_virtual_server_cmd(vs),
            KernelOp::DelVirtualServer(vs) => build_del_virtual_server_cmd(vs),
            KernelOp::UpsertRealServer(rs) => build_upsert_real_server_cmd(rs),
            KernelOp::DelRealServer(rs) => build_del_real_server_cmd(rs),
            KernelOp::AddInterfaceAddr { link, addr } => build_add_addr_cmd(link, addr),
            KernelOp::DelInterfaceAddr { link, addr } => build_del_addr_cmd(link, addr),
        }
    }
}

#[async_trait]
impl Kernel for ShellKernel {
    async fn apply(&mut self, op: &KernelOp) -> KernelResult<()> {
        debug!(op = %op, "applying kernel operation");
        shell::exec_or_throw(&Self::command_for(op)).await.map(|_| ())
    }
}
