//! Verification helpers for kernel state
//!
//! Assertions over what the in-memory kernel holds after a pipeline has
//! settled, plus a comparable snapshot of the whole state.

use ipvs_sink::{DryRunKernel, KUBE_6_CLUSTER_IP, KUBE_6_LOOP_BACK, KUBE_CLUSTER_IP, KUBE_LOOP_BACK};
use std::collections::BTreeMap;
use std::net::IpAddr;
use thiserror::Error;

/// Verification error types
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Expected entry '{entry}' not found in ip-set {set}")]
    MissingIpsetEntry { set: String, entry: String },

    #[error("Unexpected entry '{entry}' in ip-set {set}")]
    UnexpectedIpsetEntry { set: String, entry: String },

    #[error("Expected virtual server {id} not found")]
    MissingVirtualServer { id: String },

    #[error("Unexpected virtual server {id}")]
    UnexpectedVirtualServer { id: String },

    #[error("Real servers of {id}: expected {expected:?}, got {actual:?}")]
    RealServerMismatch {
        id: String,
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("Address {ip} on {link}: expected bound={expected}")]
    AddressMismatch { link: String, ip: IpAddr, expected: bool },
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;

/// Kernel state verifier
pub struct KernelVerifier<'a> {
    kernel: &'a DryRunKernel,
    link: String,
}

impl<'a> KernelVerifier<'a> {
    /// Verifier for a kernel using the default dummy interface
    pub fn new(kernel: &'a DryRunKernel) -> Self {
        Self::with_link(kernel, "kube-ipvs0")
    }

    pub fn with_link(kernel: &'a DryRunKernel, link: &str) -> Self {
        Self {
            kernel,
            link: link.to_string(),
        }
    }

    pub fn assert_ipset_contains(&self, set: &str, entry: &str) -> VerifyResult<()> {
        if !self.kernel.ipset_entries(set).iter().any(|e| e == entry) {
            return Err(VerificationError::MissingIpsetEntry {
                set: set.to_string(),
                entry: entry.to_string(),
            });
        }
        Ok(())
    }

    pub fn assert_ipset_lacks(&self, set: &str, entry: &str) -> VerifyResult<()> {
        if self.kernel.ipset_entries(set).iter().any(|e| e == entry) {
            return Err(VerificationError::UnexpectedIpsetEntry {
                set: set.to_string(),
                entry: entry.to_string(),
            });
        }
        Ok(())
    }

    /// `id` as displayed, e.g. `TCP:10.0.0.5:80`
    pub fn assert_virtual_server(&self, id: &str) -> VerifyResult<()> {
        if self.kernel.virtual_server(id).is_none() {
            return Err(VerificationError::MissingVirtualServer { id: id.to_string() });
        }
        Ok(())
    }

    pub fn assert_no_virtual_server(&self, id: &str) -> VerifyResult<()> {
        if self.kernel.virtual_server(id).is_some() {
            return Err(VerificationError::UnexpectedVirtualServer { id: id.to_string() });
        }
        Ok(())
    }

    /// Verify the exact backends of a virtual server, as `addr:port`
    pub fn assert_real_servers(&self, id: &str, expected: &[&str]) -> VerifyResult<()> {
        let mut actual: Vec<String> = self
            .kernel
            .real_servers_of(id)
            .iter()
            .map(|rs| rs.socket_addr().to_string())
            .collect();
        actual.sort();
        let mut expected: Vec<String> = expected.iter().map(|s| s.to_string()).collect();
        expected.sort();

        if actual != expected {
            return Err(VerificationError::RealServerMismatch {
                id: id.to_string(),
                expected,
                actual,
            });
        }
        Ok(())
    }

    pub fn assert_bound(&self, ip: IpAddr) -> VerifyResult<()> {
        self.check_address(ip, true)
    }

    pub fn assert_unbound(&self, ip: IpAddr) -> VerifyResult<()> {
        self.check_address(ip, false)
    }

    fn check_address(&self, ip: IpAddr, expected: bool) -> VerifyResult<()> {
        if self.kernel.has_address(&self.link, &ip) != expected {
            return Err(VerificationError::AddressMismatch {
                link: self.link.clone(),
                ip,
                expected,
            });
        }
        Ok(())
    }
}

/// Everything the engine programs, in a comparable form
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KernelSnapshot {
    pub ipsets: BTreeMap<String, Vec<String>>,
    pub virtual_servers: Vec<String>,
    pub real_servers: Vec<String>,
    pub addresses: Vec<IpAddr>,
}

impl KernelSnapshot {
    pub fn capture(kernel: &DryRunKernel, link: &str) -> Self {
        let ipsets = [KUBE_CLUSTER_IP, KUBE_LOOP_BACK, KUBE_6_CLUSTER_IP, KUBE_6_LOOP_BACK]
            .into_iter()
            .map(|name| (name.to_string(), kernel.ipset_entries(name)))
            .collect();
        let mut real_servers: Vec<String> = kernel.real_servers().map(ToString::to_string).collect();
        real_servers.sort();

        Self {
            ipsets,
            virtual_servers: kernel.virtual_servers().map(ToString::to_string).collect(),
            real_servers,
            addresses: kernel.addresses(link),
        }
    }

    /// True if nothing beyond the empty sets is programmed
    pub fn is_empty(&self) -> bool {
        self.ipsets.values().all(Vec::is_empty)
            && self.virtual_servers.is_empty()
            && self.real_servers.is_empty()
            && self.addresses.is_empty()
    }
}
