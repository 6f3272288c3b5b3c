//! IPVS sink configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpvsConfig {
    /// IPVS scheduler for every virtual server (`rr`, `wrr`, `lc`, ...).
    #[serde(default = "default_scheduling_method")]
    pub scheduling_method: String,

    /// Dummy interface service addresses are bound to.
    #[serde(default = "default_dummy_interface")]
    pub dummy_interface: String,

    /// Use NAT (masquerade) forwarding for real servers.
    #[serde(default = "default_masquerade")]
    pub masquerade: bool,

    /// Weight of every real server.
    #[serde(default = "default_weight")]
    pub weight: u16,
}

fn default_scheduling_method() -> String {
    "rr".to_string()
}

fn default_dummy_interface() -> String {
    "kube-ipvs0".to_string()
}

fn default_masquerade() -> bool {
    true
}

fn default_weight() -> u16 {
    1
}

impl Default for IpvsConfig {
    fn default() -> Self {
        Self {
            scheduling_method: default_scheduling_method(),
            dummy_interface: default_dummy_interface(),
            masquerade: default_masquerade(),
            weight: default_weight(),
        }
    }
}
