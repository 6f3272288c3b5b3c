//! Virtual and real server records.

use kpng_types::{PortMapping, Protocol, ServiceKey, ServiceType};
use serde::Serialize;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// `ns/name/10.0.0.5/80-TCP`
pub fn lb_key(service: &ServiceKey, ip: &IpAddr, port: &PortMapping) -> String {
    format!("{}/{}/{}", service, ip, port.suffix())
}

/// `ns/name/10.0.0.5/80-TCP/10.1.2.3:8080`, `ns/name/fd00::5/80-TCP/[fd00::1:2]:8080`
///
/// The kernel identifies a destination by its address and port, so both
/// are part of the key: a target port change is a delete plus an add.
pub fn real_server_key(lb_key: &str, endpoint_ip: &IpAddr, target_port: u16) -> String {
    format!("{}/{}", lb_key, SocketAddr::new(*endpoint_ip, target_port))
}

/// One (service address, port) pair the engine load-balances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpvsLb {
    pub ip: IpAddr,
    pub service_key: ServiceKey,
    pub port: PortMapping,
    /// IPVS scheduler name, e.g. `rr`.
    pub scheduling_method: String,
    pub service_type: ServiceType,
}

impl IpvsLb {
    /// Key of this pair in the virtual-server table; see [`lb_key`].
    pub fn key(&self) -> String {
        lb_key(&self.service_key, &self.ip, &self.port)
    }

    /// The kernel service this pair programs.
    pub fn virtual_server(&self) -> VirtualServer {
        VirtualServer {
            address: self.ip,
            port: self.port.port,
            protocol: self.port.protocol,
            scheduler: self.scheduling_method.clone(),
        }
    }
}

/// Kernel identity and settings of an IPVS service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct VirtualServer {
    pub address: IpAddr,
    pub port: u16,
    pub protocol: Protocol,
    pub scheduler: String,
}

impl VirtualServer {
    /// Address and port clients connect to.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    /// Whether both identify one kernel service. The scheduler is not part of
    /// the identity.
    pub fn same_service(&self, other: &VirtualServer) -> bool {
        self.address == other.address && self.port == other.port && self.protocol == other.protocol
    }
}

/// `TCP:10.0.0.5:80`, `TCP:[fd00::5]:80`
impl fmt::Display for VirtualServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.protocol, self.socket_addr())
    }
}

/// A backend of a virtual server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RealServer {
    pub virtual_server: VirtualServer,
    pub address: IpAddr,
    pub port: u16,
    pub weight: u16,
    /// NAT forwarding (`-m`) rather than direct routing.
    pub masquerade: bool,
}

impl RealServer {
    /// Address and port traffic is forwarded to.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    /// Whether both identify one kernel destination: the same virtual server
    /// and the same forwarding address and port.
    pub fn same_destination(&self, other: &RealServer) -> bool {
        self.virtual_server.same_service(&other.virtual_server) && self.socket_addr() == other.socket_addr()
    }
}

impl fmt::Display for RealServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.virtual_server, self.socket_addr())
    }
}
