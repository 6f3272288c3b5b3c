//! Common kpng types for the service proxy control plane.
//!
//! This crate provides the data model shared by the store, the ingestion
//! adapter and every sink:
//!
//! - [`Service`]: a logical service with its cluster/external IPs and ports
//! - [`EndpointInfo`]: one backend record published by an endpoint source
//! - [`IpSet`]: an ordered, family-partitioned set of addresses
//! - [`IpPrefix`]: an IP network prefix (CIDR notation)
//! - [`IpFamily`]: IPv4 or IPv6

mod endpoint;
mod ip;
mod service;

pub use endpoint::{EndpointInfo, SourceKey};
pub use ip::{IpFamily, IpPrefix, IpSet};
pub use service::{PortMapping, Protocol, Service, ServiceIps, ServiceKey, ServiceType};

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid IP address format: {0}")]
    InvalidIpAddress(String),

    #[error("invalid IP prefix format: {0}")]
    InvalidIpPrefix(String),

    #[error("invalid protocol: {0}")]
    InvalidProtocol(String),

    #[error("invalid service type: {0}")]
    InvalidServiceType(String),
}
