//! Endpoint model.

use crate::{IpFamily, IpSet, ServiceKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

/// Identity of an endpoint batch: the service it feeds and the
/// publishing object (the "source") it came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceKey {
    pub namespace: String,
    pub service_name: String,
    pub source_name: String,
}

impl SourceKey {
    pub fn new(
        namespace: impl Into<String>,
        service_name: impl Into<String>,
        source_name: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            service_name: service_name.into(),
            source_name: source_name.into(),
        }
    }

    pub fn service_key(&self) -> ServiceKey {
        ServiceKey::new(&self.namespace, &self.service_name)
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.namespace, self.service_name, self.source_name
        )
    }
}

/// One backend of a service, as published by a source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointInfo {
    pub namespace: String,
    pub service_name: String,
    pub source_name: String,
    #[serde(default)]
    pub ips: IpSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default)]
    pub ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub topology: BTreeMap<String, String>,
}

impl EndpointInfo {
    pub fn new(source: &SourceKey) -> Self {
        Self {
            namespace: source.namespace.clone(),
            service_name: source.service_name.clone(),
            source_name: source.source_name.clone(),
            ips: IpSet::new(),
            hostname: None,
            ready: false,
            node_name: None,
            topology: BTreeMap::new(),
        }
    }

    pub fn source_key(&self) -> SourceKey {
        SourceKey::new(&self.namespace, &self.service_name, &self.source_name)
    }

    /// Addresses of this endpoint in `family`.
    pub fn ips_of(&self, family: IpFamily) -> &[IpAddr] {
        self.ips.family(family)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_source_key() {
        let source = SourceKey::new("ns", "svc1", "svc1-abcde");
        assert_eq!(source.to_string(), "ns/svc1/svc1-abcde");
        assert_eq!(source.service_key(), ServiceKey::new("ns", "svc1"));
    }

    #[test]
    fn test_endpoint_info_new() {
        let source = SourceKey::new("ns", "svc1", "svc1-abcde");
        let mut ep = EndpointInfo::new(&source);
        ep.ips.insert("10.1.2.3".parse().unwrap());
        ep.ips.insert("fd00::3".parse().unwrap());

        assert_eq!(ep.source_key(), source);
        assert!(!ep.ready);
        assert_eq!(ep.ips_of(IpFamily::V4).len(), 1);
        assert_eq!(ep.ips_of(IpFamily::V6).len(), 1);
    }
}
