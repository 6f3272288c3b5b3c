//! Raw watch payloads.
//!
//! Only the fields the proxy consumes are modelled; everything else in the
//! API objects is ignored on decode.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl ObjectMeta {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

/// A port number or a named port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IntOrString {
    Int(u16),
    String(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePort {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub protocol: String,
    pub port: u16,
    #[serde(default)]
    pub target_port: Option<IntOrString>,
    #[serde(default)]
    pub node_port: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    #[serde(rename = "type", default)]
    pub service_type: String,
    #[serde(rename = "clusterIP", default)]
    pub cluster_ip: String,
    #[serde(rename = "clusterIPs", default)]
    pub cluster_ips: Vec<String>,
    #[serde(rename = "externalIPs", default)]
    pub external_ips: Vec<String>,
    #[serde(default)]
    pub ports: Vec<ServicePort>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceObject {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ServiceSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConditions {
    #[serde(default)]
    pub ready: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SliceEndpoint {
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default)]
    pub conditions: EndpointConditions,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub node_name: Option<String>,
    #[serde(default)]
    pub topology: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSliceObject {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub address_type: String,
    #[serde(default)]
    pub endpoints: Vec<SliceEndpoint>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_decode_service() {
        let json = r#"{
            "metadata": {"namespace": "ns", "name": "svc1", "uid": "ignored"},
            "spec": {
                "type": "ClusterIP",
                "clusterIP": "10.0.0.5",
                "clusterIPs": ["10.0.0.5", "fd00::5"],
                "ports": [
                    {"name": "http", "protocol": "TCP", "port": 80, "targetPort": 8080},
                    {"protocol": "UDP", "port": 53, "targetPort": "dns"}
                ]
            }
        }"#;
        let svc: ServiceObject = serde_json::from_str(json).unwrap();
        assert_eq!(svc.metadata.name, "svc1");
        assert_eq!(svc.spec.cluster_ips.len(), 2);
        assert_eq!(svc.spec.ports[0].target_port, Some(IntOrString::Int(8080)));
        assert_eq!(
            svc.spec.ports[1].target_port,
            Some(IntOrString::String("dns".into()))
        );
    }

    #[test]
    fn test_decode_slice() {
        let json = r#"{
            "metadata": {
                "namespace": "ns",
                "name": "svc1-abcde",
                "labels": {"kubernetes.io/service-name": "svc1"}
            },
            "addressType": "IPv4",
            "endpoints": [
                {"addresses": ["10.1.2.3"], "conditions": {"ready": true},
                 "topology": {"kubernetes.io/hostname": "node-1"}}
            ]
        }"#;
        let slice: EndpointSliceObject = serde_json::from_str(json).unwrap();
        assert_eq!(slice.metadata.label("kubernetes.io/service-name"), Some("svc1"));
        assert_eq!(slice.endpoints[0].conditions.ready, Some(true));
        assert_eq!(slice.endpoints[0].hostname, None);
    }
}
