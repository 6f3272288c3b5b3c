//! Test fixtures for watch objects and events
//!
//! Raw objects are built the way the API server would send them, so tests
//! exercise the same conversion path as a running agent.

use kube2store::{
    EndpointConditions, EndpointSliceObject, IntOrString, KubeEvent, ObjectMeta, Resource,
    ServiceObject, ServicePort, ServiceSpec, SliceEndpoint, WatchEvent, SERVICE_NAME_LABEL, SERVICE_PROXY_NAME_LABEL,
};
use serde_json::json;

/// Builder for a raw service object
#[derive(Debug, Clone)]
pub struct ServiceBuilder {
    obj: ServiceObject,
}

impl ServiceBuilder {
    pub fn new(namespace: &str, name: &str) -> Self {
        let obj = ServiceObject {
            metadata: ObjectMeta {
                namespace: namespace.to_string(),
                name: name.to_string(),
                ..Default::default()
            },
            spec: ServiceSpec {
                service_type: "ClusterIP".to_string(),
                ..Default::default()
            },
        };
        Self { obj }
    }

    /// Add a cluster IP; the first one also fills `clusterIP`
    pub fn cluster_ip(mut self, ip: &str) -> Self {
        if self.obj.spec.cluster_ips.is_empty() {
            self.obj.spec.cluster_ip = ip.to_string();
        }
        self.obj.spec.cluster_ips.push(ip.to_string());
        self
    }

    /// Mark the service headless
    pub fn headless(mut self) -> Self {
        self.obj.spec.cluster_ip = "None".to_string();
        self.obj.spec.cluster_ips.clear();
        self
    }

    pub fn external_ip(mut self, ip: &str) -> Self {
        self.obj.spec.external_ips.push(ip.to_string());
        self
    }

    /// Add a port; a zero target port is left unset
    pub fn port(mut self, protocol: &str, port: u16, target_port: u16) -> Self {
        self.obj.spec.ports.push(ServicePort {
            name: format!("{}-{}", protocol.to_ascii_lowercase(), port),
            protocol: protocol.to_string(),
            port,
            target_port: (target_port > 0).then_some(IntOrString::Int(target_port)),
            node_port: 0,
        });
        self
    }

    pub fn service_type(mut self, service_type: &str) -> Self {
        self.obj.spec.service_type = service_type.to_string();
        self
    }

    pub fn proxy_name(self, name: &str) -> Self {
        self.label(SERVICE_PROXY_NAME_LABEL, name)
    }

    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.obj.metadata.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn build(self) -> ServiceObject {
        self.obj
    }
}

/// Builder for a raw endpoint slice
#[derive(Debug, Clone)]
pub struct SliceBuilder {
    obj: EndpointSliceObject,
}

impl SliceBuilder {
    /// A slice labelled as feeding `service`
    pub fn new(namespace: &str, name: &str, service: &str) -> Self {
        let obj = EndpointSliceObject {
            metadata: ObjectMeta {
                namespace: namespace.to_string(),
                name: name.to_string(),
                labels: [(SERVICE_NAME_LABEL.to_string(), service.to_string())].into(),
            },
            address_type: "IPv4".to_string(),
            endpoints: Vec::new(),
        };
        Self { obj }
    }

    /// Add one ready endpoint
    pub fn endpoint(self, address: &str) -> Self {
        self.endpoint_with(&[address], true)
    }

    pub fn endpoint_with(mut self, addresses: &[&str], ready: bool) -> Self {
        self.obj.endpoints.push(SliceEndpoint {
            addresses: addresses.iter().map(|a| a.to_string()).collect(),
            conditions: EndpointConditions { ready: Some(ready) },
            ..Default::default()
        });
        self
    }

    pub fn without_service_label(mut self) -> Self {
        self.obj.metadata.labels.remove(SERVICE_NAME_LABEL);
        self
    }

    pub fn build(self) -> EndpointSliceObject {
        self.obj
    }
}

/// Watch event constructors
pub mod events {
    use super::*;

    pub fn service_added(obj: ServiceObject) -> KubeEvent {
        KubeEvent::Service(WatchEvent::Added(obj))
    }

    pub fn service_updated(old: ServiceObject, new: ServiceObject) -> KubeEvent {
        KubeEvent::Service(WatchEvent::Updated { old, new })
    }

    pub fn service_deleted(obj: ServiceObject) -> KubeEvent {
        KubeEvent::Service(WatchEvent::Deleted(obj))
    }

    pub fn slice_added(obj: EndpointSliceObject) -> KubeEvent {
        KubeEvent::EndpointSlice(WatchEvent::Added(obj))
    }

    pub fn slice_updated(old: EndpointSliceObject, new: EndpointSliceObject) -> KubeEvent {
        KubeEvent::EndpointSlice(WatchEvent::Updated { old, new })
    }

    pub fn slice_deleted(obj: EndpointSliceObject) -> KubeEvent {
        KubeEvent::EndpointSlice(WatchEvent::Deleted(obj))
    }

    /// Both initial listings complete
    pub fn synced() -> [KubeEvent; 2] {
        [
            KubeEvent::Synced(Resource::Service),
            KubeEvent::Synced(Resource::EndpointSlice),
        ]
    }
}

/// Encode an event as one JSON-lines watch record
pub fn watch_record(event: &KubeEvent) -> String {
    fn record<T: serde::Serialize>(resource: &str, event: &WatchEvent<T>) -> serde_json::Value {
        match event {
            WatchEvent::Added(obj) => json!({"resource": resource, "event": "added", "object": obj}),
            WatchEvent::Updated { old, new } => {
                json!({"resource": resource, "event": "updated", "old": old, "new": new})
            }
            WatchEvent::Deleted(obj) => json!({"resource": resource, "event": "deleted", "object": obj}),
        }
    }

    let value = match event {
        KubeEvent::Service(event) => record("service", event),
        KubeEvent::EndpointSlice(event) => record("endpointSlice", event),
        KubeEvent::Synced(Resource::Service) => json!({"resource": "service", "event": "synced"}),
        KubeEvent::Synced(Resource::EndpointSlice) => json!({"resource": "endpointSlice", "event": "synced"}),
    };
    value.to_string()
}

/// The single-service, single-endpoint setup used across tests:
/// `ns/svc1` on `10.0.0.5:80/TCP` targeting 8080, backed by `10.1.2.3`.
pub mod scenario {
    use super::*;

    pub fn svc1() -> ServiceObject {
        ServiceBuilder::new("ns", "svc1")
            .cluster_ip("10.0.0.5")
            .port("TCP", 80, 8080)
            .build()
    }

    pub fn svc1_slice() -> EndpointSliceObject {
        SliceBuilder::new("ns", "svc1-abcde", "svc1").endpoint("10.1.2.3").build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube2store::{decode_record, service_from_object};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_service_builder_converts() {
        let svc = service_from_object(&scenario::svc1()).unwrap();
        assert_eq!(svc.key().to_string(), "ns/svc1");
        assert_eq!(svc.ports.len(), 1);
        assert_eq!(svc.ports[0].target_port, 8080);
    }

    #[test]
    fn test_watch_record_decodes() {
        let event = events::slice_added(scenario::svc1_slice());
        let decoded = decode_record(&watch_record(&event), 1).unwrap();
        assert_eq!(decoded, event);
    }
}
