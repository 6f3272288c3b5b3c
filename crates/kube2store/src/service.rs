//! Service watch handler.

use crate::handler::{EventHandler, HasSynced, SyncTracker};
use crate::objects::{IntOrString, ServiceObject, ServicePort};
use crate::{IngestError, Result};
use kpng_types::{PortMapping, Protocol, Service, ServiceType};
use proxystore::{Set, Store};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Services carrying this label are only handled by the proxy it names.
pub const SERVICE_PROXY_NAME_LABEL: &str = "service.kubernetes.io/service-proxy-name";

fn is_unset_cluster_ip(value: &str) -> bool {
    value.is_empty() || value == "None"
}

fn port_from_object(svc_key: &str, port: &ServicePort) -> Option<PortMapping> {
    let protocol = if port.protocol.is_empty() {
        Protocol::Tcp
    } else {
        match port.protocol.parse::<Protocol>() {
            Ok(p) => p,
            Err(e) => {
                warn!(service = svc_key, port = port.port, error = %e, "skipping port");
                return None;
            }
        }
    };

    let target_port = match &port.target_port {
        None => 0,
        Some(IntOrString::Int(n)) => *n,
        Some(IntOrString::String(s)) => s.parse().unwrap_or_else(|_| {
            debug!(service = svc_key, target_port = %s, "named target port, using service port");
            0
        }),
    };

    Some(PortMapping {
        name: port.name.clone(),
        protocol,
        port: port.port,
        target_port,
        node_port: port.node_port,
    })
}

/// Converts a raw service into the store model.
///
/// # Errors
///
/// Returns [`IngestError::InvalidClusterIp`] for a cluster IP that is not
/// empty, `None`, or an address. Bad external IPs and ports are skipped.
pub fn service_from_object(obj: &ServiceObject) -> Result<Service> {
    let meta = &obj.metadata;
    let mut svc = Service::new(&meta.namespace, &meta.name);
    let key = svc.key().to_string();

    svc.service_type = obj.spec.service_type.parse().unwrap_or_else(|_| {
        warn!(service = %key, service_type = %obj.spec.service_type, "unknown service type");
        ServiceType::ClusterIp
    });

    let cluster_ips: Vec<&str> = if obj.spec.cluster_ips.is_empty() {
        vec![obj.spec.cluster_ip.as_str()]
    } else {
        obj.spec.cluster_ips.iter().map(String::as_str).collect()
    };
    for raw in cluster_ips {
        let raw = raw.trim();
        if is_unset_cluster_ip(raw) {
            continue;
        }
        let ip: IpAddr = raw.parse().map_err(|_| IngestError::InvalidClusterIp {
            service: key.clone(),
            value: raw.to_string(),
        })?;
        svc.ips.cluster_ips.insert(ip);
    }

    for raw in &obj.spec.external_ips {
        match raw.trim().parse::<IpAddr>() {
            Ok(ip) => {
                svc.ips.external_ips.insert(ip);
            }
            Err(_) => warn!(service = %key, external_ip = %raw, "skipping invalid external IP"),
        }
    }

    svc.ports = obj
        .spec
        .ports
        .iter()
        .filter_map(|p| port_from_object(&key, p))
        .collect();

    Ok(svc)
}

pub struct ServiceEventHandler {
    store: Arc<Store>,
    sync: SyncTracker,
    service_proxy_name: Option<String>,
}

impl ServiceEventHandler {
    pub fn new(
        store: Arc<Store>,
        synced: Arc<dyn HasSynced>,
        service_proxy_name: Option<String>,
    ) -> Self {
        Self {
            store,
            sync: SyncTracker::new(Set::Services, synced),
            service_proxy_name,
        }
    }

    fn is_proxied(&self, obj: &ServiceObject) -> bool {
        match obj.metadata.label(SERVICE_PROXY_NAME_LABEL) {
            None => true,
            Some(name) => self.service_proxy_name.as_deref() == Some(name),
        }
    }

    fn delete(&mut self, obj: &ServiceObject) {
        let meta = &obj.metadata;
        let sync = &mut self.sync;
        self.store.update(|tx| {
            tx.del_service(&meta.namespace, &meta.name);
            sync.update_sync(tx);
        });
    }
}

impl EventHandler<ServiceObject> for ServiceEventHandler {
    fn on_add(&mut self, obj: &ServiceObject) -> Result<()> {
        if !self.is_proxied(obj) {
            debug!(
                namespace = %obj.metadata.namespace,
                name = %obj.metadata.name,
                "service handled by another proxy"
            );
            // it may have been proxied before a label change
            self.delete(obj);
            return Ok(());
        }

        let svc = service_from_object(obj)?;
        let sync = &mut self.sync;
        self.store.update(|tx| {
            tx.set_service(svc);
            sync.update_sync(tx);
        });
        Ok(())
    }

    fn on_update(&mut self, _old: &ServiceObject, new: &ServiceObject) -> Result<()> {
        self.on_add(new)
    }

    fn on_delete(&mut self, obj: &ServiceObject) -> Result<()> {
        self.delete(obj);
        Ok(())
    }

    fn on_synced(&mut self) {
        let sync = &mut self.sync;
        self.store.update(|tx| sync.update_sync(tx));
    }
}
