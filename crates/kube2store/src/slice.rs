//! Endpoint-slice watch handler.

use crate::handler::{EventHandler, HasSynced, SyncTracker};
use crate::objects::EndpointSliceObject;
use crate::Result;
use kpng_types::{EndpointInfo, SourceKey};
use proxystore::{Set, Store};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, warn, Level};

pub const SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";
pub const HOSTNAME_LABEL: &str = "kubernetes.io/hostname";

/// Name of the service a slice feeds, if it has a non-empty label.
pub fn service_name_of(slice: &EndpointSliceObject) -> Option<&str> {
    slice
        .metadata
        .label(SERVICE_NAME_LABEL)
        .filter(|name| !name.is_empty())
}

/// Builds the full endpoint list of a slice.
pub fn endpoints_from_slice(slice: &EndpointSliceObject, service_name: &str) -> Vec<EndpointInfo> {
    let source = SourceKey::new(&slice.metadata.namespace, service_name, &slice.metadata.name);

    slice
        .endpoints
        .iter()
        .map(|endpoint| {
            let mut info = EndpointInfo::new(&source);
            info.topology = endpoint.topology.clone();
            info.node_name = endpoint
                .node_name
                .clone()
                .or_else(|| endpoint.topology.get(HOSTNAME_LABEL).cloned());
            info.hostname = endpoint.hostname.clone();
            info.ready = endpoint.conditions.ready == Some(true);

            for addr in &endpoint.addresses {
                match addr.parse::<IpAddr>() {
                    Ok(ip) => {
                        info.ips.insert(ip);
                    }
                    Err(_) => warn!(source = %source, address = %addr, "skipping invalid endpoint address"),
                }
            }
            info
        })
        .collect()
}

pub struct SliceEventHandler {
    store: Arc<Store>,
    sync: SyncTracker,
}

impl SliceEventHandler {
    pub fn new(store: Arc<Store>, synced: Arc<dyn HasSynced>) -> Self {
        Self {
            store,
            sync: SyncTracker::new(Set::Endpoints, synced),
        }
    }

    fn delete(&mut self, slice: &EndpointSliceObject) {
        let meta = &slice.metadata;
        let sync = &mut self.sync;
        self.store.update(|tx| {
            tx.del_endpoints_of_source(&meta.namespace, &meta.name);
            sync.update_sync(tx);
        });
    }
}

impl EventHandler<EndpointSliceObject> for SliceEventHandler {
    fn on_add(&mut self, slice: &EndpointSliceObject) -> Result<()> {
        let meta = &slice.metadata;
        let Some(service_name) = service_name_of(slice) else {
            debug!(namespace = %meta.namespace, name = %meta.name, "slice has no service, ignoring");
            return Ok(());
        };

        let infos = endpoints_from_slice(slice, service_name);
        let sync = &mut self.sync;
        self.store.update(|tx| {
            tx.set_endpoints_of_source(&meta.namespace, service_name, &meta.name, infos);
            sync.update_sync(tx);

            if tracing::enabled!(Level::DEBUG) {
                debug!("endpoints of {}/{}:", meta.namespace, service_name);
                tx.each_endpoint_of_service(&meta.namespace, service_name, |ep| {
                    debug!("- {:?} | topo: {:?}", ep.ips, ep.topology);
                });
            }
        });
        Ok(())
    }

    fn on_update(&mut self, _old: &EndpointSliceObject, new: &EndpointSliceObject) -> Result<()> {
        if service_name_of(new).is_none() {
            // lost its service label: what it published no longer applies
            self.delete(new);
            return Ok(());
        }
        self.on_add(new)
    }

    fn on_delete(&mut self, slice: &EndpointSliceObject) -> Result<()> {
        self.delete(slice);
        Ok(())
    }

    fn on_synced(&mut self) {
        let sync = &mut self.sync;
        self.store.update(|tx| sync.update_sync(tx));
    }
}
