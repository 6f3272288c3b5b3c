//! Tagged watch events.

use crate::objects::{EndpointSliceObject, ServiceObject};
use proxystore::Set;
use serde::{Deserialize, Serialize};

/// One watch callback with its concrete payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent<T> {
    Added(T),
    Updated { old: T, new: T },
    Deleted(T),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Resource {
    Service,
    EndpointSlice,
}

impl Resource {
    /// Store entity kind fed by this resource.
    pub fn set(self) -> Set {
        match self {
            Resource::Service => Set::Services,
            Resource::EndpointSlice => Set::Endpoints,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KubeEvent {
    Service(WatchEvent<ServiceObject>),
    EndpointSlice(WatchEvent<EndpointSliceObject>),
    /// The watch for this resource finished its initial listing.
    Synced(Resource),
}

impl KubeEvent {
    pub fn resource(&self) -> Resource {
        match self {
            KubeEvent::Service(_) => Resource::Service,
            KubeEvent::EndpointSlice(_) => Resource::EndpointSlice,
            KubeEvent::Synced(resource) => *resource,
        }
    }
}
