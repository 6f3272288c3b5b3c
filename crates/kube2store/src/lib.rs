//! Watch events to proxy store.
//!
//! Raw service and endpoint-slice objects arrive as [`KubeEvent`]s, decoded
//! once at the watch boundary (see [`JsonLinesSource`]). The [`Job`] routes
//! each event to the handler for its resource; handlers translate objects
//! into store rows inside a single transaction and mark the entity kind
//! synced once the watch reports its initial listing complete.

mod error;
mod event;
mod handler;
mod job;
mod objects;
mod service;
mod slice;
mod source;

pub use error::{IngestError, Result};
pub use event::{KubeEvent, Resource, WatchEvent};
pub use handler::{dispatch, EventHandler, HasSynced, SyncFlag, SyncTracker};
pub use job::{Ingest, IngestConfig, Job};
pub use objects::{
    EndpointConditions, EndpointSliceObject, IntOrString, ObjectMeta, ServiceObject, ServicePort,
    ServiceSpec, SliceEndpoint,
};
pub use service::{service_from_object, ServiceEventHandler, SERVICE_PROXY_NAME_LABEL};
pub use slice::{endpoints_from_slice, service_name_of, SliceEventHandler, HOSTNAME_LABEL, SERVICE_NAME_LABEL};
pub use source::{decode_record, JsonLinesSource};
