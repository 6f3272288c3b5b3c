//! Ingestion job: routes watch events to their handlers.

use crate::event::{KubeEvent, Resource};
use crate::handler::{dispatch, EventHandler, SyncFlag};
use crate::service::ServiceEventHandler;
use crate::slice::SliceEventHandler;
use crate::Result;
use proxystore::Store;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Capacity of the channel between the watch source and the handlers.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Name this proxy answers to in the service-proxy-name label.
    #[serde(default)]
    pub service_proxy_name: Option<String>,
}

fn default_channel_capacity() -> usize {
    1024
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            service_proxy_name: None,
        }
    }
}

/// Both resource handlers with the synced flags of their watches.
pub struct Ingest {
    services: ServiceEventHandler,
    slices: SliceEventHandler,
    services_synced: Arc<SyncFlag>,
    slices_synced: Arc<SyncFlag>,
}

impl Ingest {
    pub fn new(store: &Arc<Store>, config: &IngestConfig) -> Self {
        let services_synced = Arc::new(SyncFlag::default());
        let slices_synced = Arc::new(SyncFlag::default());
        Self {
            services: ServiceEventHandler::new(
                store.clone(),
                services_synced.clone(),
                config.service_proxy_name.clone(),
            ),
            slices: SliceEventHandler::new(store.clone(), slices_synced.clone()),
            services_synced,
            slices_synced,
        }
    }

    /// Applies one event to the store.
    ///
    /// # Errors
    ///
    /// Returns the handler's error; every error a handler returns is fatal.
    pub fn handle(&mut self, event: &KubeEvent) -> Result<()> {
        match event {
            KubeEvent::Service(event) => dispatch(&mut self.services, event),
            KubeEvent::EndpointSlice(event) => dispatch(&mut self.slices, event),
            KubeEvent::Synced(Resource::Service) => {
                self.services_synced.mark();
                self.services.on_synced();
                Ok(())
            }
            KubeEvent::Synced(Resource::EndpointSlice) => {
                self.slices_synced.mark();
                self.slices.on_synced();
                Ok(())
            }
        }
    }
}

/// Feeds a store from a stream of watch events.
pub struct Job {
    store: Arc<Store>,
    config: IngestConfig,
}

impl Job {
    pub fn new(store: Arc<Store>, config: IngestConfig) -> Self {
        Self { store, config }
    }

    /// Handles events until the channel closes or `cancel` fires. A
    /// transaction in progress always completes.
    ///
    /// # Errors
    ///
    /// Returns the first fatal ingestion error.
    pub async fn run(self, mut events: mpsc::Receiver<KubeEvent>, cancel: CancellationToken) -> Result<()> {
        let mut ingest = Ingest::new(&self.store, &self.config);
        let mut handled = 0u64;

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            let Some(event) = event else {
                info!(handled, "watch events exhausted");
                break;
            };

            if let Err(e) = ingest.handle(&event) {
                error!(error = %e, resource = ?event.resource(), "ingestion failed");
                return Err(e);
            }
            handled += 1;
        }

        Ok(())
    }
}
