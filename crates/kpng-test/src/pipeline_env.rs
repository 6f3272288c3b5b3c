//! In-process pipeline: ingestion, store, diff job and IPVS engine over an
//! in-memory kernel.

use anyhow::{bail, Context, Result};
use ipvs_sink::{Backend, DryRunKernel, IpvsConfig};
use kpng_sync_common::Sink;
use kube2store::{Ingest, IngestConfig, KubeEvent};
use proxystore::{LocalDiffJob, Store, StoreConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// How long [`PipelineEnv::settle`] waits for another generation.
const SETTLE_WAIT: Duration = Duration::from_millis(50);

/// Bound on generations applied by one settle.
const MAX_STEPS: usize = 64;

/// Events go in through [`PipelineEnv::handle`]; nothing reaches the kernel
/// until [`PipelineEnv::settle`] drains the generations they produced.
pub struct PipelineEnv {
    store: Arc<Store>,
    ingest: Ingest,
    job: LocalDiffJob<Backend<DryRunKernel>>,
}

impl PipelineEnv {
    /// Start with default configuration
    pub async fn start() -> Result<Self> {
        Self::with_config(StoreConfig::default(), IngestConfig::default(), IpvsConfig::default()).await
    }

    /// Start with explicit configuration; the sink is set up and its setup
    /// operations discarded
    pub async fn with_config(store: StoreConfig, ingest: IngestConfig, ipvs: IpvsConfig) -> Result<Self> {
        let retry_backoff = store.retry_backoff();
        let store = Arc::new(Store::new(&store));
        let ingest = Ingest::new(&store, &ingest);

        let mut job = LocalDiffJob::new(&store, Backend::new(ipvs, DryRunKernel::quiet()), retry_backoff);
        job.sink_mut().setup().await.context("sink setup failed")?;
        job.sink_mut().kernel_mut().take_ops();

        Ok(Self { store, ingest, job })
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Apply one watch event to the store
    pub fn handle(&mut self, event: KubeEvent) -> Result<()> {
        self.ingest
            .handle(&event)
            .with_context(|| format!("ingestion of {:?} event failed", event.resource()))
    }

    pub fn handle_all(&mut self, events: impl IntoIterator<Item = KubeEvent>) -> Result<()> {
        events.into_iter().try_for_each(|event| self.handle(event))
    }

    /// Mark both watches synced
    pub fn mark_synced(&mut self) -> Result<()> {
        self.handle_all(crate::fixtures::events::synced())
    }

    /// Apply every pending generation to the engine; returns how many
    /// were acknowledged
    pub async fn settle(&mut self) -> Result<usize> {
        let mut applied = 0;
        for _ in 0..MAX_STEPS {
            match timeout(SETTLE_WAIT, self.job.step()).await {
                Err(_) => {
                    debug!(applied, generation = self.store.generation(), "pipeline settled");
                    return Ok(applied);
                }
                Ok(step) => {
                    if step.context("sink failed")?.is_some() {
                        applied += 1;
                    }
                }
            }
        }
        bail!("pipeline did not settle after {} steps", MAX_STEPS)
    }

    /// Handle `events`, then settle
    pub async fn apply(&mut self, events: impl IntoIterator<Item = KubeEvent>) -> Result<usize> {
        self.handle_all(events)?;
        self.settle().await
    }

    pub fn backend(&self) -> &Backend<DryRunKernel> {
        self.job.sink()
    }

    pub fn kernel(&self) -> &DryRunKernel {
        self.job.sink().kernel()
    }

    pub fn kernel_mut(&mut self) -> &mut DryRunKernel {
        self.job.sink_mut().kernel_mut()
    }
}
