//! Agent wiring.

use crate::config::KpngConfig;
use anyhow::{Context, Result};
use ipvs_sink::{Backend, DryRunKernel, ShellKernel};
use kpng_sync_common::Sink;
use kube2store::{JsonLinesSource, Job};
use proxystore::{LocalDiffJob, Store};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Path of the JSON-lines event stream, `-` for stdin.
    pub events: String,
    pub dry_run: bool,
}

/// Runs the agent with the IPVS sink until `cancel` fires or something
/// fails fatally.
pub async fn run(options: &RunOptions, config: KpngConfig, cancel: CancellationToken) -> Result<()> {
    if options.dry_run {
        let backend = Backend::new(config.ipvs.clone(), DryRunKernel::new());
        let backend = run_with_backend(options, config, backend, cancel).await?;
        let stats = backend.stats();
        info!(
            syncs = stats.syncs,
            kernel_ops = stats.kernel_ops,
            virtual_servers = backend.lb_keys().len(),
            real_servers = backend.real_server_keys().len(),
            "dry run finished"
        );
    } else {
        let backend = Backend::new(config.ipvs.clone(), ShellKernel::new());
        run_with_backend(options, config, backend, cancel).await?;
    }
    Ok(())
}

/// Runs the pipeline into `sink` and hands the sink back once stopped.
///
/// # Errors
///
/// Returns the first fatal error of the sink, the ingestion job or the
/// watch source. Any of them stops the others.
pub async fn run_with_backend<S: Sink>(
    options: &RunOptions,
    config: KpngConfig,
    sink: S,
    cancel: CancellationToken,
) -> Result<S> {
    let store = Arc::new(Store::new(&config.store));
    let source = JsonLinesSource::open(&options.events)
        .await
        .context("failed to open watch events")?;
    let (tx, rx) = mpsc::channel(config.ingest.channel_capacity);

    let source_task = tokio::spawn(source.run(tx, cancel.clone()));

    let ingest = Job::new(store.clone(), config.ingest.clone());
    let ingest_cancel = cancel.clone();
    let ingest_task = tokio::spawn(async move {
        let result = ingest.run(rx, ingest_cancel.clone()).await;
        if result.is_err() {
            ingest_cancel.cancel();
        }
        result
    });

    info!(events = %options.events, dry_run = options.dry_run, "kpng started");

    let mut job = LocalDiffJob::new(&store, sink, config.store.retry_backoff());
    let sink_result = job.run(cancel.clone()).await;
    if let Err(e) = &sink_result {
        error!(error = %e, "stopping after sink failure");
    }
    cancel.cancel();

    let ingest_result = ingest_task.await.context("ingestion task panicked")?;
    let source_result = source_task.await.context("watch source task panicked")?;

    sink_result.context("sink failed")?;
    ingest_result.context("ingestion failed")?;
    source_result.context("watch source failed")?;

    info!(generation = store.generation(), "kpng stopped");
    Ok(job.into_sink())
}
