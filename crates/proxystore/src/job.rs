//! Drives a sink from the store's diff feed.

use crate::{DiffReader, Store};
use kpng_sync_common::{apply_generation, Generation, Sink, SinkResult};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// Pulls generations from a store and applies them to one sink, strictly
/// one after another.
pub struct LocalDiffJob<S> {
    reader: DiffReader,
    sink: S,
    retry_backoff: Duration,
}

impl<S: Sink> LocalDiffJob<S> {
    pub fn new(store: &Arc<Store>, sink: S, retry_backoff: Duration) -> Self {
        Self {
            reader: store.diff_reader(),
            sink,
            retry_backoff,
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Waits for the next generation and applies it.
    ///
    /// Returns the generation number once the sink has synced it, or
    /// `None` if the sink failed and a bootstrap was requested.
    ///
    /// # Errors
    ///
    /// Fatal sink errors are returned; everything else is logged.
    pub async fn step(&mut self) -> SinkResult<Option<u64>> {
        match self.reader.next().await {
            Some(generation) => self.apply(generation).await,
            None => Ok(None),
        }
    }

    async fn apply(&mut self, generation: Generation) -> SinkResult<Option<u64>> {
        if generation.is_bootstrap() {
            info!(
                sink = self.sink.name(),
                generation = generation.number,
                ops = generation.changes().len(),
                "applying bootstrap"
            );
            self.sink.reset();
        }

        match apply_generation(&mut self.sink, &generation).await {
            Ok(()) => {
                self.reader.ack(generation.number);
                Ok(Some(generation.number))
            }
            Err(e) if e.is_fatal() => {
                error!(sink = self.sink.name(), generation = generation.number, error = %e, "sink failed");
                Err(e)
            }
            Err(e) => {
                warn!(
                    sink = self.sink.name(),
                    generation = generation.number,
                    error = %e,
                    "sink lost synchronization, requesting bootstrap"
                );
                self.reader.request_bootstrap();
                Ok(None)
            }
        }
    }

    /// Sets the sink up and applies generations until `cancel` fires.
    ///
    /// Cancellation is only observed between generations; a sync in
    /// progress always completes. After a lost synchronization the job
    /// waits `retry_backoff` before pulling the bootstrap.
    #[instrument(skip_all, fields(sink = self.sink.name()))]
    pub async fn run(&mut self, cancel: CancellationToken) -> SinkResult<()> {
        self.sink.setup().await?;
        info!("sink ready, waiting for store sync");

        loop {
            let generation = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                generation = self.reader.next() => generation,
            };
            let Some(generation) = generation else {
                break;
            };

            if self.apply(generation).await?.is_none() {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.retry_backoff) => {}
                }
            }
        }

        info!("sink stopped");
        Ok(())
    }
}
