//! Sink trait: the consumer side of the diff protocol.

use crate::{Generation, Op, SinkError, SinkResult};
use async_trait::async_trait;
use kpng_types::{EndpointInfo, Service, ServiceKey, SourceKey};
use tracing::debug;

/// A backend fed by store generations.
///
/// # Lifecycle
///
/// 1. `setup()` once before the first generation
/// 2. For every generation: the staging calls, then `sync()` on the marker
/// 3. `reset()` before a bootstrap; the sink forgets everything it was told
///    but keeps what it knows about kernel state so the bootstrap's commit
///    only issues the real difference
///
/// Staging calls must not touch the kernel. `sync()` runs to completion;
/// the driver never starts another generation while it is in flight.
#[async_trait]
pub trait Sink: Send {
    /// Returns the name of this sink (for logging).
    fn name(&self) -> &str;

    /// Prepares kernel objects the sink relies on.
    async fn setup(&mut self) -> SinkResult<()> {
        Ok(())
    }

    /// Upserts a service, replacing its previous state.
    fn set_service(&mut self, service: &Service) -> SinkResult<()>;

    fn delete_service(&mut self, key: &ServiceKey) -> SinkResult<()>;

    /// Replaces every endpoint published by `source`.
    fn set_endpoints(&mut self, source: &SourceKey, endpoints: &[EndpointInfo]) -> SinkResult<()>;

    fn delete_endpoints(&mut self, source: &SourceKey) -> SinkResult<()>;

    /// Commits everything staged since the previous sync.
    async fn sync(&mut self) -> SinkResult<()>;

    /// Drops all staged and received state ahead of a bootstrap.
    fn reset(&mut self);
}

/// Feeds one generation to `sink`, ending with its `sync()`.
///
/// # Errors
///
/// Returns [`SinkError::Desync`] if the generation is not terminated by its
/// own sync marker, or whatever the sink returns.
pub async fn apply_generation<S>(sink: &mut S, generation: &Generation) -> SinkResult<()>
where
    S: Sink + ?Sized,
{
    if !generation.is_terminated() {
        return Err(SinkError::desync(format!(
            "generation {} is not terminated by its sync marker",
            generation.number
        )));
    }

    debug!(
        sink = sink.name(),
        generation = generation.number,
        mode = ?generation.mode,
        ops = generation.changes().len(),
        "applying generation"
    );

    for op in &generation.ops {
        match op {
            Op::SetService(svc) => sink.set_service(svc)?,
            Op::DeleteService(key) => sink.delete_service(key)?,
            Op::SetEndpoints { source, endpoints } => sink.set_endpoints(source, endpoints)?,
            Op::DeleteEndpoints(source) => sink.delete_endpoints(source)?,
            Op::Sync { .. } => sink.sync().await?,
        }
    }

    Ok(())
}
