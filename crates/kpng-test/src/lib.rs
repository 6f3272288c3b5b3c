//! Integration test infrastructure for the kpng pipeline
//!
//! Provides:
//! - Builders for raw service and endpoint-slice objects
//! - A pipeline environment running ingestion, the store and the IPVS
//!   engine against an in-memory kernel, one generation at a time
//! - Kernel state verification helpers

pub mod fixtures;
mod pipeline_env;
mod verification;

pub use fixtures::*;
pub use pipeline_env::PipelineEnv;
pub use verification::*;
