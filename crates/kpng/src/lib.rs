//! kpng agent.
//!
//! Wires a JSON-lines watch source into the proxy store and drives the IPVS
//! sink from the store's diff feed:
//!
//! ```text
//! events ──► JsonLinesSource ──► kube2store::Job ──► Store ──► LocalDiffJob ──► ipvs_sink::Backend
//! ```

pub mod cli;
pub mod config;
pub mod logging;
mod run;

pub use config::{ConfigError, KpngConfig, LogFormat, LoggingConfig, DEFAULT_CONFIG_PATH};
pub use run::{run, run_with_backend, RunOptions};
