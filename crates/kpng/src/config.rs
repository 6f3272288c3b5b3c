//! Configuration file support.
//!
//! Loads and validates the agent configuration from TOML. Every section
//! and every field is optional; a missing file means defaults.
//!
//! ```toml
//! [store]
//! history_generations = 64
//! retry_backoff_ms = 500
//!
//! [ingest]
//! channel_capacity = 1024
//! service_proxy_name = "kpng"
//!
//! [ipvs]
//! scheduling_method = "rr"
//! dummy_interface = "kube-ipvs0"
//!
//! [logging]
//! level = "info"
//! format = "text"
//! ```

use ipvs_sink::IpvsConfig;
use kube2store::IngestConfig;
use proxystore::StoreConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/kpng/kpng.toml";

/// Longest interface name the kernel accepts.
const MAX_IFNAME_LEN: usize = 15;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KpngConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub ipvs: IpvsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl KpngConfig {
    /// Loads `path`, falling back to defaults if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] for any IO error other than a missing
    /// file, and [`ConfigError::Parse`] for malformed TOML.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => Self::parse(&content, path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| -> Result<(), ConfigError> { Err(ConfigError::Invalid(msg.to_string())) };

        if self.store.history_generations == 0 {
            return invalid("store.history_generations must be > 0");
        }
        if self.ingest.channel_capacity == 0 {
            return invalid("ingest.channel_capacity must be > 0");
        }
        if self.ipvs.scheduling_method.trim().is_empty() {
            return invalid("ipvs.scheduling_method must not be empty");
        }
        let link = &self.ipvs.dummy_interface;
        if link.is_empty() || link.len() > MAX_IFNAME_LEN || link.contains(char::is_whitespace) {
            return invalid("ipvs.dummy_interface must be a valid interface name");
        }
        if self.ipvs.weight == 0 {
            return invalid("ipvs.weight must be > 0");
        }
        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return invalid("logging.level must be one of trace, debug, info, warn, error");
        }

        Ok(())
    }
}
