//! Ingestion error types.

use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Debug, Error)]
pub enum IngestError {
    /// A cluster IP that is neither empty, `None`, nor an address. Valid
    /// upstream data never carries one.
    #[error("invalid cluster IP '{value}' on service {service}")]
    InvalidClusterIp {
        /// `namespace/name` of the service.
        service: String,
        /// The raw value.
        value: String,
    },

    /// A watch record that could not be decoded.
    #[error("malformed watch record at line {line}: {message}")]
    Decode {
        /// 1-based line number in the source.
        line: usize,
        /// Error message.
        message: String,
    },

    #[error("failed to read watch source '{path}': {source}")]
    Io {
        /// The path, or `-` for stdin.
        path: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },
}

impl IngestError {
    /// Returns true if ingestion must stop.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Decode { .. })
    }
}
