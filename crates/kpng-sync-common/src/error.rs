//! Sink error types.

use thiserror::Error;

pub type SinkResult<T> = Result<T, SinkError>;

/// Errors a sink reports back to the diff driver.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Unrecoverable configuration or logic error; the process must stop.
    #[error("fatal sink error: {message}")]
    Fatal {
        /// Error message.
        message: String,
    },

    /// The sink cannot trust its staged state and needs a bootstrap.
    #[error("sink lost synchronization: {reason}")]
    Desync {
        /// Why the sink gave up on the current generation.
        reason: String,
    },
}

impl SinkError {
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }

    pub fn desync(reason: impl Into<String>) -> Self {
        Self::Desync {
            reason: reason.into(),
        }
    }

    /// Returns true if the driver must stop instead of re-bootstrapping.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }
}
