//! Error types for kernel operations and the reconciliation engine.

use kpng_sync_common::{RefCountError, SinkError};
use kpng_types::ParseError;
use std::io;
use thiserror::Error;

pub type KernelResult<T> = Result<T, KernelError>;

/// A kernel operation that could not be carried out. Logged and retried on
/// the next sync; never fatal on its own.
#[derive(Debug, Error)]
pub enum KernelError {
    /// Failed to execute a shell command (spawn error).
    #[error("failed to execute shell command '{command}': {source}")]
    ShellExec {
        /// The command that failed to execute.
        command: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Shell command returned non-zero exit code.
    #[error("shell command failed: '{command}' (exit code {exit_code}): {output}")]
    CommandFailed {
        /// The command that failed.
        command: String,
        /// The exit code.
        exit_code: i32,
        /// Combined stdout/stderr output.
        output: String,
    },

    /// The kernel refused the operation.
    #[error("kernel rejected {op}: {reason}")]
    Rejected {
        /// The operation, as displayed in logs.
        op: String,
        /// Why it was refused.
        reason: String,
    },
}

impl KernelError {
    pub fn rejected(op: impl ToString, reason: impl Into<String>) -> Self {
        Self::Rejected {
            op: op.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors that stop the engine. Each one means state the engine derives
/// cannot be trusted any more.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A service address that does not form a host prefix.
    #[error("cannot bind {ip} on the dummy interface: {source}")]
    InvalidDummyCidr {
        ip: String,
        #[source]
        source: ParseError,
    },

    /// Released an address nobody claimed.
    #[error("dummy address accounting broken: {0}")]
    RefCount(#[from] RefCountError),

    /// The dummy interface or an ip-set could not be created.
    #[error("setup failed: {0}")]
    Setup(#[source] KernelError),
}

impl From<EngineError> for SinkError {
    fn from(e: EngineError) -> Self {
        SinkError::fatal(e.to_string())
    }
}
