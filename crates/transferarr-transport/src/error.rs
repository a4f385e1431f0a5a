//! Error types for transport sessions and copies.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Primary error type for transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// A filesystem or stream operation failed.
    #[error("transport io failure")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Path involved in the failure.
        path: PathBuf,
        /// Source IO error.
        source: io::Error,
    },
    /// The SSH session could not be established or dropped mid-operation.
    #[error("ssh session failure")]
    Session {
        /// Host the session targets.
        host: String,
        /// Failure detail from the SSH layer.
        detail: String,
    },
    /// The server rejected the supplied credentials.
    #[error("ssh authentication failed")]
    Auth {
        /// Host the session targets.
        host: String,
        /// Failure detail from the SSH layer.
        detail: String,
    },
    /// An SSH config alias did not resolve to a usable host entry.
    #[error("ssh config alias could not be resolved")]
    Alias {
        /// Alias looked up in the SSH config file.
        alias: String,
        /// Failure detail.
        detail: String,
    },
}

impl TransportError {
    pub(crate) fn io(operation: &'static str, path: &Path, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Convenience alias for transport results.
pub type TransportResult<T> = Result<T, TransportError>;
