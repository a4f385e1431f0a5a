//! Error types for state persistence.

use std::io;
use std::path::PathBuf;

use thiserror::Error;
use transferarr_core::TorrentState;

/// Primary error type for state-store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The snapshot could not be encoded as JSON.
    #[error("state snapshot could not be encoded")]
    Encode {
        /// Source JSON error.
        source: serde_json::Error,
    },
    /// The snapshot could not be written to disk. Fatal to the process: a
    /// driver that cannot persist must stop rather than lose progress.
    #[error("state snapshot could not be written")]
    Write {
        /// Path that failed to write.
        path: PathBuf,
        /// Source IO error.
        source: io::Error,
    },
    /// A transition outside the lifecycle table was requested.
    #[error("illegal state transition")]
    IllegalTransition {
        /// Torrent the transition was requested for.
        hash: String,
        /// State the record is currently in.
        from: TorrentState,
        /// State that was requested.
        to: TorrentState,
    },
    /// The record addressed by a worker no longer exists.
    #[error("record not tracked")]
    Missing {
        /// Torrent that could not be found.
        hash: String,
    },
}

/// Convenience alias for store results.
pub type StoreResult<T> = Result<T, StoreError>;
