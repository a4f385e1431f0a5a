//! Error types for endpoint and adapter operations.
//!
//! # Design
//!
//! - Keep error messages constant while carrying context fields for debugging.
//! - Expose `is_transient()` so the reconciliation driver can decide between
//!   retrying next tick and surfacing the failure on a record.

use thiserror::Error;

/// Info hashes must be exactly 40 hexadecimal characters.
#[derive(Debug, Error)]
#[error("invalid info hash")]
pub struct InfoHashError {
    /// Offending value supplied by the caller.
    pub value: String,
}

/// Failures reported by a download-client endpoint.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The endpoint could not be reached or the session dropped.
    #[error("endpoint connection failed")]
    Connection {
        /// Endpoint name from configuration.
        endpoint: String,
        /// Human-readable failure detail.
        detail: String,
    },
    /// The request did not complete within the per-call timeout.
    #[error("endpoint call timed out")]
    Timeout {
        /// Endpoint name from configuration.
        endpoint: String,
        /// Operation identifier.
        operation: &'static str,
    },
    /// The endpoint understood the request and refused it.
    #[error("endpoint rejected the operation")]
    Rejected {
        /// Endpoint name from configuration.
        endpoint: String,
        /// Operation identifier.
        operation: &'static str,
        /// Refusal detail reported by the endpoint.
        detail: String,
    },
    /// The endpoint answered with something the client could not decode.
    #[error("endpoint response was malformed")]
    Protocol {
        /// Endpoint name from configuration.
        endpoint: String,
        /// Decode failure detail.
        detail: String,
    },
}

impl ClientError {
    /// Whether the failure is expected to clear on its own; transient errors
    /// are retried on the next reconciliation tick and never recorded on a
    /// torrent.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }
}

/// Convenience alias for endpoint results.
pub type ClientResult<T> = Result<T, ClientError>;

/// Failures reported by a media-manager adapter.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The manager could not be reached.
    #[error("media manager connection failed")]
    Connection {
        /// Manager kind tag.
        kind: &'static str,
        /// Human-readable failure detail.
        detail: String,
    },
    /// The request did not complete within the per-call timeout.
    #[error("media manager call timed out")]
    Timeout {
        /// Manager kind tag.
        kind: &'static str,
        /// Operation identifier.
        operation: &'static str,
    },
    /// The manager answered with a non-success status.
    #[error("media manager returned an error status")]
    Status {
        /// Manager kind tag.
        kind: &'static str,
        /// HTTP status code returned.
        status: u16,
    },
    /// The manager answered with something the adapter could not decode.
    #[error("media manager response was malformed")]
    Protocol {
        /// Manager kind tag.
        kind: &'static str,
        /// Decode failure detail.
        detail: String,
    },
}

impl AdapterError {
    /// Whether the failure is expected to clear on its own. Auth failures
    /// (401/403) are configuration problems and are not transient.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Connection { .. } | Self::Timeout { .. } => true,
            Self::Status { status, .. } => *status >= 500,
            Self::Protocol { .. } => false,
        }
    }
}

/// Convenience alias for adapter results.
pub type AdapterResult<T> = Result<T, AdapterError>;
