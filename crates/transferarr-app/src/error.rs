//! Application-level errors for bootstrap and orchestration.
//!
//! # Design
//!
//! - Centralise startup and driver failures with operation context.
//! - Carry the exit-code policy: configuration problems exit 1, an
//!   unwritable state store exits 2.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration loading or validation failed.
    #[error("configuration failure")]
    Config {
        /// Source configuration error.
        #[source]
        source: transferarr_config::ConfigError,
    },
    /// The state store could not be read or written.
    #[error("state store failure")]
    Store {
        /// Source store error.
        #[source]
        source: transferarr_store::StoreError,
    },
    /// The state directory could not be prepared.
    #[error("state directory unusable")]
    StateDir {
        /// Directory that could not be prepared.
        path: PathBuf,
        /// Source IO error.
        #[source]
        source: io::Error,
    },
    /// An endpoint client could not be constructed.
    #[error("endpoint construction failed")]
    Endpoint {
        /// Endpoint name from configuration.
        name: String,
        /// Source client error.
        #[source]
        source: transferarr_core::ClientError,
    },
    /// A media-manager adapter could not be constructed.
    #[error("media manager construction failed")]
    Adapter {
        /// Source adapter error.
        #[source]
        source: transferarr_core::AdapterError,
    },
    /// The history sink could not be initialised.
    #[error("history initialisation failed")]
    History {
        /// Source history error.
        #[source]
        source: transferarr_history::HistoryError,
    },
    /// The logging subscriber could not be installed.
    #[error("telemetry initialisation failed: {detail}")]
    Telemetry {
        /// Failure detail.
        detail: String,
    },
}

impl AppError {
    pub(crate) const fn config(source: transferarr_config::ConfigError) -> Self {
        Self::Config { source }
    }

    pub(crate) const fn store(source: transferarr_store::StoreError) -> Self {
        Self::Store { source }
    }

    /// Process exit code for this failure.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Store { .. } | Self::StateDir { .. } => 2,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_the_contract() {
        let config = AppError::config(transferarr_config::ConfigError::InvalidField {
            section: "connections.main".into(),
            field: "to".into(),
            value: None,
            reason: "test",
        });
        assert_eq!(config.exit_code(), 1);

        let store = AppError::store(transferarr_store::StoreError::Write {
            path: PathBuf::from("/state/torrents.json"),
            source: io::Error::other("disk full"),
        });
        assert_eq!(store.exit_code(), 2);
    }
}
