//! Typed configuration tree loaded once at startup.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use transferarr_core::ManagerKind;

use crate::defaults;

/// Root configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Logging level applied when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Media managers whose queues drive torrent tracking.
    #[serde(default)]
    pub media_managers: Vec<MediaManagerConfig>,
    /// Torrent-client endpoints, keyed by name. Iteration order is the
    /// configuration order used for home resolution.
    #[serde(default)]
    pub download_clients: BTreeMap<String, DownloadClientConfig>,
    /// Copy routes between endpoints, keyed by name.
    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionConfig>,
    /// Transfer-history settings.
    #[serde(default)]
    pub history: HistoryConfig,
    /// Runtime knobs with sensible fallbacks.
    #[serde(default)]
    pub tunables: Tunables,
}

/// One registered media manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaManagerConfig {
    /// Which manager kind this is.
    pub kind: ManagerKind,
    /// Host name, optionally carrying a scheme.
    pub host: String,
    /// Port, omitted when the host already carries one.
    #[serde(default)]
    pub port: Option<u16>,
    /// API key sent with every request.
    pub api_key: String,
}

impl MediaManagerConfig {
    /// Base URL for API requests; a bare host defaults to `http://`.
    #[must_use]
    pub fn base_url(&self) -> String {
        let host = if self.host.contains("://") {
            self.host.clone()
        } else {
            format!("http://{}", self.host)
        };
        match self.port {
            Some(port) => format!("{host}:{port}"),
            None => host,
        }
    }
}

/// One registered torrent-client endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadClientConfig {
    /// Client implementation, currently `deluge`.
    pub kind: String,
    /// Wire protocol for the implementation, currently `web`.
    pub connection_kind: String,
    /// Host name or address.
    pub host: String,
    /// Port of the client's web interface.
    pub port: u16,
    /// Optional account name; the Deluge web interface only uses a password.
    #[serde(default)]
    pub username: Option<String>,
    /// Password for the client's interface.
    pub password: String,
}

/// One copy route from a source endpoint to a target endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Source endpoint name.
    pub from: String,
    /// Target endpoint name.
    pub to: String,
    /// Transport descriptors for both sides of the route.
    pub transfer_config: TransferConfig,
    /// Directory holding `.torrent` files on the source side.
    pub source_metainfo_dir: String,
    /// Payload root on the source side.
    pub source_payload_dir: String,
    /// Staging directory for `.torrent` files on the target side.
    pub target_metainfo_tmp_dir: String,
    /// Payload root on the target side.
    pub target_payload_dir: String,
}

/// Transport descriptors for the two ends of a connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// How workers reach the source filesystem.
    pub from: TransferDescriptor,
    /// How workers reach the target filesystem.
    pub to: TransferDescriptor,
}

/// How a worker reaches one side of a copy route.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransferDescriptor {
    /// Paths are on the local filesystem.
    Local,
    /// Paths are behind an SFTP session.
    Sftp {
        /// How to address and authenticate the SSH host.
        sftp: SftpAddressing,
    },
}

/// SFTP addressing: inline credentials or an SSH client configuration alias.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SftpAddressing {
    /// Resolve host, user, and key through an alias in an SSH config file.
    Alias {
        /// SSH config file; defaults to `~/.ssh/config` when omitted.
        #[serde(default)]
        ssh_config_file: Option<PathBuf>,
        /// Host alias to look up.
        ssh_config_host: String,
    },
    /// Connect with explicitly supplied credentials.
    Credentials {
        /// Host name or address.
        host: String,
        /// SSH port.
        #[serde(default = "default_ssh_port")]
        port: u16,
        /// Account name.
        username: String,
        /// Password, when authenticating with one.
        #[serde(default)]
        password: Option<String>,
        /// Private key path, when authenticating with a key.
        #[serde(default)]
        private_key: Option<PathBuf>,
    },
}

/// Transfer-history settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Whether transfer history is recorded at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Days of history to keep; unlimited when omitted.
    #[serde(default)]
    pub retention_days: Option<u32>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retention_days: None,
        }
    }
}

/// Runtime knobs; every field falls back to a default when omitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tunables {
    /// Reconciliation period in seconds.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    /// Workers per transfer connection; also the number of jobs a
    /// connection accepts before exerting backpressure.
    #[serde(default = "default_transfer_workers")]
    pub transfer_workers: usize,
    /// Consecutive missed locates before a record is dropped.
    #[serde(default = "default_unclaimed_limit")]
    pub unclaimed_limit: u32,
    /// Copy attempts allowed over the lifetime of a record.
    #[serde(default = "default_copy_retry_limit")]
    pub copy_retry_limit: u32,
    /// Ticks a copied torrent settles on the target before retirement.
    #[serde(default = "default_post_ingest_ticks")]
    pub post_ingest_ticks: u32,
    /// Timeout for each outbound manager or endpoint call, in seconds.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
    /// Minimum seconds between persisted progress updates during a copy.
    #[serde(default = "default_progress_write")]
    pub progress_write_secs: u64,
}

impl Tunables {
    /// Reconciliation period.
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    /// Per-call timeout for outbound requests.
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Throttle between persisted progress updates.
    #[must_use]
    pub const fn progress_write_interval(&self) -> Duration {
        Duration::from_secs(self.progress_write_secs)
    }
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            tick_interval_secs: defaults::TICK_INTERVAL_SECS,
            transfer_workers: defaults::TRANSFER_WORKERS,
            unclaimed_limit: defaults::UNCLAIMED_LIMIT,
            copy_retry_limit: defaults::COPY_RETRY_LIMIT,
            post_ingest_ticks: defaults::POST_INGEST_TICKS,
            call_timeout_secs: defaults::CALL_TIMEOUT_SECS,
            progress_write_secs: defaults::PROGRESS_WRITE_SECS,
        }
    }
}

fn default_log_level() -> String {
    defaults::LOG_LEVEL.to_string()
}

const fn default_true() -> bool {
    true
}

const fn default_ssh_port() -> u16 {
    defaults::SSH_PORT
}

const fn default_tick_interval() -> u64 {
    defaults::TICK_INTERVAL_SECS
}

const fn default_transfer_workers() -> usize {
    defaults::TRANSFER_WORKERS
}

const fn default_unclaimed_limit() -> u32 {
    defaults::UNCLAIMED_LIMIT
}

const fn default_copy_retry_limit() -> u32 {
    defaults::COPY_RETRY_LIMIT
}

const fn default_post_ingest_ticks() -> u32 {
    defaults::POST_INGEST_TICKS
}

const fn default_call_timeout() -> u64 {
    defaults::CALL_TIMEOUT_SECS
}

const fn default_progress_write() -> u64 {
    defaults::PROGRESS_WRITE_SECS
}
