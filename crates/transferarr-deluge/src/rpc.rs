//! Wire envelopes for the Deluge Web JSON-RPC endpoint.

use serde::Deserialize;
use serde_json::Value;

/// Fields requested from every torrent listing.
pub const STATUS_FIELDS: [&str; 5] = ["name", "state", "progress", "total_size", "files"];

/// Error payload attached to a failed call.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcError {
    /// Human-readable failure description.
    pub message: String,
    /// Numeric code; `1` is the web interface's not-authenticated error.
    #[serde(default)]
    pub code: i64,
}

impl RpcError {
    /// Whether the session cookie expired and a fresh login is needed.
    #[must_use]
    pub fn is_stale_session(&self) -> bool {
        self.code == 1 || self.message.contains("Not authenticated")
    }

    /// Whether an add was refused because the hash is already tracked.
    /// Idempotent adds treat this as success.
    #[must_use]
    pub fn is_already_added(&self) -> bool {
        self.message.contains("already in session")
    }

    /// Whether a remove addressed a hash the daemon does not track.
    /// Removals treat this as success.
    #[must_use]
    pub fn is_not_present(&self) -> bool {
        self.message.contains("not in session") || self.message.contains("InvalidTorrentError")
    }
}

/// Response envelope for every call.
#[derive(Debug, Deserialize)]
pub struct RpcResponse {
    /// Call result; `null` for void methods.
    #[serde(default)]
    pub result: Value,
    /// Error payload when the call failed.
    #[serde(default)]
    pub error: Option<RpcError>,
}

/// One row of `core.get_torrents_status`.
#[derive(Debug, Clone, Deserialize)]
pub struct TorrentStatusRow {
    /// Display name.
    pub name: String,
    /// Native state string, e.g. `Seeding`.
    pub state: String,
    /// Completion percentage (0-100).
    #[serde(default)]
    pub progress: f64,
    /// Total payload size in bytes.
    #[serde(default)]
    pub total_size: u64,
    /// File listing; relative paths within the download directory.
    #[serde(default)]
    pub files: Vec<FileRow>,
}

/// One file entry within a status row.
#[derive(Debug, Clone, Deserialize)]
pub struct FileRow {
    /// Path relative to the download directory.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
}
