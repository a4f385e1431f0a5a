//! Core torrent domain types shared across the workspace.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::InfoHashError;

/// Torrent identity: a 40-hex infohash compared case-insensitively.
///
/// Managers report hashes uppercase while torrent clients tend to lowercase
/// them; the constructor normalises to lowercase so the two always match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InfoHash(String);

impl InfoHash {
    /// Validate and normalise a 40-hex infohash.
    ///
    /// # Errors
    ///
    /// Returns an error when the value is not exactly 40 hexadecimal
    /// characters.
    pub fn new(value: impl Into<String>) -> Result<Self, InfoHashError> {
        let value = value.into();
        if value.len() == 40 && value.bytes().all(|b| b.is_ascii_hexdigit()) {
            Ok(Self(value.to_ascii_lowercase()))
        } else {
            Err(InfoHashError { value })
        }
    }

    /// The normalised lowercase hex form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl FromStr for InfoHash {
    type Err = InfoHashError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::new(value)
    }
}

impl TryFrom<String> for InfoHash {
    type Error = InfoHashError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<InfoHash> for String {
    fn from(hash: InfoHash) -> Self {
        hash.0
    }
}

/// Media-manager kind owning a torrent; serialised into records so the
/// adapter can be rebound after a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagerKind {
    /// Movie cataloger (Radarr).
    Movies,
    /// Series cataloger (Sonarr).
    Series,
}

impl ManagerKind {
    /// Stable string tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Movies => "movies",
            Self::Series => "series",
        }
    }
}

impl fmt::Display for ManagerKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// State reported by a torrent client for one of its torrents, before the
/// home/target perspective is applied. Endpoint implementations translate
/// their native vocabulary into this set at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointTorrentState {
    /// Waiting for its turn in the client's queue.
    Queued,
    /// Verifying data on disk.
    Checking,
    /// Pre-allocating storage before the download starts.
    Allocating,
    /// Actively downloading.
    Downloading,
    /// Complete and uploading to peers.
    Seeding,
    /// Stopped by the user or the client.
    Paused,
    /// The client is relocating the payload on disk.
    Moving,
    /// The client reports a torrent-level error.
    Error,
}

impl EndpointTorrentState {
    /// View this state from the home-client perspective. Allocating behaves
    /// like checking and moving like paused; the driver only distinguishes
    /// downloading-like from seeding-like.
    #[must_use]
    pub const fn as_home(self) -> TorrentState {
        match self {
            Self::Queued => TorrentState::HomeQueued,
            Self::Checking | Self::Allocating => TorrentState::HomeChecking,
            Self::Downloading => TorrentState::HomeDownloading,
            Self::Seeding => TorrentState::HomeSeeding,
            Self::Paused | Self::Moving => TorrentState::HomePaused,
            Self::Error => TorrentState::HomeError,
        }
    }

    /// View this state from the target-client perspective.
    #[must_use]
    pub const fn as_target(self) -> TorrentState {
        match self {
            Self::Queued => TorrentState::TargetQueued,
            Self::Checking | Self::Allocating => TorrentState::TargetChecking,
            Self::Downloading => TorrentState::TargetDownloading,
            Self::Seeding => TorrentState::TargetSeeding,
            Self::Paused | Self::Moving => TorrentState::TargetPaused,
            Self::Error => TorrentState::TargetError,
        }
    }
}

/// Universal lifecycle state driven by the reconciliation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TorrentState {
    /// Surfaced by a manager queue but not yet located on any client.
    ManagerQueued,
    /// Not located on any client this tick; dropped after too many misses.
    Unclaimed,
    /// Queued on the home client.
    HomeQueued,
    /// Checking on the home client.
    HomeChecking,
    /// Downloading on the home client.
    HomeDownloading,
    /// Seeding on the home client; eligible for transfer.
    HomeSeeding,
    /// Paused on the home client.
    HomePaused,
    /// The home client reports an error.
    HomeError,
    /// A copy job is queued or in flight.
    Copying,
    /// Payload and metainfo landed on the target and the add was issued.
    Copied,
    /// Queued on the target client.
    TargetQueued,
    /// Checking on the target client.
    TargetChecking,
    /// Downloading on the target client.
    TargetDownloading,
    /// Seeding on the target client; eligible for retirement.
    TargetSeeding,
    /// Paused on the target client.
    TargetPaused,
    /// The target client reports an error.
    TargetError,
    /// Terminal failure awaiting operator intervention.
    Error,
}

impl TorrentState {
    /// Whether this is one of the home-client states.
    #[must_use]
    pub const fn is_home(self) -> bool {
        matches!(
            self,
            Self::HomeQueued
                | Self::HomeChecking
                | Self::HomeDownloading
                | Self::HomeSeeding
                | Self::HomePaused
                | Self::HomeError
        )
    }

    /// Whether this is one of the target-client states.
    #[must_use]
    pub const fn is_target(self) -> bool {
        matches!(
            self,
            Self::TargetQueued
                | Self::TargetChecking
                | Self::TargetDownloading
                | Self::TargetSeeding
                | Self::TargetPaused
                | Self::TargetError
        )
    }

    /// Whether the driver still needs to locate this record on a client.
    #[must_use]
    pub const fn needs_location(self) -> bool {
        matches!(self, Self::ManagerQueued | Self::Unclaimed)
    }

    /// Legality of a driver-initiated transition. Identity transitions are
    /// permitted so refresh passes can reassign without special cases.
    #[must_use]
    pub fn permits(self, next: Self) -> bool {
        if self == next {
            return true;
        }
        match (self, next) {
            // A record in Error is surfaced until an operator clears it.
            (Self::Error, _) => false,
            // Losing track of a torrent is always representable.
            (_, Self::Unclaimed) => true,
            // Restoration after a missed locate.
            (Self::Unclaimed, restored) => !matches!(restored, Self::ManagerQueued),
            (Self::ManagerQueued, located) => located.is_home() || located.is_target(),
            (Self::HomeSeeding, Self::Copying) => true,
            (from, to) if from.is_home() && to.is_home() => true,
            (Self::Copying, Self::Copied | Self::Error) => true,
            (Self::Copied, to) if to.is_target() => true,
            (from, to) if from.is_target() && to.is_target() => true,
            _ => false,
        }
    }
}

/// Per-file entry within a torrent payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorrentFileEntry {
    /// Path relative to the client's download directory.
    pub path: String,
    /// Size in bytes.
    pub size_bytes: u64,
}

/// Snapshot of one torrent as reported by a client `list()` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorrentSnapshot {
    /// Display name reported by the client.
    pub name: String,
    /// Translated endpoint state.
    pub state: EndpointTorrentState,
    /// Completion percentage (0-100).
    pub progress: f64,
    /// Total payload size in bytes.
    pub total_bytes: u64,
    /// File listing when the client provides one.
    #[serde(default)]
    pub files: Vec<TorrentFileEntry>,
}

impl TorrentSnapshot {
    /// Top-level paths to replicate, deduplicated by first path component so
    /// a multi-file torrent copies its root directory once.
    #[must_use]
    pub fn top_level_paths(&self) -> Vec<String> {
        top_level_paths(&self.files)
    }
}

/// Deduplicate a file listing by first path component.
#[must_use]
pub fn top_level_paths(files: &[TorrentFileEntry]) -> Vec<String> {
    let mut seen = BTreeMap::new();
    for file in files {
        let top = file
            .path
            .split(['/', '\\'])
            .next()
            .unwrap_or(file.path.as_str());
        if !top.is_empty() {
            seen.entry(top.to_string()).or_insert(());
        }
    }
    seen.into_keys().collect()
}

/// Queue entry surfaced by a media manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Torrent identity.
    pub hash: InfoHash,
    /// Release title.
    pub name: String,
    /// Opaque identifier used to confirm ingest and dequeue on retirement.
    pub queue_id: String,
}

/// Request payload handed to an endpoint when re-adding a copied torrent.
#[derive(Debug, Clone)]
pub struct AddMetainfo {
    /// File name the metainfo was staged under on the target side.
    pub file_name: String,
    /// Raw bencoded metainfo bytes.
    pub bytes: Vec<u8>,
    /// Directory the client should treat as the payload root.
    pub save_path: String,
    /// Whether the torrent should start paused.
    pub paused: bool,
}

/// Last-observed copy progress, published by transfer workers for reporting.
/// Not authoritative; the driver never acts on it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressView {
    /// 1-based index of the file currently copying.
    pub current_file_index: u32,
    /// Total files in the copy job.
    pub total_files: u32,
    /// Name of the file currently copying.
    pub current_file_name: String,
    /// Bytes copied for the current file.
    pub bytes_done: u64,
    /// Size of the current file.
    pub bytes_total: u64,
    /// Transfer speed in bytes per second over a short sliding window.
    pub transfer_bps: u64,
}

/// Category of a fatal, record-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// The copy job failed after exhausting its retries.
    CopyFailed,
    /// The source `.torrent` file was not found; never retried.
    MetainfoMissing,
    /// The target client refused the re-add.
    AddRejected,
}

impl FaultKind {
    /// Stable string tag for logs and history events.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CopyFailed => "copy_failed",
            Self::MetainfoMissing => "metainfo_missing",
            Self::AddRejected => "add_rejected",
        }
    }
}

/// Structured failure captured on a record; cleared only by an operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TorrentFault {
    /// Failure category.
    pub kind: FaultKind,
    /// Human-readable detail.
    pub message: String,
    /// When the failure was recorded.
    pub at: DateTime<Utc>,
}

impl TorrentFault {
    /// Record a failure stamped with the current time.
    #[must_use]
    pub fn now(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            at: Utc::now(),
        }
    }
}

/// Persistent record of one tracked torrent.
///
/// Unknown fields survive a load/save cycle so older builds can read state
/// written by newer ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorrentRecord {
    /// Torrent identity.
    pub hash: InfoHash,
    /// Display name, refreshed from the authoritative source when observed.
    pub name: String,
    /// Current lifecycle state.
    pub state: TorrentState,
    /// Name of the endpoint the torrent currently lives on; empty until
    /// located.
    #[serde(default)]
    pub home_client: String,
    /// Name of the endpoint the payload is copied to; empty until resolved.
    #[serde(default)]
    pub target_client: String,
    /// Manager kind that owns this torrent.
    pub manager_kind: ManagerKind,
    /// Opaque manager identifier used for the ingest check on retirement.
    pub manager_queue_id: String,
    /// Last-observed copy progress; reporting only.
    #[serde(default)]
    pub progress: ProgressView,
    /// Consecutive reconciliation ticks on which no client reported the hash.
    #[serde(default)]
    pub unclaimed_count: u32,
    /// Copy attempts consumed over the lifetime of this record.
    #[serde(default)]
    pub copy_attempts: u32,
    /// Fatal failure, if one has been recorded.
    #[serde(default)]
    pub error: Option<TorrentFault>,
    /// Ticks elapsed since the copy landed; gates retirement. Not persisted:
    /// recounting after a restart only delays removal.
    #[serde(skip)]
    pub settle_ticks: u32,
    /// Fields written by other builds, preserved verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TorrentRecord {
    /// Create a record for a freshly queued manager entry.
    #[must_use]
    pub fn queued(
        hash: InfoHash,
        name: impl Into<String>,
        manager_kind: ManagerKind,
        queue_id: impl Into<String>,
    ) -> Self {
        Self {
            hash,
            name: name.into(),
            state: TorrentState::ManagerQueued,
            home_client: String::new(),
            target_client: String::new(),
            manager_kind,
            manager_queue_id: queue_id.into(),
            progress: ProgressView::default(),
            unclaimed_count: 0,
            copy_attempts: 0,
            error: None,
            settle_ticks: 0,
            extra: serde_json::Map::new(),
        }
    }
}
