//! Crash-safe JSON persistence for tracked torrent records.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use transferarr_core::{InfoHash, TorrentRecord};

use crate::error::{StoreError, StoreResult};

const STATE_FILE_NAME: &str = "torrents.json";

/// On-disk document shape: one object keyed by lowercase infohash. Unknown
/// top-level fields are preserved across load/save for forwards
/// compatibility.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateDocument {
    /// Tracked records keyed by infohash.
    #[serde(default)]
    pub torrents: BTreeMap<InfoHash, TorrentRecord>,
    /// Fields written by other builds, preserved verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Single-file persistence for the record map.
///
/// Saves go through a temp file followed by a rename so a crash mid-write
/// never leaves a truncated document behind.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// Store rooted in the given state directory.
    #[must_use]
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join(STATE_FILE_NAME),
        }
    }

    /// Path of the snapshot file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted document. A missing or malformed file is
    /// recoverable: it logs and yields an empty document rather than
    /// failing startup.
    #[must_use]
    pub fn load(&self) -> StateDocument {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no state snapshot found; starting empty");
                return StateDocument::default();
            }
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "state snapshot unreadable; starting empty"
                );
                return StateDocument::default();
            }
        };

        match serde_json::from_str::<StateDocument>(&raw) {
            Ok(mut document) => {
                // The map key is authoritative for identity.
                for (hash, record) in &mut document.torrents {
                    record.hash = hash.clone();
                }
                info!(
                    path = %self.path.display(),
                    records = document.torrents.len(),
                    "state snapshot loaded"
                );
                document
            }
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "state snapshot malformed; starting empty"
                );
                StateDocument::default()
            }
        }
    }

    /// Persist the document atomically.
    ///
    /// # Errors
    ///
    /// Returns an error when encoding or the write/rename fails; callers
    /// treat write failures as fatal to the process.
    pub fn save(&self, document: &StateDocument) -> StoreResult<()> {
        let encoded = serde_json::to_string_pretty(document)
            .map_err(|source| StoreError::Encode { source })?;
        let temp = self.path.with_extension("json.tmp");
        fs::write(&temp, encoded).map_err(|source| StoreError::Write {
            path: temp.clone(),
            source,
        })?;
        fs::rename(&temp, &self.path).map_err(|source| StoreError::Write {
            path: self.path.clone(),
            source,
        })?;
        Ok(())
    }
}
