//! Append-only JSONL recorder for transfer events.

use std::collections::{HashMap, HashSet};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{Duration as ChronoDuration, Utc};
use thiserror::Error;
use tracing::{info, warn};
use transferarr_core::InfoHash;

use crate::event::{EventEnvelope, TransferEvent};

const HISTORY_FILE_NAME: &str = "history.jsonl";

/// Errors from sink maintenance operations. Recording itself is best-effort
/// and never fails the caller.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// The history file could not be read or written.
    #[error("history file io failure")]
    Io {
        /// Path involved in the failure.
        path: PathBuf,
        /// Source IO error.
        source: io::Error,
    },
}

/// Convenience alias for history results.
pub type HistoryResult<T> = Result<T, HistoryError>;

/// Consumer of reportable transfer events.
pub trait HistorySink: Send + Sync {
    /// Record one event. Best-effort; implementations swallow and log their
    /// own failures.
    fn record(&self, event: TransferEvent);
}

/// Sink used when history tracking is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl HistorySink for NullSink {
    fn record(&self, _event: TransferEvent) {}
}

struct Throttle {
    last_progress: HashMap<InfoHash, Instant>,
}

/// File-backed sink appending one JSON object per line.
///
/// Progress events are throttled per transfer; everything else is appended
/// unconditionally. On startup, transfers that were left open by a previous
/// process are marked failed.
pub struct JsonlHistory {
    path: PathBuf,
    progress_interval: Duration,
    throttle: Mutex<Throttle>,
}

impl JsonlHistory {
    /// Open (creating if needed) the history file under the state directory
    /// and mark transfers interrupted by a restart as failed.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or appended.
    pub fn open(state_dir: &Path, progress_interval: Duration) -> HistoryResult<Self> {
        let sink = Self {
            path: state_dir.join(HISTORY_FILE_NAME),
            progress_interval,
            throttle: Mutex::new(Throttle {
                last_progress: HashMap::new(),
            }),
        };
        let interrupted = sink.mark_interrupted()?;
        if interrupted > 0 {
            info!(
                count = interrupted,
                path = %sink.path.display(),
                "marked transfers interrupted by restart as failed"
            );
        }
        Ok(sink)
    }

    /// Path of the history file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drop entries older than the retention window. The file is rewritten
    /// through a temp file so a crash cannot truncate it.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or rewritten.
    pub fn prune_older_than(&self, days: u32) -> HistoryResult<usize> {
        let envelopes = self.load_envelopes()?;
        let cutoff = Utc::now() - ChronoDuration::days(i64::from(days));
        let (kept, dropped): (Vec<_>, Vec<_>) = envelopes
            .into_iter()
            .partition(|envelope| envelope.at >= cutoff);
        if dropped.is_empty() {
            return Ok(0);
        }

        let mut body = String::new();
        for envelope in &kept {
            match serde_json::to_string(envelope) {
                Ok(line) => {
                    body.push_str(&line);
                    body.push('\n');
                }
                Err(err) => warn!(error = %err, "dropping unencodable history entry"),
            }
        }
        let temp = self.path.with_extension("jsonl.tmp");
        fs::write(&temp, body).map_err(|source| HistoryError::Io {
            path: temp.clone(),
            source,
        })?;
        fs::rename(&temp, &self.path).map_err(|source| HistoryError::Io {
            path: self.path.clone(),
            source,
        })?;
        info!(removed = dropped.len(), days, "pruned transfer history");
        Ok(dropped.len())
    }

    /// Parse every well-formed envelope in the file. Malformed lines are
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read.
    pub fn load_envelopes(&self) -> HistoryResult<Vec<EventEnvelope>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(HistoryError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        Ok(raw
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str::<EventEnvelope>(line).ok())
            .collect())
    }

    fn mark_interrupted(&self) -> HistoryResult<usize> {
        let mut open: HashSet<InfoHash> = HashSet::new();
        for envelope in self.load_envelopes()? {
            match envelope.event {
                TransferEvent::TransferStarted { hash, .. } => {
                    open.insert(hash);
                }
                TransferEvent::TransferCompleted { hash }
                | TransferEvent::TransferFailed { hash, .. } => {
                    open.remove(&hash);
                }
                TransferEvent::TransferProgress { .. } => {}
            }
        }

        let count = open.len();
        for hash in open {
            self.append(&EventEnvelope::now(TransferEvent::TransferFailed {
                hash,
                reason: "interrupted by application restart".to_string(),
            }))?;
        }
        Ok(count)
    }

    fn append(&self, envelope: &EventEnvelope) -> HistoryResult<()> {
        let line = serde_json::to_string(envelope).map_err(|err| HistoryError::Io {
            path: self.path.clone(),
            source: io::Error::other(err),
        })?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| HistoryError::Io {
                path: self.path.clone(),
                source,
            })?;
        writeln!(file, "{line}").map_err(|source| HistoryError::Io {
            path: self.path.clone(),
            source,
        })
    }

    fn progress_due(&self, hash: &InfoHash) -> bool {
        let mut throttle = self.throttle.lock().expect("history throttle poisoned");
        let due = throttle
            .last_progress
            .get(hash)
            .is_none_or(|last| last.elapsed() >= self.progress_interval);
        if due {
            throttle.last_progress.insert(hash.clone(), Instant::now());
        }
        due
    }
}

impl HistorySink for JsonlHistory {
    fn record(&self, event: TransferEvent) {
        if matches!(event, TransferEvent::TransferProgress { .. }) && !self.progress_due(event.hash())
        {
            return;
        }
        if let Err(err) = self.append(&EventEnvelope::now(event)) {
            warn!(error = %err, "history event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn hash() -> InfoHash {
        InfoHash::new("ab0123456789abcdef0123456789abcdef012345").expect("hash")
    }

    fn started() -> TransferEvent {
        TransferEvent::TransferStarted {
            hash: hash(),
            name: "X".into(),
            from: "src".into(),
            to: "dst".into(),
            size_bytes: 1024,
        }
    }

    #[test]
    fn records_and_reloads_events() {
        let dir = TempDir::new().expect("tempdir");
        let sink = JsonlHistory::open(dir.path(), Duration::from_secs(5)).expect("open");

        sink.record(started());
        sink.record(TransferEvent::TransferCompleted { hash: hash() });

        let envelopes = sink.load_envelopes().expect("load");
        assert_eq!(envelopes.len(), 2);
        assert_eq!(envelopes[0].event.kind(), "transfer_started");
        assert_eq!(envelopes[1].event.kind(), "transfer_completed");
    }

    #[test]
    fn reopening_marks_open_transfers_failed() {
        let dir = TempDir::new().expect("tempdir");
        {
            let sink = JsonlHistory::open(dir.path(), Duration::from_secs(5)).expect("open");
            sink.record(started());
        }

        let sink = JsonlHistory::open(dir.path(), Duration::from_secs(5)).expect("reopen");
        let envelopes = sink.load_envelopes().expect("load");
        assert_eq!(envelopes.len(), 2);
        assert!(matches!(
            &envelopes[1].event,
            TransferEvent::TransferFailed { reason, .. } if reason.contains("restart")
        ));
    }

    #[test]
    fn completed_transfers_are_not_marked_on_reopen() {
        let dir = TempDir::new().expect("tempdir");
        {
            let sink = JsonlHistory::open(dir.path(), Duration::from_secs(5)).expect("open");
            sink.record(started());
            sink.record(TransferEvent::TransferCompleted { hash: hash() });
        }

        let sink = JsonlHistory::open(dir.path(), Duration::from_secs(5)).expect("reopen");
        assert_eq!(sink.load_envelopes().expect("load").len(), 2);
    }

    #[test]
    fn progress_events_are_throttled_per_transfer() {
        let dir = TempDir::new().expect("tempdir");
        let sink = JsonlHistory::open(dir.path(), Duration::from_secs(3600)).expect("open");

        for bytes in [10u64, 20, 30] {
            sink.record(TransferEvent::TransferProgress {
                hash: hash(),
                bytes_done: bytes,
                bytes_total: 100,
                speed_bps: 1,
            });
        }

        let progress_lines = sink
            .load_envelopes()
            .expect("load")
            .into_iter()
            .filter(|envelope| envelope.event.kind() == "transfer_progress")
            .count();
        assert_eq!(progress_lines, 1, "rapid progress collapses to one line");
    }

    #[test]
    fn pruning_drops_entries_past_the_retention_window() {
        let dir = TempDir::new().expect("tempdir");
        let sink = JsonlHistory::open(dir.path(), Duration::from_secs(5)).expect("open");

        let stale = EventEnvelope {
            at: Utc::now() - ChronoDuration::days(60),
            event: TransferEvent::TransferCompleted { hash: hash() },
        };
        sink.append(&stale).expect("append stale");
        sink.record(TransferEvent::TransferCompleted { hash: hash() });

        let removed = sink.prune_older_than(30).expect("prune");
        assert_eq!(removed, 1);
        assert_eq!(sink.load_envelopes().expect("load").len(), 1);
    }
}
