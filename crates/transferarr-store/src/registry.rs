//! Shared record map: the driver mutates it under one lock, transfer workers
//! touch exactly two fields (`progress` and the terminal copy state).

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::warn;
use transferarr_core::{FaultKind, InfoHash, ProgressView, TorrentFault, TorrentRecord, TorrentState};

use crate::error::{StoreError, StoreResult};
use crate::snapshot::{StateDocument, StateStore};

/// What became of a failed copy job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyFailureOutcome {
    /// The record stays in its copying state; the driver re-enqueues it.
    WillRetry {
        /// Attempts consumed so far.
        attempts: u32,
    },
    /// The retry budget is spent (or the failure is not retryable); the
    /// record moved to its error state.
    Faulted,
}

struct Inner {
    document: StateDocument,
    dirty: bool,
    last_progress_write: HashMap<InfoHash, Instant>,
}

/// Concurrency-safe wrapper around the record map and its persistence.
///
/// Every state or error change is durable before the mutating call returns;
/// progress updates persist opportunistically under a throttle.
pub struct RecordRegistry {
    store: StateStore,
    progress_interval: Duration,
    inner: Mutex<Inner>,
}

impl RecordRegistry {
    /// Hydrate the registry from the store's snapshot.
    #[must_use]
    pub fn open(store: StateStore, progress_interval: Duration) -> Self {
        let document = store.load();
        Self {
            store,
            progress_interval,
            inner: Mutex::new(Inner {
                document,
                dirty: false,
                last_progress_write: HashMap::new(),
            }),
        }
    }

    /// Run a mutating closure over the record map under the driver lock.
    /// The closure sets `changed` when it mutated anything; an untouched map
    /// leaves the snapshot clean so idle ticks write nothing.
    pub fn with_records<R>(
        &self,
        f: impl FnOnce(&mut BTreeMap<InfoHash, TorrentRecord>, &mut bool) -> R,
    ) -> R {
        let mut inner = self.lock();
        let mut changed = false;
        let result = f(&mut inner.document.torrents, &mut changed);
        if changed {
            inner.dirty = true;
        }
        result
    }

    /// Run a read-only closure over the record map.
    pub fn read<R>(&self, f: impl FnOnce(&BTreeMap<InfoHash, TorrentRecord>) -> R) -> R {
        let inner = self.lock();
        f(&inner.document.torrents)
    }

    /// Clone of every tracked record, for concurrent observers.
    #[must_use]
    pub fn records(&self) -> Vec<TorrentRecord> {
        self.read(|records| records.values().cloned().collect())
    }

    /// Number of tracked records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read(BTreeMap::len)
    }

    /// Whether no records are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply a lifecycle transition and persist it before returning.
    ///
    /// Returns `false` when the record is already in the requested state.
    ///
    /// # Errors
    ///
    /// Returns an error when the record is unknown, the transition is not in
    /// the lifecycle table, or the snapshot cannot be written.
    pub fn transition(&self, hash: &InfoHash, to: TorrentState) -> StoreResult<bool> {
        let mut inner = self.lock();
        let record = inner
            .document
            .torrents
            .get_mut(hash)
            .ok_or_else(|| StoreError::Missing {
                hash: hash.to_string(),
            })?;
        let from = record.state;
        if from == to {
            return Ok(false);
        }
        if !from.permits(to) {
            return Err(StoreError::IllegalTransition {
                hash: hash.to_string(),
                from,
                to,
            });
        }
        record.state = to;
        Self::save_locked(&self.store, &mut inner)?;
        Ok(true)
    }

    /// Persist the snapshot when anything changed since the last save.
    ///
    /// # Errors
    ///
    /// Returns an error when the snapshot cannot be written.
    pub fn persist_if_dirty(&self) -> StoreResult<bool> {
        let mut inner = self.lock();
        if !inner.dirty {
            return Ok(false);
        }
        Self::save_locked(&self.store, &mut inner)?;
        Ok(true)
    }

    /// Publish copy progress for a record. The in-memory view is always
    /// refreshed as a whole value; disk writes are throttled and
    /// best-effort.
    pub fn publish_progress(&self, hash: &InfoHash, view: ProgressView) {
        let mut inner = self.lock();
        let Some(record) = inner.document.torrents.get_mut(hash) else {
            return;
        };
        record.progress = view;
        inner.dirty = true;

        let due = inner
            .last_progress_write
            .get(hash)
            .is_none_or(|last| last.elapsed() >= self.progress_interval);
        if due {
            inner.last_progress_write.insert(hash.clone(), Instant::now());
            if let Err(err) = Self::save_locked(&self.store, &mut inner) {
                warn!(hash = %hash, error = %err, "progress snapshot write failed");
            }
        }
    }

    /// Mark a copy job as landed: the record moves to its copied state.
    ///
    /// # Errors
    ///
    /// Returns an error when the record is unknown, not in a copying state,
    /// or the snapshot cannot be written.
    pub fn finish_copy(&self, hash: &InfoHash) -> StoreResult<()> {
        self.transition(hash, TorrentState::Copied)?;
        Ok(())
    }

    /// Record a copy-job failure. Retryable failures consume one attempt and
    /// leave the record in its copying state for the driver to re-enqueue;
    /// a spent budget or a non-retryable fault moves it to its error state.
    ///
    /// # Errors
    ///
    /// Returns an error when the record is unknown or the snapshot cannot
    /// be written.
    pub fn fail_copy(
        &self,
        hash: &InfoHash,
        fault: TorrentFault,
        retry_limit: u32,
    ) -> StoreResult<CopyFailureOutcome> {
        let mut inner = self.lock();
        let record = inner
            .document
            .torrents
            .get_mut(hash)
            .ok_or_else(|| StoreError::Missing {
                hash: hash.to_string(),
            })?;

        record.copy_attempts = record.copy_attempts.saturating_add(1);
        let spent = record.copy_attempts >= retry_limit;
        let retryable = fault.kind == FaultKind::CopyFailed && !spent;

        let outcome = if retryable {
            CopyFailureOutcome::WillRetry {
                attempts: record.copy_attempts,
            }
        } else {
            record.state = TorrentState::Error;
            record.error = Some(fault);
            CopyFailureOutcome::Faulted
        };
        Self::save_locked(&self.store, &mut inner)?;
        Ok(outcome)
    }

    /// Operator intervention: clear a record's fault and return it to the
    /// locate path with a fresh retry budget. Returns `false` when the hash
    /// is not tracked.
    ///
    /// # Errors
    ///
    /// Returns an error when the snapshot cannot be written.
    pub fn clear_fault(&self, hash: &InfoHash) -> StoreResult<bool> {
        let mut inner = self.lock();
        let Some(record) = inner.document.torrents.get_mut(hash) else {
            return Ok(false);
        };
        record.error = None;
        record.copy_attempts = 0;
        record.state = TorrentState::Unclaimed;
        Self::save_locked(&self.store, &mut inner)?;
        Ok(true)
    }

    /// Operator intervention: drop a record outright. Returns `false` when
    /// the hash is not tracked.
    ///
    /// # Errors
    ///
    /// Returns an error when the snapshot cannot be written.
    pub fn purge(&self, hash: &InfoHash) -> StoreResult<bool> {
        let mut inner = self.lock();
        if inner.document.torrents.remove(hash).is_none() {
            return Ok(false);
        }
        Self::save_locked(&self.store, &mut inner)?;
        Ok(true)
    }

    fn save_locked(store: &StateStore, inner: &mut Inner) -> StoreResult<()> {
        store.save(&inner.document)?;
        inner.dirty = false;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("record registry mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use transferarr_core::ManagerKind;

    fn hash() -> InfoHash {
        InfoHash::new("ab0123456789abcdef0123456789abcdef012345").expect("hash")
    }

    fn registry(dir: &TempDir) -> RecordRegistry {
        RecordRegistry::open(StateStore::new(dir.path()), Duration::from_secs(3600))
    }

    fn seed(registry: &RecordRegistry, state: TorrentState) {
        registry.with_records(|records, changed| {
            let mut record = TorrentRecord::queued(hash(), "X", ManagerKind::Movies, "42");
            record.state = state;
            records.insert(record.hash.clone(), record);
            *changed = true;
        });
        registry.persist_if_dirty().expect("seed persist");
    }

    #[test]
    fn transition_is_durable_before_return() {
        let dir = TempDir::new().expect("tempdir");
        let registry = registry(&dir);
        seed(&registry, TorrentState::ManagerQueued);

        let changed = registry
            .transition(&hash(), TorrentState::HomeDownloading)
            .expect("legal transition");
        assert!(changed);

        let reloaded = StateStore::new(dir.path()).load();
        assert_eq!(
            reloaded.torrents[&hash()].state,
            TorrentState::HomeDownloading
        );
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let registry = registry(&dir);
        seed(&registry, TorrentState::ManagerQueued);

        let err = registry
            .transition(&hash(), TorrentState::Copying)
            .expect_err("queued records cannot start copying");
        assert!(matches!(err, StoreError::IllegalTransition { .. }));
    }

    #[test]
    fn unknown_record_is_reported() {
        let dir = TempDir::new().expect("tempdir");
        let registry = registry(&dir);
        let err = registry
            .transition(&hash(), TorrentState::Unclaimed)
            .expect_err("nothing tracked");
        assert!(matches!(err, StoreError::Missing { .. }));
    }

    #[test]
    fn copy_failures_respect_the_retry_budget() {
        let dir = TempDir::new().expect("tempdir");
        let registry = registry(&dir);
        seed(&registry, TorrentState::Copying);

        for attempt in 1..3 {
            let outcome = registry
                .fail_copy(
                    &hash(),
                    TorrentFault::now(FaultKind::CopyFailed, "stream reset"),
                    3,
                )
                .expect("failure recorded");
            assert_eq!(outcome, CopyFailureOutcome::WillRetry { attempts: attempt });
        }

        let outcome = registry
            .fail_copy(
                &hash(),
                TorrentFault::now(FaultKind::CopyFailed, "stream reset"),
                3,
            )
            .expect("failure recorded");
        assert_eq!(outcome, CopyFailureOutcome::Faulted);

        let record = registry.records().remove(0);
        assert_eq!(record.state, TorrentState::Error);
        assert_eq!(record.copy_attempts, 3);
        assert!(record.error.is_some());
    }

    #[test]
    fn missing_metainfo_faults_immediately() {
        let dir = TempDir::new().expect("tempdir");
        let registry = registry(&dir);
        seed(&registry, TorrentState::Copying);

        let outcome = registry
            .fail_copy(
                &hash(),
                TorrentFault::now(FaultKind::MetainfoMissing, "no .torrent on source"),
                3,
            )
            .expect("failure recorded");
        assert_eq!(outcome, CopyFailureOutcome::Faulted);
        let record = registry.records().remove(0);
        assert_eq!(record.error.as_ref().map(|fault| fault.kind), Some(FaultKind::MetainfoMissing));
    }

    #[test]
    fn progress_updates_memory_immediately_and_disk_lazily() {
        let dir = TempDir::new().expect("tempdir");
        let registry = registry(&dir);
        seed(&registry, TorrentState::Copying);

        let first = ProgressView {
            current_file_index: 1,
            total_files: 2,
            current_file_name: "a.mkv".into(),
            bytes_done: 10,
            bytes_total: 100,
            transfer_bps: 5,
        };
        registry.publish_progress(&hash(), first.clone());

        // First publish lands on disk; the follow-up stays in memory because
        // the one-hour throttle has not elapsed.
        let mut second = first.clone();
        second.bytes_done = 50;
        registry.publish_progress(&hash(), second.clone());

        let on_disk = StateStore::new(dir.path()).load();
        assert_eq!(on_disk.torrents[&hash()].progress, first);
        assert_eq!(registry.records().remove(0).progress, second);
    }

    #[test]
    fn clearing_a_fault_resets_the_retry_budget() {
        let dir = TempDir::new().expect("tempdir");
        let registry = registry(&dir);
        seed(&registry, TorrentState::Copying);
        for _ in 0..3 {
            registry
                .fail_copy(
                    &hash(),
                    TorrentFault::now(FaultKind::CopyFailed, "stream reset"),
                    3,
                )
                .expect("failure recorded");
        }

        assert!(registry.clear_fault(&hash()).expect("fault cleared"));
        let record = registry.records().remove(0);
        assert_eq!(record.state, TorrentState::Unclaimed);
        assert_eq!(record.copy_attempts, 0);
        assert!(record.error.is_none());
    }

    #[test]
    fn purge_drops_untracked_hashes_quietly() {
        let dir = TempDir::new().expect("tempdir");
        let registry = registry(&dir);
        seed(&registry, TorrentState::ManagerQueued);

        assert!(registry.purge(&hash()).expect("record purged"));
        assert!(!registry.purge(&hash()).expect("second purge is a no-op"));
        assert!(registry.is_empty());
    }

    #[test]
    fn persist_if_dirty_skips_clean_state() {
        let dir = TempDir::new().expect("tempdir");
        let registry = registry(&dir);
        seed(&registry, TorrentState::ManagerQueued);

        assert!(!registry.persist_if_dirty().expect("clean after seed"));
        registry.with_records(|records, _changed| {
            let _ = records.len();
        });
        assert!(
            !registry.persist_if_dirty().expect("still clean"),
            "a read-only pass must not dirty the snapshot"
        );

        registry.with_records(|records, changed| {
            records.get_mut(&hash()).expect("seeded record").name = "renamed".into();
            *changed = true;
        });
        assert!(registry.persist_if_dirty().expect("dirty after rename"));
    }
}
