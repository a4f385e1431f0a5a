//! Bounded per-connection worker pool.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tracing::{error, info, warn};
use transferarr_core::{AddMetainfo, DownloadClient, FaultKind, InfoHash, TorrentFault};
use transferarr_history::{HistorySink, TransferEvent};
use transferarr_store::{CopyFailureOutcome, RecordRegistry};

use crate::job::{ConnectionProfile, CopyJob, JobFailure, run_copy};

/// Knobs for one executor.
#[derive(Debug, Clone, Copy)]
pub struct ExecutorOptions {
    /// Concurrent workers; also the number of jobs accepted before
    /// backpressure.
    pub workers: usize,
    /// Copy attempts allowed over the lifetime of a record.
    pub copy_retry_limit: u32,
}

/// Worker pool owned by one configured connection.
///
/// The driver is the only enqueuer; a hash is never in flight twice. When
/// every worker slot is taken the driver leaves the record seeding and tries
/// again next tick.
pub struct TransferExecutor {
    profile: Arc<ConnectionProfile>,
    queue: mpsc::Sender<CopyJob>,
    inflight: Arc<Mutex<HashSet<InfoHash>>>,
    cancel: Arc<AtomicBool>,
    workers: usize,
    dispatcher: JoinHandle<()>,
}

impl TransferExecutor {
    /// Start the pool for a connection.
    #[must_use]
    pub fn spawn(
        profile: ConnectionProfile,
        target: Arc<dyn DownloadClient>,
        registry: Arc<RecordRegistry>,
        history: Arc<dyn HistorySink>,
        options: ExecutorOptions,
    ) -> Self {
        let workers = options.workers.max(1);
        let profile = Arc::new(profile);
        let (queue, receiver) = mpsc::channel(workers);
        let inflight = Arc::new(Mutex::new(HashSet::new()));
        let cancel = Arc::new(AtomicBool::new(false));

        let dispatcher = tokio::spawn(dispatch(
            receiver,
            Arc::new(Semaphore::new(workers)),
            Arc::clone(&profile),
            target,
            registry,
            history,
            Arc::clone(&inflight),
            Arc::clone(&cancel),
            options.copy_retry_limit,
        ));

        Self {
            profile,
            queue,
            inflight,
            cancel,
            workers,
            dispatcher,
        }
    }

    /// The connection this executor serves.
    #[must_use]
    pub fn profile(&self) -> &ConnectionProfile {
        &self.profile
    }

    /// Whether a job for this hash is queued or running.
    #[must_use]
    pub fn is_inflight(&self, hash: &InfoHash) -> bool {
        self.lock_inflight().contains(hash)
    }

    /// Whether a new job would be accepted right now.
    #[must_use]
    pub fn has_capacity(&self) -> bool {
        self.available_slots() > 0
    }

    /// Worker slots free right now. The driver subtracts jobs it has decided
    /// on but not yet enqueued within the same reconciliation pass.
    #[must_use]
    pub fn available_slots(&self) -> usize {
        self.workers.saturating_sub(self.lock_inflight().len())
    }

    /// Accept a job unless the pool is saturated or the hash is already in
    /// flight. Only the driver calls this.
    #[must_use]
    pub fn try_enqueue(&self, job: CopyJob) -> bool {
        let mut inflight = self.lock_inflight();
        if inflight.len() >= self.workers || inflight.contains(&job.hash) {
            return false;
        }
        let hash = job.hash.clone();
        match self.queue.try_send(job) {
            Ok(()) => {
                inflight.insert(hash);
                true
            }
            Err(err) => {
                warn!(
                    connection = %self.profile.name,
                    hash = %hash,
                    error = %err,
                    "copy job rejected by executor queue"
                );
                false
            }
        }
    }

    /// Stop accepting work and wait for in-flight jobs up to the deadline.
    /// Jobs that outlive the deadline observe the cancellation flag at their
    /// next file boundary and their records retry on the next start.
    pub async fn shutdown(self, deadline: Duration) {
        self.cancel.store(true, Ordering::Relaxed);
        let Self {
            profile,
            queue,
            dispatcher,
            inflight,
            ..
        } = self;
        drop(queue);
        if timeout(deadline, dispatcher).await.is_err() {
            let stranded: Vec<String> = inflight
                .lock()
                .expect("executor inflight mutex poisoned")
                .iter()
                .map(ToString::to_string)
                .collect();
            warn!(
                connection = %profile.name,
                stranded = ?stranded,
                "shutdown deadline exceeded; in-flight copies resume on next start"
            );
        } else {
            info!(connection = %profile.name, "executor drained");
        }
    }

    fn lock_inflight(&self) -> std::sync::MutexGuard<'_, HashSet<InfoHash>> {
        self.inflight.lock().expect("executor inflight mutex poisoned")
    }
}

#[allow(clippy::too_many_arguments)]
async fn dispatch(
    mut receiver: mpsc::Receiver<CopyJob>,
    slots: Arc<Semaphore>,
    profile: Arc<ConnectionProfile>,
    target: Arc<dyn DownloadClient>,
    registry: Arc<RecordRegistry>,
    history: Arc<dyn HistorySink>,
    inflight: Arc<Mutex<HashSet<InfoHash>>>,
    cancel: Arc<AtomicBool>,
    copy_retry_limit: u32,
) {
    let mut running = JoinSet::new();
    while let Some(job) = receiver.recv().await {
        let permit = match Arc::clone(&slots).acquire_owned().await {
            Ok(permit) => permit,
            Err(_closed) => break,
        };
        let task_profile = Arc::clone(&profile);
        let task_target = Arc::clone(&target);
        let task_registry = Arc::clone(&registry);
        let task_history = Arc::clone(&history);
        let task_inflight = Arc::clone(&inflight);
        let task_cancel = Arc::clone(&cancel);
        running.spawn(async move {
            let hash = job.hash.clone();
            execute(
                task_profile,
                job,
                task_target,
                &task_registry,
                &task_history,
                task_cancel,
                copy_retry_limit,
            )
            .await;
            task_inflight
                .lock()
                .expect("executor inflight mutex poisoned")
                .remove(&hash);
            drop(permit);
        });
    }
    while running.join_next().await.is_some() {}
}

async fn execute(
    profile: Arc<ConnectionProfile>,
    job: CopyJob,
    target: Arc<dyn DownloadClient>,
    registry: &Arc<RecordRegistry>,
    history: &Arc<dyn HistorySink>,
    cancel: Arc<AtomicBool>,
    copy_retry_limit: u32,
) {
    let hash = job.hash.clone();
    history.record(TransferEvent::TransferStarted {
        hash: hash.clone(),
        name: job.name.clone(),
        from: profile.from.clone(),
        to: profile.to.clone(),
        size_bytes: job.total_bytes,
    });

    let blocking = {
        let profile = Arc::clone(&profile);
        let registry = Arc::clone(registry);
        let history = Arc::clone(history);
        tokio::task::spawn_blocking(move || {
            run_copy(&profile, &job, &registry, &history, &cancel)
        })
        .await
    };

    let result = match blocking {
        Ok(result) => result,
        Err(join_err) => Err(JobFailure::Copy {
            detail: format!("copy task aborted: {join_err}"),
        }),
    };

    match result {
        Ok(staged) => {
            let request = AddMetainfo {
                file_name: staged.file_name,
                bytes: staged.bytes,
                save_path: profile.target_payload_dir.display().to_string(),
                paused: false,
            };
            match target.add_metainfo(request).await {
                Ok(()) => match registry.finish_copy(&hash) {
                    Ok(()) => {
                        info!(connection = %profile.name, hash = %hash, "copy job completed");
                        history.record(TransferEvent::TransferCompleted { hash });
                    }
                    Err(err) => {
                        error!(hash = %hash, error = %err, "copied torrent could not be recorded");
                    }
                },
                Err(err) if err.is_transient() => {
                    record_failure(
                        registry,
                        history,
                        &hash,
                        TorrentFault::now(FaultKind::CopyFailed, err.to_string()),
                        copy_retry_limit,
                    );
                }
                Err(err) => {
                    record_failure(
                        registry,
                        history,
                        &hash,
                        TorrentFault::now(
                            FaultKind::AddRejected,
                            format!("target refused metainfo: {err}"),
                        ),
                        copy_retry_limit,
                    );
                }
            }
        }
        Err(JobFailure::Cancelled) => {
            // No attempt consumed; the record stays in its copying state and
            // the next start re-enqueues it.
            warn!(connection = %profile.name, hash = %hash, "copy job cancelled by shutdown");
        }
        Err(JobFailure::MetainfoMissing { path }) => {
            record_failure(
                registry,
                history,
                &hash,
                TorrentFault::now(
                    FaultKind::MetainfoMissing,
                    format!("metainfo not found at {}", path.display()),
                ),
                copy_retry_limit,
            );
        }
        Err(JobFailure::Copy { detail }) => {
            record_failure(
                registry,
                history,
                &hash,
                TorrentFault::now(FaultKind::CopyFailed, detail),
                copy_retry_limit,
            );
        }
    }
}

fn record_failure(
    registry: &Arc<RecordRegistry>,
    history: &Arc<dyn HistorySink>,
    hash: &InfoHash,
    fault: TorrentFault,
    copy_retry_limit: u32,
) {
    let reason = fault.message.clone();
    match registry.fail_copy(hash, fault, copy_retry_limit) {
        Ok(CopyFailureOutcome::WillRetry { attempts }) => {
            warn!(hash = %hash, attempts, reason = %reason, "copy job failed; will retry");
        }
        Ok(CopyFailureOutcome::Faulted) => {
            warn!(hash = %hash, reason = %reason, "copy job failed for good");
            history.record(TransferEvent::TransferFailed {
                hash: hash.clone(),
                reason,
            });
        }
        Err(err) => {
            error!(hash = %hash, error = %err, "copy failure could not be recorded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;
    use transferarr_config::{TransferConfig, TransferDescriptor};
    use transferarr_core::{
        ClientError, ClientResult, ManagerKind, TorrentFileEntry, TorrentRecord, TorrentSnapshot,
        TorrentState,
    };
    use transferarr_history::NullSink;
    use transferarr_store::StateStore;

    #[derive(Clone, Copy)]
    enum AddBehaviour {
        Succeed,
        Transient,
        Reject,
    }

    struct ScriptedTarget {
        behaviour: AddBehaviour,
        adds: Mutex<Vec<String>>,
    }

    impl ScriptedTarget {
        fn new(behaviour: AddBehaviour) -> Arc<Self> {
            Arc::new(Self {
                behaviour,
                adds: Mutex::new(Vec::new()),
            })
        }

        fn add_count(&self) -> usize {
            self.adds.lock().expect("adds mutex").len()
        }
    }

    #[async_trait]
    impl DownloadClient for ScriptedTarget {
        fn name(&self) -> &str {
            "dst"
        }

        async fn ensure_connected(&self) -> ClientResult<()> {
            Ok(())
        }

        async fn list(&self) -> ClientResult<HashMap<InfoHash, TorrentSnapshot>> {
            Ok(HashMap::new())
        }

        async fn add_metainfo(&self, request: AddMetainfo) -> ClientResult<()> {
            self.adds
                .lock()
                .expect("adds mutex")
                .push(request.file_name);
            match self.behaviour {
                AddBehaviour::Succeed => Ok(()),
                AddBehaviour::Transient => Err(ClientError::Timeout {
                    endpoint: "dst".into(),
                    operation: "add_metainfo",
                }),
                AddBehaviour::Reject => Err(ClientError::Rejected {
                    endpoint: "dst".into(),
                    operation: "add_metainfo",
                    detail: "invalid metainfo".into(),
                }),
            }
        }

        async fn remove(&self, _hash: &InfoHash, _delete_data: bool) -> ClientResult<()> {
            Ok(())
        }
    }

    fn hash() -> InfoHash {
        InfoHash::new("ab0123456789abcdef0123456789abcdef012345").expect("hash")
    }

    fn profile(root: &TempDir) -> ConnectionProfile {
        ConnectionProfile {
            name: "main".into(),
            from: "src".into(),
            to: "dst".into(),
            transfer: TransferConfig {
                from: TransferDescriptor::Local,
                to: TransferDescriptor::Local,
            },
            source_metainfo_dir: root.path().join("state"),
            source_payload_dir: root.path().join("downloads"),
            target_metainfo_tmp_dir: root.path().join("staging"),
            target_payload_dir: root.path().join("remote"),
        }
    }

    fn registry(root: &TempDir) -> Arc<RecordRegistry> {
        let registry = Arc::new(RecordRegistry::open(
            StateStore::new(root.path()),
            Duration::from_secs(3600),
        ));
        registry.with_records(|records, changed| {
            let mut record = TorrentRecord::queued(hash(), "movie", ManagerKind::Movies, "42");
            record.state = TorrentState::Copying;
            records.insert(record.hash.clone(), record);
            *changed = true;
        });
        registry.persist_if_dirty().expect("seed");
        registry
    }

    fn job(profile: &ConnectionProfile, with_metainfo: bool) -> CopyJob {
        fs::create_dir_all(&profile.source_payload_dir).expect("payload dir");
        fs::write(profile.source_payload_dir.join("movie.mkv"), vec![9u8; 512]).expect("payload");
        fs::create_dir_all(&profile.source_metainfo_dir).expect("metainfo dir");
        if with_metainfo {
            fs::write(
                profile
                    .source_metainfo_dir
                    .join(format!("{}.torrent", hash())),
                b"d4:infoe",
            )
            .expect("metainfo");
        }
        CopyJob {
            hash: hash(),
            name: "movie".into(),
            files: vec![TorrentFileEntry {
                path: "movie.mkv".into(),
                size_bytes: 512,
            }],
            total_bytes: 512,
        }
    }

    async fn wait_idle(executor: &TransferExecutor) {
        for _ in 0..200 {
            if !executor.is_inflight(&hash()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("executor never drained the job");
    }

    #[tokio::test]
    async fn successful_job_lands_as_copied() {
        let root = TempDir::new().expect("tempdir");
        let profile = profile(&root);
        let job = job(&profile, true);
        let registry = registry(&root);
        let target = ScriptedTarget::new(AddBehaviour::Succeed);
        let executor = TransferExecutor::spawn(
            profile,
            Arc::clone(&target) as Arc<dyn DownloadClient>,
            Arc::clone(&registry),
            Arc::new(NullSink),
            ExecutorOptions {
                workers: 1,
                copy_retry_limit: 3,
            },
        );

        assert!(executor.try_enqueue(job));
        wait_idle(&executor).await;

        assert_eq!(registry.records().remove(0).state, TorrentState::Copied);
        assert_eq!(target.add_count(), 1, "add is issued exactly once");
        executor.shutdown(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn saturated_pool_rejects_further_work() {
        let root = TempDir::new().expect("tempdir");
        let profile = profile(&root);
        let job_one = job(&profile, true);
        let mut job_two = job_one.clone();
        job_two.hash = InfoHash::new("cd0123456789abcdef0123456789abcdef012345").expect("hash");
        let registry = registry(&root);
        let target = ScriptedTarget::new(AddBehaviour::Succeed);
        let executor = TransferExecutor::spawn(
            profile,
            target as Arc<dyn DownloadClient>,
            registry,
            Arc::new(NullSink),
            ExecutorOptions {
                workers: 1,
                copy_retry_limit: 3,
            },
        );

        assert!(executor.try_enqueue(job_one));
        assert!(
            !executor.try_enqueue(job_two),
            "a single-worker pool holds one job at a time"
        );
        wait_idle(&executor).await;
        executor.shutdown(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn duplicate_hash_is_never_enqueued_twice() {
        let root = TempDir::new().expect("tempdir");
        let profile = profile(&root);
        let job_one = job(&profile, true);
        let job_dup = job_one.clone();
        let registry = registry(&root);
        let target = ScriptedTarget::new(AddBehaviour::Succeed);
        let executor = TransferExecutor::spawn(
            profile,
            target as Arc<dyn DownloadClient>,
            registry,
            Arc::new(NullSink),
            ExecutorOptions {
                workers: 3,
                copy_retry_limit: 3,
            },
        );

        assert!(executor.try_enqueue(job_one));
        assert!(!executor.try_enqueue(job_dup));
        wait_idle(&executor).await;
        executor.shutdown(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn missing_metainfo_faults_the_record() {
        let root = TempDir::new().expect("tempdir");
        let profile = profile(&root);
        let job = job(&profile, false);
        let registry = registry(&root);
        let target = ScriptedTarget::new(AddBehaviour::Succeed);
        let executor = TransferExecutor::spawn(
            profile,
            Arc::clone(&target) as Arc<dyn DownloadClient>,
            Arc::clone(&registry),
            Arc::new(NullSink),
            ExecutorOptions {
                workers: 1,
                copy_retry_limit: 3,
            },
        );

        assert!(executor.try_enqueue(job));
        wait_idle(&executor).await;

        let record = registry.records().remove(0);
        assert_eq!(record.state, TorrentState::Error);
        assert_eq!(
            record.error.map(|fault| fault.kind),
            Some(FaultKind::MetainfoMissing)
        );
        assert_eq!(target.add_count(), 0);
        executor.shutdown(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn transient_add_failure_leaves_the_record_retryable() {
        let root = TempDir::new().expect("tempdir");
        let profile = profile(&root);
        let job = job(&profile, true);
        let registry = registry(&root);
        let target = ScriptedTarget::new(AddBehaviour::Transient);
        let executor = TransferExecutor::spawn(
            profile,
            target as Arc<dyn DownloadClient>,
            Arc::clone(&registry),
            Arc::new(NullSink),
            ExecutorOptions {
                workers: 1,
                copy_retry_limit: 3,
            },
        );

        assert!(executor.try_enqueue(job));
        wait_idle(&executor).await;

        let record = registry.records().remove(0);
        assert_eq!(record.state, TorrentState::Copying);
        assert_eq!(record.copy_attempts, 1);
        assert!(record.error.is_none());
        executor.shutdown(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn rejected_add_faults_the_record_immediately() {
        let root = TempDir::new().expect("tempdir");
        let profile = profile(&root);
        let job = job(&profile, true);
        let registry = registry(&root);
        let target = ScriptedTarget::new(AddBehaviour::Reject);
        let executor = TransferExecutor::spawn(
            profile,
            target as Arc<dyn DownloadClient>,
            Arc::clone(&registry),
            Arc::new(NullSink),
            ExecutorOptions {
                workers: 1,
                copy_retry_limit: 3,
            },
        );

        assert!(executor.try_enqueue(job));
        wait_idle(&executor).await;

        let record = registry.records().remove(0);
        assert_eq!(record.state, TorrentState::Error);
        assert_eq!(
            record.error.map(|fault| fault.kind),
            Some(FaultKind::AddRejected)
        );
        executor.shutdown(Duration::from_secs(2)).await;
    }
}
