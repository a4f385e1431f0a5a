//! Copy-job description and the blocking job body.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, info};
use transferarr_config::{ConnectionConfig, TransferConfig};
use transferarr_core::{InfoHash, ProgressView, TorrentFileEntry, top_level_paths};
use transferarr_history::{HistorySink, TransferEvent};
use transferarr_store::RecordRegistry;
use transferarr_transport::{TransferRoute, create_transport};

use crate::speed::SpeedWindow;

/// Minimum interval between in-memory progress publications.
const PROGRESS_PUBLISH_INTERVAL: Duration = Duration::from_millis(500);

/// Runtime view of one configured connection.
#[derive(Debug, Clone)]
pub struct ConnectionProfile {
    /// Connection name from configuration.
    pub name: String,
    /// Source endpoint name.
    pub from: String,
    /// Target endpoint name.
    pub to: String,
    /// Transport descriptors for both sides.
    pub transfer: TransferConfig,
    /// Directory holding `.torrent` files on the source side.
    pub source_metainfo_dir: PathBuf,
    /// Payload root on the source side.
    pub source_payload_dir: PathBuf,
    /// Staging directory for `.torrent` files on the target side.
    pub target_metainfo_tmp_dir: PathBuf,
    /// Payload root on the target side.
    pub target_payload_dir: PathBuf,
}

impl ConnectionProfile {
    /// Build a profile from its configuration entry.
    #[must_use]
    pub fn from_config(name: impl Into<String>, config: &ConnectionConfig) -> Self {
        Self {
            name: name.into(),
            from: config.from.clone(),
            to: config.to.clone(),
            transfer: config.transfer_config.clone(),
            source_metainfo_dir: PathBuf::from(&config.source_metainfo_dir),
            source_payload_dir: PathBuf::from(&config.source_payload_dir),
            target_metainfo_tmp_dir: PathBuf::from(&config.target_metainfo_tmp_dir),
            target_payload_dir: PathBuf::from(&config.target_payload_dir),
        }
    }
}

/// One unit of work for the executor.
#[derive(Debug, Clone)]
pub struct CopyJob {
    /// Torrent identity.
    pub hash: InfoHash,
    /// Display name for logs and history.
    pub name: String,
    /// File listing snapshotted at enqueue time.
    pub files: Vec<TorrentFileEntry>,
    /// Total payload size reported by the home client.
    pub total_bytes: u64,
}

/// Metainfo staged on the target side, ready for the re-add call.
#[derive(Debug)]
pub struct StagedMetainfo {
    /// File name the metainfo was staged under.
    pub file_name: String,
    /// Raw metainfo bytes.
    pub bytes: Vec<u8>,
}

/// Why a job body gave up.
#[derive(Debug)]
pub enum JobFailure {
    /// A transport-level failure survived the per-file retry.
    Copy {
        /// Failure detail.
        detail: String,
    },
    /// The source `.torrent` file does not exist.
    MetainfoMissing {
        /// Path that was probed.
        path: PathBuf,
    },
    /// Shutdown was requested; the job stopped at a file boundary.
    Cancelled,
}

struct PlannedFile {
    from: PathBuf,
    to: PathBuf,
    size: u64,
}

/// Copy the payload and stage the metainfo. Blocking; run under a blocking
/// task. Progress is published into the registry and the history sink;
/// cancellation is honoured between files, never mid-file.
///
/// # Errors
///
/// Returns a [`JobFailure`] describing what went wrong; the caller maps it
/// onto record state.
pub fn run_copy(
    profile: &ConnectionProfile,
    job: &CopyJob,
    registry: &Arc<RecordRegistry>,
    history: &Arc<dyn HistorySink>,
    cancel: &AtomicBool,
) -> Result<StagedMetainfo, JobFailure> {
    let source = create_transport(&profile.transfer.from).map_err(|err| JobFailure::Copy {
        detail: format!("source transport: {err}"),
    })?;
    let destination = create_transport(&profile.transfer.to).map_err(|err| JobFailure::Copy {
        detail: format!("destination transport: {err}"),
    })?;
    let mut route = TransferRoute::new(source, destination);

    let plan = plan_files(&mut route, profile, job)?;
    let total_files = u32::try_from(plan.len()).unwrap_or(u32::MAX);
    info!(
        connection = %profile.name,
        hash = %job.hash,
        files = plan.len(),
        "copy job started"
    );

    let mut job_bytes_done: u64 = 0;
    let job_bytes_total: u64 = plan.iter().map(|file| file.size).sum();
    let mut speed = SpeedWindow::new();

    for (index, file) in plan.iter().enumerate() {
        if cancel.load(Ordering::Relaxed) {
            return Err(JobFailure::Cancelled);
        }

        let file_name = file
            .from
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let file_index = u32::try_from(index + 1).unwrap_or(u32::MAX);
        let base_bytes = job_bytes_done;
        let mut last_publish: Option<Instant> = None;

        route
            .copy_file(&file.from, &file.to, &mut |done, total| {
                let now = Instant::now();
                let throttled = last_publish
                    .is_some_and(|at| now.duration_since(at) < PROGRESS_PUBLISH_INTERVAL);
                if throttled && done < total {
                    return;
                }
                last_publish = Some(now);
                let transfer_bps = speed.observe(base_bytes + done);
                registry.publish_progress(
                    &job.hash,
                    ProgressView {
                        current_file_index: file_index,
                        total_files,
                        current_file_name: file_name.clone(),
                        bytes_done: done,
                        bytes_total: total,
                        transfer_bps,
                    },
                );
            })
            .map_err(|err| JobFailure::Copy {
                detail: err.to_string(),
            })?;

        job_bytes_done = base_bytes + file.size;
        history.record(TransferEvent::TransferProgress {
            hash: job.hash.clone(),
            bytes_done: job_bytes_done,
            bytes_total: job_bytes_total,
            speed_bps: speed.observe(job_bytes_done),
        });
    }

    stage_metainfo(&mut route, profile, &job.hash)
}

fn plan_files(
    route: &mut TransferRoute,
    profile: &ConnectionProfile,
    job: &CopyJob,
) -> Result<Vec<PlannedFile>, JobFailure> {
    let mut plan = Vec::new();
    for top in top_level_paths(&job.files) {
        let from_root = profile.source_payload_dir.join(&top);
        let meta = route
            .source()
            .stat(&from_root)
            .map_err(|err| JobFailure::Copy {
                detail: err.to_string(),
            })?
            .ok_or_else(|| JobFailure::Copy {
                detail: format!("source payload missing: {}", from_root.display()),
            })?;

        if meta.is_dir {
            let files = route.collect_files(&from_root).map_err(|err| JobFailure::Copy {
                detail: err.to_string(),
            })?;
            let to_root = profile.target_payload_dir.join(&top);
            for file in files {
                plan.push(PlannedFile {
                    from: from_root.join(&file.relative_path),
                    to: to_root.join(&file.relative_path),
                    size: file.size,
                });
            }
        } else {
            plan.push(PlannedFile {
                to: profile.target_payload_dir.join(&top),
                from: from_root,
                size: meta.size,
            });
        }
    }
    Ok(plan)
}

fn stage_metainfo(
    route: &mut TransferRoute,
    profile: &ConnectionProfile,
    hash: &InfoHash,
) -> Result<StagedMetainfo, JobFailure> {
    let file_name = format!("{hash}.torrent");
    let source_path = profile.source_metainfo_dir.join(&file_name);

    let present = route
        .source()
        .stat(&source_path)
        .map_err(|err| JobFailure::Copy {
            detail: err.to_string(),
        })?
        .is_some();
    if !present {
        return Err(JobFailure::MetainfoMissing { path: source_path });
    }

    let bytes = route
        .source()
        .read_file(&source_path)
        .map_err(|err| JobFailure::Copy {
            detail: err.to_string(),
        })?;

    let staged_path = profile.target_metainfo_tmp_dir.join(&file_name);
    route
        .destination()
        .create_dir_all(&profile.target_metainfo_tmp_dir)
        .and_then(|()| route.destination().write_file(&staged_path, &bytes))
        .map_err(|err| JobFailure::Copy {
            detail: err.to_string(),
        })?;

    debug!(hash = %hash, staged = %staged_path.display(), "metainfo staged on target");
    Ok(StagedMetainfo { file_name, bytes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;
    use transferarr_config::TransferDescriptor;
    use transferarr_core::{ManagerKind, TorrentRecord, TorrentState};
    use transferarr_history::NullSink;
    use transferarr_store::StateStore;

    fn hash() -> InfoHash {
        InfoHash::new("ab0123456789abcdef0123456789abcdef012345").expect("hash")
    }

    fn local_profile(root: &TempDir) -> ConnectionProfile {
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

    fn seeded_registry(root: &TempDir) -> Arc<RecordRegistry> {
        let registry = Arc::new(RecordRegistry::open(
            StateStore::new(root.path()),
            Duration::from_secs(3600),
        ));
        registry.with_records(|records, changed| {
            let mut record = TorrentRecord::queued(hash(), "Show.S01", ManagerKind::Series, "7");
            record.state = TorrentState::Copying;
            records.insert(record.hash.clone(), record);
            *changed = true;
        });
        registry.persist_if_dirty().expect("seed persist");
        registry
    }

    fn lay_out_payload(profile: &ConnectionProfile) -> CopyJob {
        let payload = profile.source_payload_dir.join("Show.S01");
        fs::create_dir_all(&payload).expect("payload dirs");
        fs::write(payload.join("e1.mkv"), vec![1u8; 2048]).expect("e1");
        fs::write(payload.join("e2.mkv"), vec![2u8; 1024]).expect("e2");
        fs::create_dir_all(&profile.source_metainfo_dir).expect("metainfo dir");
        fs::write(
            profile
                .source_metainfo_dir
                .join(format!("{}.torrent", hash())),
            b"d4:infoe",
        )
        .expect("metainfo");

        CopyJob {
            hash: hash(),
            name: "Show.S01".into(),
            files: vec![
                TorrentFileEntry {
                    path: "Show.S01/e1.mkv".into(),
                    size_bytes: 2048,
                },
                TorrentFileEntry {
                    path: "Show.S01/e2.mkv".into(),
                    size_bytes: 1024,
                },
            ],
            total_bytes: 3072,
        }
    }

    #[test]
    fn copies_payload_and_stages_metainfo() {
        let root = TempDir::new().expect("tempdir");
        let profile = local_profile(&root);
        let job = lay_out_payload(&profile);
        let registry = seeded_registry(&root);
        let history: Arc<dyn HistorySink> = Arc::new(NullSink);
        let cancel = AtomicBool::new(false);

        let staged =
            run_copy(&profile, &job, &registry, &history, &cancel).expect("job succeeds");

        assert_eq!(staged.file_name, format!("{}.torrent", hash()));
        assert_eq!(staged.bytes, b"d4:infoe");
        let copied_root = profile.target_payload_dir.join("Show.S01");
        assert_eq!(fs::read(copied_root.join("e1.mkv")).expect("e1").len(), 2048);
        assert_eq!(fs::read(copied_root.join("e2.mkv")).expect("e2").len(), 1024);
        assert!(profile
            .target_metainfo_tmp_dir
            .join(format!("{}.torrent", hash()))
            .exists());

        let record = registry.records().remove(0);
        assert_eq!(record.progress.total_files, 2);
        assert_eq!(record.progress.current_file_index, 2);
    }

    #[test]
    fn missing_metainfo_is_its_own_failure() {
        let root = TempDir::new().expect("tempdir");
        let profile = local_profile(&root);
        let job = lay_out_payload(&profile);
        fs::remove_file(
            profile
                .source_metainfo_dir
                .join(format!("{}.torrent", hash())),
        )
        .expect("drop metainfo");
        let registry = seeded_registry(&root);
        let history: Arc<dyn HistorySink> = Arc::new(NullSink);
        let cancel = AtomicBool::new(false);

        let failure = run_copy(&profile, &job, &registry, &history, &cancel)
            .expect_err("metainfo is gone");
        assert!(matches!(failure, JobFailure::MetainfoMissing { .. }));
    }

    #[test]
    fn cancellation_stops_at_a_file_boundary() {
        let root = TempDir::new().expect("tempdir");
        let profile = local_profile(&root);
        let job = lay_out_payload(&profile);
        let registry = seeded_registry(&root);
        let history: Arc<dyn HistorySink> = Arc::new(NullSink);
        let cancel = AtomicBool::new(true);

        let failure =
            run_copy(&profile, &job, &registry, &history, &cancel).expect_err("cancelled");
        assert!(matches!(failure, JobFailure::Cancelled));
        assert!(!profile.target_payload_dir.join("Show.S01").exists());
    }

    #[test]
    fn rerun_skips_files_already_at_full_size() {
        let root = TempDir::new().expect("tempdir");
        let profile = local_profile(&root);
        let job = lay_out_payload(&profile);
        let registry = seeded_registry(&root);
        let history: Arc<dyn HistorySink> = Arc::new(NullSink);
        let cancel = AtomicBool::new(false);

        run_copy(&profile, &job, &registry, &history, &cancel).expect("first run");
        let copied = profile.target_payload_dir.join("Show.S01").join("e1.mkv");
        let before = fs::metadata(&copied).expect("meta").modified().expect("mtime");

        run_copy(&profile, &job, &registry, &history, &cancel).expect("second run");
        let after = fs::metadata(&copied).expect("meta").modified().expect("mtime");
        assert_eq!(before, after, "complete files are not rewritten");
    }
}
