//! Source/destination transport pair with the copy semantics workers rely
//! on: skip-if-size-matches, streamed copies with progress callbacks, and a
//! single reconnect-and-retry per file.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{TransportError, TransportResult};
use crate::Transport;

const COPY_BUFFER_BYTES: usize = 128 * 1024;

/// One file discovered under a payload root, with its path relative to that
/// root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// Path relative to the walked root.
    pub relative_path: PathBuf,
    /// Size in bytes.
    pub size: u64,
}

/// What a single-file copy did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    /// Bytes were streamed to the destination.
    Copied {
        /// Bytes written.
        bytes: u64,
    },
    /// The destination already held a file of identical size; nothing was
    /// transferred. Keeps restarts from re-sending terabytes.
    SkippedExisting {
        /// Size of the existing file.
        bytes: u64,
    },
}

/// A worker's exclusive pair of transport sessions for one copy job.
pub struct TransferRoute {
    source: Box<dyn Transport>,
    destination: Box<dyn Transport>,
}

impl TransferRoute {
    /// Pair a source and destination transport.
    #[must_use]
    pub fn new(source: Box<dyn Transport>, destination: Box<dyn Transport>) -> Self {
        Self {
            source,
            destination,
        }
    }

    /// Source-side transport.
    pub fn source(&mut self) -> &mut dyn Transport {
        self.source.as_mut()
    }

    /// Destination-side transport.
    pub fn destination(&mut self) -> &mut dyn Transport {
        self.destination.as_mut()
    }

    /// Recursively collect every file under `root` with root-relative paths.
    /// A plain file yields a single entry with its file name.
    ///
    /// # Errors
    ///
    /// Returns an error when the root does not exist or a listing fails.
    pub fn collect_files(&mut self, root: &Path) -> TransportResult<Vec<RemoteFile>> {
        let meta = self.source.stat(root)?.ok_or_else(|| {
            TransportError::io(
                "collect_files",
                root,
                std::io::Error::new(std::io::ErrorKind::NotFound, "source path missing"),
            )
        })?;

        let mut files = Vec::new();
        if meta.is_dir {
            self.walk(root, &PathBuf::new(), &mut files)?;
        } else {
            let name = root
                .file_name()
                .map_or_else(|| PathBuf::from("payload"), PathBuf::from);
            files.push(RemoteFile {
                relative_path: name,
                size: meta.size,
            });
        }
        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        Ok(files)
    }

    fn walk(
        &mut self,
        absolute: &Path,
        relative: &Path,
        files: &mut Vec<RemoteFile>,
    ) -> TransportResult<()> {
        for entry in self.source.list_dir(absolute)? {
            let child_abs = absolute.join(&entry.name);
            let child_rel = relative.join(&entry.name);
            if entry.is_dir {
                self.walk(&child_abs, &child_rel, files)?;
            } else {
                files.push(RemoteFile {
                    relative_path: child_rel,
                    size: entry.size,
                });
            }
        }
        Ok(())
    }

    /// Copy one file, skipping it when the destination already has the same
    /// size. On failure both sessions are re-established and the file is
    /// retried once from byte zero before the error propagates.
    ///
    /// The progress callback receives `(bytes_copied, bytes_total)`.
    ///
    /// # Errors
    ///
    /// Returns an error when the copy fails twice.
    pub fn copy_file(
        &mut self,
        from: &Path,
        to: &Path,
        progress: &mut dyn FnMut(u64, u64),
    ) -> TransportResult<CopyOutcome> {
        match self.copy_file_once(from, to, progress) {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                warn!(
                    from = %from.display(),
                    to = %to.display(),
                    error = %err,
                    "file copy failed; reconnecting sessions for one retry"
                );
                self.source.reconnect()?;
                self.destination.reconnect()?;
                self.copy_file_once(from, to, progress)
            }
        }
    }

    fn copy_file_once(
        &mut self,
        from: &Path,
        to: &Path,
        progress: &mut dyn FnMut(u64, u64),
    ) -> TransportResult<CopyOutcome> {
        let source_meta = self.source.stat(from)?.ok_or_else(|| {
            TransportError::io(
                "copy_file",
                from,
                std::io::Error::new(std::io::ErrorKind::NotFound, "source file missing"),
            )
        })?;

        if let Some(existing) = self.destination.stat(to)? {
            if !existing.is_dir && existing.size == source_meta.size {
                debug!(
                    to = %to.display(),
                    bytes = existing.size,
                    "destination already complete; skipping"
                );
                progress(existing.size, existing.size);
                return Ok(CopyOutcome::SkippedExisting {
                    bytes: existing.size,
                });
            }
        }

        if let Some(parent) = to.parent() {
            if !parent.as_os_str().is_empty() {
                self.destination.create_dir_all(parent)?;
            }
        }

        let mut reader = self.source.open_read(from)?;
        let mut writer = self.destination.open_write(to)?;
        let total = source_meta.size;
        let mut copied: u64 = 0;
        let mut buffer = vec![0u8; COPY_BUFFER_BYTES];
        loop {
            let read = reader
                .read(&mut buffer)
                .map_err(|err| TransportError::io("copy_file", from, err))?;
            if read == 0 {
                break;
            }
            writer
                .write_all(&buffer[..read])
                .map_err(|err| TransportError::io("copy_file", to, err))?;
            copied += read as u64;
            progress(copied, total);
        }
        writer
            .flush()
            .map_err(|err| TransportError::io("copy_file", to, err))?;
        Ok(CopyOutcome::Copied { bytes: copied })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalTransport;
    use std::fs;
    use tempfile::TempDir;

    fn local_route() -> TransferRoute {
        TransferRoute::new(
            Box::new(LocalTransport::new()),
            Box::new(LocalTransport::new()),
        )
    }

    #[test]
    fn copies_a_file_and_reports_progress() {
        let dir = TempDir::new().expect("tempdir");
        let from = dir.path().join("src.bin");
        let to = dir.path().join("out").join("dst.bin");
        fs::write(&from, vec![7u8; 300_000]).expect("write source");

        let mut observed = Vec::new();
        let outcome = local_route()
            .copy_file(&from, &to, &mut |done, total| observed.push((done, total)))
            .expect("copy succeeds");

        assert_eq!(outcome, CopyOutcome::Copied { bytes: 300_000 });
        assert_eq!(fs::read(&to).expect("dest bytes").len(), 300_000);
        assert_eq!(observed.last(), Some(&(300_000, 300_000)));
        assert!(observed.len() >= 2, "large copies report incrementally");
    }

    #[test]
    fn equal_sized_destination_is_skipped() {
        let dir = TempDir::new().expect("tempdir");
        let from = dir.path().join("src.bin");
        let to = dir.path().join("dst.bin");
        fs::write(&from, b"0123456789").expect("write source");
        fs::write(&to, b"abcdefghij").expect("write dest");

        let outcome = local_route()
            .copy_file(&from, &to, &mut |_, _| {})
            .expect("copy succeeds");

        assert_eq!(outcome, CopyOutcome::SkippedExisting { bytes: 10 });
        assert_eq!(fs::read(&to).expect("dest bytes"), b"abcdefghij");
    }

    #[test]
    fn size_mismatch_rewrites_the_destination() {
        let dir = TempDir::new().expect("tempdir");
        let from = dir.path().join("src.bin");
        let to = dir.path().join("dst.bin");
        fs::write(&from, b"full-payload").expect("write source");
        fs::write(&to, b"half").expect("write dest");

        let outcome = local_route()
            .copy_file(&from, &to, &mut |_, _| {})
            .expect("copy succeeds");

        assert_eq!(outcome, CopyOutcome::Copied { bytes: 12 });
        assert_eq!(fs::read(&to).expect("dest bytes"), b"full-payload");
    }

    #[test]
    fn collect_files_walks_nested_directories() {
        let dir = TempDir::new().expect("tempdir");
        let root = dir.path().join("Show.S01");
        fs::create_dir_all(root.join("Sample")).expect("mkdirs");
        fs::write(root.join("e1.mkv"), b"one").expect("write");
        fs::write(root.join("Sample").join("s.mkv"), b"s").expect("write");

        let files = local_route().collect_files(&root).expect("collect");
        let paths: Vec<_> = files
            .iter()
            .map(|file| file.relative_path.to_string_lossy().into_owned())
            .collect();
        assert_eq!(paths, vec!["Sample/s.mkv".to_string(), "e1.mkv".to_string()]);
    }

    #[test]
    fn collect_files_handles_single_file_payloads() {
        let dir = TempDir::new().expect("tempdir");
        let file = dir.path().join("movie.mkv");
        fs::write(&file, b"bytes").expect("write");

        let files = local_route().collect_files(&file).expect("collect");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_path, PathBuf::from("movie.mkv"));
        assert_eq!(files[0].size, 5);
    }

    #[test]
    fn missing_source_is_an_error() {
        let dir = TempDir::new().expect("tempdir");
        let err = local_route()
            .copy_file(
                &dir.path().join("absent"),
                &dir.path().join("out"),
                &mut |_, _| {},
            )
            .expect_err("missing source");
        assert!(matches!(err, TransportError::Io { .. }));
    }
}
