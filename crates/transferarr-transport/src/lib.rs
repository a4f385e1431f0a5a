#![forbid(unsafe_code)]

//! Unified file access over the local filesystem and SFTP.
//!
//! One [`Transport`] session belongs to exactly one transfer worker; sessions
//! are never shared. Layout: `local.rs`, `sftp.rs`, `route.rs` (source plus
//! destination pair with retry semantics), `error.rs`.

pub mod error;
pub mod local;
pub mod route;
pub mod sftp;

use std::io::{Read, Write};
use std::path::Path;

use transferarr_config::TransferDescriptor;

pub use error::{TransportError, TransportResult};
pub use local::LocalTransport;
pub use route::{CopyOutcome, RemoteFile, TransferRoute};
pub use sftp::{SftpSettings, SftpTransport};

/// Metadata for a single path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryMeta {
    /// Size in bytes; zero for directories on transports that do not report
    /// directory sizes.
    pub size: u64,
    /// Whether the path is a directory.
    pub is_dir: bool,
}

/// One directory-listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Entry name without its parent path.
    pub name: String,
    /// Whether the entry is a directory.
    pub is_dir: bool,
    /// Size in bytes for files.
    pub size: u64,
}

/// Blocking file access over one side of a copy route.
///
/// Implementations own their session exclusively; `&mut self` reflects that a
/// transport is never shared between workers.
pub trait Transport: Send {
    /// Short tag for logs (`local`, `sftp`).
    fn kind(&self) -> &'static str;

    /// Metadata for a path, or `None` when it does not exist.
    fn stat(&mut self, path: &Path) -> TransportResult<Option<EntryMeta>>;

    /// Entries of a directory.
    fn list_dir(&mut self, path: &Path) -> TransportResult<Vec<DirEntry>>;

    /// Open a file for streaming reads.
    fn open_read(&mut self, path: &Path) -> TransportResult<Box<dyn Read + Send>>;

    /// Open (create or truncate) a file for streaming writes.
    fn open_write(&mut self, path: &Path) -> TransportResult<Box<dyn Write + Send>>;

    /// Create a directory and any missing parents.
    fn create_dir_all(&mut self, path: &Path) -> TransportResult<()>;

    /// Tear down and re-establish the underlying session. A no-op for
    /// transports without one.
    fn reconnect(&mut self) -> TransportResult<()>;

    /// Read an entire file into memory. Intended for small payloads such as
    /// metainfo files.
    fn read_file(&mut self, path: &Path) -> TransportResult<Vec<u8>> {
        let mut reader = self.open_read(path)?;
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .map_err(|source| TransportError::io("read_file", path, source))?;
        Ok(bytes)
    }

    /// Write an entire file from memory.
    fn write_file(&mut self, path: &Path, bytes: &[u8]) -> TransportResult<()> {
        let mut writer = self.open_write(path)?;
        writer
            .write_all(bytes)
            .map_err(|source| TransportError::io("write_file", path, source))?;
        writer
            .flush()
            .map_err(|source| TransportError::io("write_file", path, source))?;
        Ok(())
    }
}

/// Build the transport for one side of a connection's transfer descriptor.
///
/// # Errors
///
/// Returns an error when an SSH config alias cannot be resolved. The session
/// itself is established lazily on first use.
pub fn create_transport(descriptor: &TransferDescriptor) -> TransportResult<Box<dyn Transport>> {
    match descriptor {
        TransferDescriptor::Local => Ok(Box::new(LocalTransport::new())),
        TransferDescriptor::Sftp { sftp } => {
            let settings = SftpSettings::from_addressing(sftp)?;
            Ok(Box::new(SftpTransport::new(settings)))
        }
    }
}
