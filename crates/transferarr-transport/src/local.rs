//! Local-filesystem transport.

use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use crate::error::{TransportError, TransportResult};
use crate::{DirEntry, EntryMeta, Transport};

/// Transport whose paths live on the local filesystem.
#[derive(Debug, Default)]
pub struct LocalTransport;

impl LocalTransport {
    /// A new local transport; no session is involved.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Transport for LocalTransport {
    fn kind(&self) -> &'static str {
        "local"
    }

    fn stat(&mut self, path: &Path) -> TransportResult<Option<EntryMeta>> {
        match fs::metadata(path) {
            Ok(meta) => Ok(Some(EntryMeta {
                size: meta.len(),
                is_dir: meta.is_dir(),
            })),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(TransportError::io("stat", path, err)),
        }
    }

    fn list_dir(&mut self, path: &Path) -> TransportResult<Vec<DirEntry>> {
        let mut entries = Vec::new();
        let reader = fs::read_dir(path).map_err(|err| TransportError::io("list_dir", path, err))?;
        for entry in reader {
            let entry = entry.map_err(|err| TransportError::io("list_dir", path, err))?;
            let meta = entry
                .metadata()
                .map_err(|err| TransportError::io("list_dir", &entry.path(), err))?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: meta.is_dir(),
                size: meta.len(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn open_read(&mut self, path: &Path) -> TransportResult<Box<dyn Read + Send>> {
        let file = fs::File::open(path).map_err(|err| TransportError::io("open_read", path, err))?;
        Ok(Box::new(file))
    }

    fn open_write(&mut self, path: &Path) -> TransportResult<Box<dyn Write + Send>> {
        let file =
            fs::File::create(path).map_err(|err| TransportError::io("open_write", path, err))?;
        Ok(Box::new(file))
    }

    fn create_dir_all(&mut self, path: &Path) -> TransportResult<()> {
        fs::create_dir_all(path).map_err(|err| TransportError::io("create_dir_all", path, err))
    }

    fn reconnect(&mut self) -> TransportResult<()> {
        Ok(())
    }
}
