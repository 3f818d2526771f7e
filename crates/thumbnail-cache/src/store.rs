//! Write-once disk store for encoded thumbnails
//!
//! Entries are published atomically: bytes are written to a temporary file
//! inside the cache root and then linked into place without clobbering, so
//! readers only ever see complete files and the first writer wins.

use crate::error::{Result, ThumbnailError};
use crate::path::{CachePathResolver, ContentId};
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

/// Result of a [`DiskCacheStore::write`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// Another writer published this id first; the stored bytes are kept.
    AlreadyExists,
}

#[derive(Debug, Clone)]
pub struct DiskCacheStore {
    resolver: CachePathResolver,
}

impl DiskCacheStore {
    pub fn new(resolver: CachePathResolver) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &CachePathResolver {
        &self.resolver
    }

    pub fn exists(&self, id: &ContentId) -> bool {
        self.resolver
            .resolve(id)
            .map(|path| path.is_file())
            .unwrap_or(false)
    }

    /// Read a cached thumbnail; `Ok(None)` when nothing is stored yet
    pub fn read(&self, id: &ContentId) -> Result<Option<Vec<u8>>> {
        let path = self.resolver.resolve(id)?;
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ThumbnailError::io(path, e)),
        }
    }

    /// Publish a thumbnail unless one is already stored for `id`
    pub fn write(&self, id: &ContentId, data: &[u8]) -> Result<WriteOutcome> {
        let path = self.resolver.resolve(id)?;
        if path.is_file() {
            return Ok(WriteOutcome::AlreadyExists);
        }

        let outcome = publish(self.resolver.root(), &path, data)?;
        match outcome {
            WriteOutcome::Written => {
                debug!(id = %id, path = %path.display(), bytes = data.len(), "published thumbnail");
            }
            WriteOutcome::AlreadyExists => {
                debug!(id = %id, "thumbnail already published by a concurrent writer");
            }
        }
        Ok(outcome)
    }
}

/// Temp-file-then-link publish of `data` at `path`, staging inside `dir`
fn publish(dir: &Path, path: &Path, data: &[u8]) -> Result<WriteOutcome> {
    fs::create_dir_all(dir).map_err(|e| ThumbnailError::io(dir, e))?;

    let mut temp = NamedTempFile::new_in(dir).map_err(|e| ThumbnailError::io(dir, e))?;
    write_all_synced(&mut temp, data).map_err(|e| ThumbnailError::io(temp.path(), e))?;

    match temp.persist_noclobber(path) {
        Ok(_) => Ok(WriteOutcome::Written),
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(WriteOutcome::AlreadyExists),
        Err(e) => Err(ThumbnailError::io(path, e.error)),
    }
}

fn write_all_synced(temp: &mut NamedTempFile, data: &[u8]) -> io::Result<()> {
    temp.write_all(data)?;
    temp.flush()?;
    temp.as_file().sync_all()
}

/// Write `data` to `path` only if nothing exists there yet.
///
/// Used by the placeholder tooling, which publishes outside the cache root.
pub fn write_new_file(path: &Path, data: &[u8]) -> Result<WriteOutcome> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    publish(dir, path, data)
}
