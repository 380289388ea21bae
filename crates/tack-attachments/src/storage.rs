//! Storage
//!
//! Files are never written or deleted when an attachment changes. Instead the
//! [`StorageQueue`] collects the operations and commits them on `flush`,
//! removals first, then stores. The bytes are moved by a [`StorageBackend`].

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Permissions given to every stored file
pub const STORED_FILE_MODE: u32 = 0o644;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("File not found: {0}")]
    NotFound(PathBuf),
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid path: {0}")]
    InvalidPath(PathBuf),
}

impl StorageError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Moves bytes once the queue tells it to
#[cfg_attr(test, mockall::automock)]
pub trait StorageBackend: Send + Sync {
    /// Check if something is stored at `path`
    fn exists(&self, path: &Path) -> bool;

    /// Delete whatever is stored at `path`
    fn delete(&self, path: &Path) -> StorageResult<()>;

    /// Copy the local file `source` to `destination`
    fn put(&self, source: &Path, destination: &Path) -> StorageResult<()>;

    /// Backend name for logging
    fn name(&self) -> &'static str;
}

/// Local filesystem backend
#[derive(Debug, Clone, Default)]
pub struct FilesystemBackend;

impl FilesystemBackend {
    pub fn new() -> Self {
        Self
    }

    /// Ensure parent directory exists
    fn ensure_parent(path: &Path) -> StorageResult<()> {
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))
            }
            _ => Ok(()),
        }
    }

    #[cfg(unix)]
    fn normalize_permissions(path: &Path) -> StorageResult<()> {
        use std::os::unix::fs::PermissionsExt;

        fs::set_permissions(path, fs::Permissions::from_mode(STORED_FILE_MODE))
            .map_err(|e| StorageError::io(path, e))
    }

    #[cfg(not(unix))]
    fn normalize_permissions(path: &Path) -> StorageResult<()> {
        let mut permissions = fs::metadata(path)
            .map_err(|e| StorageError::io(path, e))?
            .permissions();
        permissions.set_readonly(false);
        fs::set_permissions(path, permissions).map_err(|e| StorageError::io(path, e))
    }
}

impl StorageBackend for FilesystemBackend {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn delete(&self, path: &Path) -> StorageResult<()> {
        fs::remove_file(path).map_err(|e| StorageError::io(path, e))?;
        debug!(path = ?path, "File deleted");
        Ok(())
    }

    fn put(&self, source: &Path, destination: &Path) -> StorageResult<()> {
        if destination.as_os_str().is_empty() {
            return Err(StorageError::InvalidPath(destination.to_path_buf()));
        }
        Self::ensure_parent(destination)?;
        fs::copy(source, destination).map_err(|e| StorageError::io(source, e))?;
        Self::normalize_permissions(destination)?;
        debug!(source = ?source, destination = ?destination, "File stored");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "filesystem"
    }
}

/// In-memory backend for testing and embedding
#[derive(Debug, Default)]
pub struct MemoryBackend {
    files: RwLock<HashMap<PathBuf, Bytes>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes stored at `path`
    pub fn get(&self, path: impl AsRef<Path>) -> Option<Bytes> {
        self.files.read().get(path.as_ref()).cloned()
    }

    /// Pre-populate `path`, bypassing the queue
    pub fn insert(&self, path: impl Into<PathBuf>, data: impl Into<Bytes>) {
        self.files.write().insert(path.into(), data.into());
    }

    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }
}

impl StorageBackend for MemoryBackend {
    fn exists(&self, path: &Path) -> bool {
        self.files.read().contains_key(path)
    }

    fn delete(&self, path: &Path) -> StorageResult<()> {
        self.files
            .write()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(path.to_path_buf()))
    }

    fn put(&self, source: &Path, destination: &Path) -> StorageResult<()> {
        let data = fs::read(source).map_err(|e| StorageError::io(source, e))?;
        self.files
            .write()
            .insert(destination.to_path_buf(), Bytes::from(data));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

impl<B: StorageBackend + ?Sized> StorageBackend for std::sync::Arc<B> {
    fn exists(&self, path: &Path) -> bool {
        (**self).exists(path)
    }

    fn delete(&self, path: &Path) -> StorageResult<()> {
        (**self).delete(path)
    }

    fn put(&self, source: &Path, destination: &Path) -> StorageResult<()> {
        (**self).put(source, destination)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// A pending store: local source file and where it goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub source: PathBuf,
    pub destination: PathBuf,
}

impl StoredFile {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }
}

/// Queued store and remove operations, committed together on [`flush`].
///
/// [`flush`]: StorageQueue::flush
pub struct StorageQueue {
    backend: Box<dyn StorageBackend>,
    queue_for_storage: Vec<StoredFile>,
    queue_for_removal: Vec<PathBuf>,
    stored: Vec<StoredFile>,
    removed: Vec<PathBuf>,
}

impl StorageQueue {
    pub fn new(backend: Box<dyn StorageBackend>) -> Self {
        Self {
            backend,
            queue_for_storage: Vec::new(),
            queue_for_removal: Vec::new(),
            stored: Vec::new(),
            removed: Vec::new(),
        }
    }

    pub fn filesystem() -> Self {
        Self::new(Box::new(FilesystemBackend::new()))
    }

    pub fn backend(&self) -> &dyn StorageBackend {
        self.backend.as_ref()
    }

    /// Whether there are files waiting to be stored or removed
    pub fn is_dirty(&self) -> bool {
        !self.queue_for_storage.is_empty() || !self.queue_for_removal.is_empty()
    }

    /// Queues `source` to be stored at `destination`
    pub fn store(&mut self, source: impl Into<PathBuf>, destination: impl Into<PathBuf>) {
        self.queue_for_storage.push(StoredFile::new(source, destination));
    }

    /// Queues `path` for removal
    pub fn remove(&mut self, path: impl Into<PathBuf>) {
        self.queue_for_removal.push(path.into());
    }

    /// Files stored by the last flush
    pub fn stored(&self) -> &[StoredFile] {
        &self.stored
    }

    /// Paths removed by the last flush
    pub fn removed(&self) -> &[PathBuf] {
        &self.removed
    }

    pub fn pending_storage(&self) -> &[StoredFile] {
        &self.queue_for_storage
    }

    pub fn pending_removal(&self) -> &[PathBuf] {
        &self.queue_for_removal
    }

    /// Removes, then stores, everything queued.
    ///
    /// A failing operation does not stop the others. Both queues are emptied,
    /// `stored` and `removed` list only what succeeded, and the first error
    /// is returned.
    #[instrument(
        skip(self),
        fields(
            backend = self.backend.name(),
            removals = self.queue_for_removal.len(),
            stores = self.queue_for_storage.len()
        )
    )]
    pub fn flush(&mut self) -> StorageResult<()> {
        let removals = std::mem::take(&mut self.queue_for_removal);
        let stores = std::mem::take(&mut self.queue_for_storage);
        self.removed.clear();
        self.stored.clear();
        let mut first_error = None;

        for path in removals {
            if !self.backend.exists(&path) {
                debug!(path = ?path, "Nothing to remove");
            } else if let Err(e) = self.backend.delete(&path) {
                warn!(path = ?path, error = %e, "Removal failed");
                first_error = first_error.or(Some(e));
                continue;
            }
            self.removed.push(path);
        }

        for file in stores {
            if let Err(e) = self.backend.put(&file.source, &file.destination) {
                warn!(destination = ?file.destination, error = %e, "Store failed");
                first_error = first_error.or(Some(e));
                continue;
            }
            self.stored.push(file);
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        info!(
            removed = self.removed.len(),
            stored = self.stored.len(),
            "Storage flushed"
        );
        Ok(())
    }
}

impl std::fmt::Debug for StorageQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageQueue")
            .field("backend", &self.backend.name())
            .field("queue_for_storage", &self.queue_for_storage)
            .field("queue_for_removal", &self.queue_for_removal)
            .field("stored", &self.stored)
            .field("removed", &self.removed)
            .finish()
    }
}
