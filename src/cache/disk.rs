use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tempfile::NamedTempFile;
use tracing::debug;

use super::path::{ensure_structure, entry_path};
use super::{CacheError, PersistentKey};

/// Optional disk-backed key/value layer under the in-memory cache.
///
/// Entries are content-addressed and never rewritten, so implementations
/// need no locking of their own beyond what the filesystem provides.
pub trait PersistentStore: Send + Sync {
    fn get(&self, key: &PersistentKey) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store `data` under `key`. Writing a key that already exists is a no-op.
    fn put(&self, key: &PersistentKey, data: &[u8]) -> Result<(), CacheError>;

    /// Returns whether an entry was removed.
    fn remove(&self, key: &PersistentKey) -> Result<bool, CacheError>;
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> CacheError + '_ {
    move |source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// One file in the disk cache.
#[derive(Debug, Clone)]
pub struct DiskEntry {
    pub key: PersistentKey,
    pub path: PathBuf,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

/// Filesystem store, one file per entry under `<root>/<xx>/<rest-of-hex>`.
#[derive(Debug, Clone)]
pub struct DiskCache {
    root: PathBuf,
}

impl DiskCache {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        ensure_structure(&root)?;
        debug!(root = %root.display(), "disk cache opened");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_path(&self, key: &PersistentKey) -> PathBuf {
        entry_path(&self.root, key)
    }

    /// Every well-formed entry currently on disk. Stray files are skipped.
    pub fn entries(&self) -> Result<Vec<DiskEntry>, CacheError> {
        let mut entries = Vec::new();
        for bucket in fs::read_dir(&self.root).map_err(io_error(&self.root))? {
            let bucket = bucket.map_err(io_error(&self.root))?;
            let bucket_name = bucket.file_name();
            let Some(prefix) = bucket_name.to_str() else {
                continue;
            };
            if prefix.len() != 2 || !bucket.path().is_dir() {
                continue;
            }

            let bucket_path = bucket.path();
            for file in fs::read_dir(&bucket_path).map_err(io_error(&bucket_path))? {
                let file = file.map_err(io_error(&bucket_path))?;
                let file_name = file.file_name();
                let Some(rest) = file_name.to_str() else {
                    continue;
                };
                let Ok(key) = PersistentKey::from_hex(&format!("{prefix}{rest}")) else {
                    continue;
                };
                let path = file.path();
                let metadata = file.metadata().map_err(io_error(&path))?;
                entries.push(DiskEntry {
                    key,
                    size: metadata.len(),
                    modified: metadata.modified().ok(),
                    path,
                });
            }
        }
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    /// Remove every entry; returns how many were removed.
    pub fn clear(&self) -> Result<usize, CacheError> {
        let entries = self.entries()?;
        for entry in &entries {
            fs::remove_file(&entry.path).map_err(io_error(&entry.path))?;
        }
        Ok(entries.len())
    }
}

impl PersistentStore for DiskCache {
    fn get(&self, key: &PersistentKey) -> Result<Option<Vec<u8>>, CacheError> {
        let path = self.entry_path(key);
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_error(&path)(err)),
        }
    }

    fn put(&self, key: &PersistentKey, data: &[u8]) -> Result<(), CacheError> {
        let path = self.entry_path(key);
        if path.exists() {
            return Ok(());
        }
        let Some(bucket) = path.parent() else {
            return Err(CacheError::InvalidKey(key.to_hex()));
        };
        fs::create_dir_all(bucket).map_err(io_error(bucket))?;

        // write to a sibling temp file and rename, so readers never see a
        // partially written entry
        let mut file = NamedTempFile::new_in(bucket).map_err(io_error(bucket))?;
        file.write_all(data).map_err(io_error(&path))?;
        file.persist(&path).map_err(|err| io_error(&path)(err.error))?;
        Ok(())
    }

    fn remove(&self, key: &PersistentKey) -> Result<bool, CacheError> {
        let path = self.entry_path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(io_error(&path)(err)),
        }
    }
}
