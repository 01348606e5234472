use std::env;
use std::path::{Path, PathBuf};

use directories::BaseDirs;

use super::{CacheError, PersistentKey};

pub const CACHE_DIR_ENV: &str = "SHADERCACHE_DIR";

/// Root of the persistent cache: `$SHADERCACHE_DIR`, else the user's cache
/// directory.
pub fn default_cache_root() -> Result<PathBuf, CacheError> {
    if let Ok(custom) = env::var(CACHE_DIR_ENV) {
        return Ok(PathBuf::from(custom));
    }

    let base_dirs = BaseDirs::new().ok_or(CacheError::NoCacheDir)?;
    Ok(base_dirs.cache_dir().join("shadercache"))
}

/// Entries fan out over 256 subdirectories keyed by the first hex byte.
pub fn entry_path(root: &Path, key: &PersistentKey) -> PathBuf {
    let hex = key.to_hex();
    let (bucket, rest) = hex.split_at(2);
    root.join(bucket).join(rest)
}

pub fn ensure_structure(root: &Path) -> Result<(), CacheError> {
    std::fs::create_dir_all(root).map_err(|source| CacheError::Io {
        path: root.to_path_buf(),
        source,
    })
}
