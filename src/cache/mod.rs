//! Content-addressed binary cache.
//!
//! Compiled artifacts are keyed by a digest of the program that produced
//! them. The in-memory layer is shared process-wide; an optional
//! [`PersistentStore`] keeps them across runs.

pub mod digest;
pub mod disk;
pub mod memory;
pub mod path;

pub use digest::{CACHE_FORMAT_VERSION, PersistentKey, ProgramDigest};
pub use disk::{DiskCache, DiskEntry, PersistentStore};
pub use memory::{BinaryCache, CacheStats, InsertOutcome};
pub use path::{CACHE_DIR_ENV, default_cache_root};

use std::io;
use std::path::PathBuf;

use crate::binary::CodecError;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Entry bytes failed validation.
    #[error("corrupt cache entry: {0}")]
    Codec(#[from] CodecError),

    #[error("invalid cache key '{0}'")]
    InvalidKey(String),

    #[error("no cache directory available; set SHADERCACHE_DIR")]
    NoCacheDir,
}
