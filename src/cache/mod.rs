// src/cache/mod.rs
// Byte-level key/value stores backing the embedding cache.

pub mod local_file_store;
pub use local_file_store::LocalFileStore;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Invalid cache key: {0}")]
    InvalidKey(String),
    #[error("Cache IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Batched get/set over opaque byte values.
pub trait ByteStore: Send + Sync {
    /// One entry per key, `None` where the key is absent.
    fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, CacheError>;
    fn mset(&self, items: Vec<(String, Vec<u8>)>) -> Result<(), CacheError>;
    fn mdelete(&self, keys: &[String]) -> Result<(), CacheError>;
    fn stats(&self) -> CacheStats;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
