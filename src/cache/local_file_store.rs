// src/cache/local_file_store.rs
use super::{ByteStore, CacheError, CacheStats};
use regex::Regex;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use tracing::debug;

/// One file per key under a root directory.
pub struct LocalFileStore {
    root: PathBuf,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
}

fn key_pattern() -> &'static Regex {
    static KEY: OnceLock<Regex> = OnceLock::new();
    KEY.get_or_init(|| Regex::new(r"^[a-zA-Z0-9_.\-]+$").expect("static regex"))
}

impl LocalFileStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Result<Self, CacheError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        debug!(root = %root.display(), "Opened local file store");
        Ok(Self {
            root,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_path(&self, key: &str) -> Result<PathBuf, CacheError> {
        if !key_pattern().is_match(key) || key == "." || key == ".." {
            return Err(CacheError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(key))
    }
}

impl ByteStore for LocalFileStore {
    fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, CacheError> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            match fs::read(self.key_path(key)?) {
                Ok(bytes) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    values.push(Some(bytes));
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    values.push(None);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(values)
    }

    fn mset(&self, items: Vec<(String, Vec<u8>)>) -> Result<(), CacheError> {
        for (key, value) in items {
            let path = self.key_path(&key)?;
            // Write then rename so readers never see a half-written entry.
            let tmp = path.with_extension("tmp");
            fs::write(&tmp, &value)?;
            fs::rename(&tmp, &path)?;
            self.writes.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn mdelete(&self, keys: &[String]) -> Result<(), CacheError> {
        for key in keys {
            match fs::remove_file(self.key_path(key)?) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }
}
