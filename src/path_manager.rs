// src/path_manager.rs
use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PathError {
    #[error("Failed to create directory: {0}")]
    CreateDirFailed(String),
    #[error("Invalid document name: {0}")]
    InvalidName(String),
}

/// Cache layout:
///
/// ```text
/// <base>/files/<document name>
/// <base>/embeddings/<document name>/<chunk key>
/// ```
#[derive(Debug, Clone)]
pub struct PathManager {
    base_dir: PathBuf,
    files_dir: PathBuf,
    embeddings_dir: PathBuf,
}

impl PathManager {
    /// Resolve the base directory from `TRPG_CACHE_DIR`, falling back to `./.cache`.
    pub fn from_env() -> Result<Self, PathError> {
        let base = env::var("TRPG_CACHE_DIR").unwrap_or_else(|_| ".cache".to_string());
        Self::with_base(base)
    }

    pub fn with_base<P: Into<PathBuf>>(base: P) -> Result<Self, PathError> {
        let base_dir = base.into();
        let files_dir = base_dir.join("files");
        let embeddings_dir = base_dir.join("embeddings");

        Self::ensure_dir(&files_dir)?;
        Self::ensure_dir(&embeddings_dir)?;

        Ok(Self {
            base_dir,
            files_dir,
            embeddings_dir,
        })
    }

    fn ensure_dir(path: &Path) -> Result<(), PathError> {
        if !path.exists() {
            std::fs::create_dir_all(path)
                .map_err(|e| PathError::CreateDirFailed(format!("{}: {}", path.display(), e)))?;
        }
        Ok(())
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn files_dir(&self) -> &Path {
        &self.files_dir
    }

    /// Where the raw bytes of `name` are persisted.
    pub fn file_path(&self, name: &str) -> Result<PathBuf, PathError> {
        Ok(self.files_dir.join(sanitize_name(name)?))
    }

    /// Embedding cache directory for `name`, created on demand.
    pub fn embeddings_path(&self, name: &str) -> Result<PathBuf, PathError> {
        let dir = self.embeddings_dir.join(sanitize_name(name)?);
        Self::ensure_dir(&dir)?;
        Ok(dir)
    }
}

/// Keep only the final path component so uploads cannot escape the cache.
pub fn sanitize_name(name: &str) -> Result<&str, PathError> {
    Path::new(name)
        .file_name()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .ok_or_else(|| PathError::InvalidName(name.to_string()))
}
