//! Blob storage for user uploads.
//!
//! Files are addressed by a relative, slash-separated name such as
//! `profile/01J….png`. Names are checked before touching the filesystem: no
//! absolute paths, no `..`, no empty segments, no backslashes.

use async_trait::async_trait;
use std::{
    io::ErrorKind,
    path::{Component, Path, PathBuf},
};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid file name: {0}")]
    InvalidName(String),
    #[error("storage failure: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait Storer: Send + Sync {
    /// Write `bytes` to `name`, creating parent directories and replacing any
    /// existing file.
    async fn write(&self, name: &str, bytes: &[u8]) -> Result<(), StorageError>;

    /// `None` when no file exists under `name`.
    async fn read(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Remove `name`. Missing files are not an error.
    async fn remove(&self, name: &str) -> Result<(), StorageError>;
}

/// Files under a root directory.
#[derive(Clone, Debug)]
pub struct FsStorer {
    root: PathBuf,
}

impl FsStorer {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, StorageError> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }

    /// Remove empty directories from `dir` upwards, stopping at the root.
    async fn prune_empty_parents(&self, mut dir: Option<&Path>) {
        while let Some(current) = dir {
            if current == self.root || !current.starts_with(&self.root) {
                break;
            }
            // Fails on non-empty directories, which ends the walk.
            if tokio::fs::remove_dir(current).await.is_err() {
                break;
            }
            dir = current.parent();
        }
    }
}

#[async_trait]
impl Storer for FsStorer {
    async fn write(&self, name: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        debug!(name, size = bytes.len(), "Stored file");
        Ok(())
    }

    async fn read(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.path_for(name)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Ok(None),
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        }
        Ok(Some(tokio::fs::read(&path).await?))
    }

    async fn remove(&self, name: &str) -> Result<(), StorageError> {
        let path = self.path_for(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        }
        self.prune_empty_parents(path.parent()).await;
        Ok(())
    }
}

/// Accept only plain relative names.
///
/// # Errors
/// `StorageError::InvalidName` for anything that could escape the root.
pub fn validate_name(name: &str) -> Result<(), StorageError> {
    let invalid = || StorageError::InvalidName(name.to_string());
    if name.is_empty() || name.contains('\\') || name.contains('\0') {
        return Err(invalid());
    }
    if name.split('/').any(str::is_empty) {
        return Err(invalid());
    }
    if Path::new(name)
        .components()
        .any(|component| !matches!(component, Component::Normal(_)))
    {
        return Err(invalid());
    }
    Ok(())
}

/// `Content-Type` for a stored file, from its extension.
#[must_use]
pub fn content_type(name: &str) -> &'static str {
    let extension = Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}
