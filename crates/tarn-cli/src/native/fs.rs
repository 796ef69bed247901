//! Project folder on the local disk.

use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use std::path::{Path, PathBuf};
use tarn::runtime::{AccessMode, DirEntry, FsError, FsResult, Permission, ProjectFs};

/// A [`ProjectFs`] rooted at a directory.
///
/// Permission is granted while the root can be listed. Paths arrive
/// normalized, so nothing outside the root is reachable by `..`.
#[derive(Debug, Clone)]
pub struct NativeFs {
    root: PathBuf,
}

impl NativeFs {
    /// Root the filesystem at `root`, made absolute and cleaned.
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref();
        let absolute = if root.is_absolute() {
            root.to_path_buf()
        } else {
            std::env::current_dir()?.join(root)
        };
        Ok(Self {
            root: path_clean::clean(absolute),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, path: &str) -> PathBuf {
        if path.is_empty() {
            self.root.clone()
        } else {
            self.root.join(path)
        }
    }
}

fn fs_error(path: &str, err: io::Error) -> FsError {
    match err.kind() {
        io::ErrorKind::NotFound => FsError::NotFound(path.to_string()),
        io::ErrorKind::PermissionDenied => FsError::PermissionDenied(path.to_string()),
        _ => FsError::Io(format!("{path}: {err}")),
    }
}

#[async_trait]
impl ProjectFs for NativeFs {
    fn name(&self) -> String {
        self.root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.root.display().to_string())
    }

    async fn exists(&self, path: &str) -> bool {
        tokio::fs::metadata(self.path(path)).await.is_ok()
    }

    async fn read_binary(&self, path: &str) -> FsResult<Bytes> {
        let target = self.path(path);
        let metadata = tokio::fs::metadata(&target)
            .await
            .map_err(|e| fs_error(path, e))?;
        if metadata.is_dir() {
            return Err(FsError::NotFound(path.to_string()));
        }
        tokio::fs::read(&target)
            .await
            .map(Bytes::from)
            .map_err(|e| fs_error(path, e))
    }

    async fn write_text(&self, path: &str, contents: &str) -> FsResult<()> {
        let target = self.path(path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| fs_error(path, e))?;
        }
        tokio::fs::write(&target, contents)
            .await
            .map_err(|e| fs_error(path, e))
    }

    async fn list(&self, path: &str) -> FsResult<Vec<DirEntry>> {
        let mut dir = tokio::fs::read_dir(self.path(path))
            .await
            .map_err(|e| fs_error(path, e))?;
        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(|e| fs_error(path, e))? {
            let name = entry.file_name().to_string_lossy().into_owned();
            // Follows symlinks, so linked folders list as directories.
            let is_dir = tokio::fs::metadata(entry.path())
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false);
            entries.push(if is_dir {
                DirEntry::directory(name)
            } else {
                DirEntry::file(name)
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn query_permission(&self, _mode: AccessMode) -> Permission {
        match tokio::fs::read_dir(&self.root).await {
            Ok(_) => Permission::Granted,
            Err(_) => Permission::Denied,
        }
    }

    async fn request_permission(&self, mode: AccessMode) -> Permission {
        self.query_permission(mode).await
    }
}
