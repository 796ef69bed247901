//! Project filesystem access.
//!
//! A project is a directory tree reached through a capability handle. The
//! contract is deliberately narrow: existence checks, text and binary reads,
//! directory listing, and an explicit permission that can be queried and
//! requested. Permission is a property of the handle and must be checked
//! immediately before use; it can be revoked at any time.
//!
//! Paths are project-relative, `/`-separated and never start with `/`.
//! [`normalize_path`] is the single place that turns user input into that
//! form, rejecting anything that would escape the root.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Result type for filesystem operations
pub type FsResult<T> = Result<T, FsError>;

/// Errors reported by a [`ProjectFs`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FsError {
    /// No file or directory at the path
    #[error("File not found: {0}")]
    NotFound(String),

    /// The handle's permission is not granted
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The path escapes the root or is malformed
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// A text read hit bytes that are not UTF-8
    #[error("File is not valid UTF-8: {0}")]
    NotUtf8(String),

    /// Any other I/O failure
    #[error("I/O error: {0}")]
    Io(String),
}

/// Permission state of a directory handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Granted,
    Denied,
    Prompt,
}

impl Permission {
    pub fn is_granted(self) -> bool {
        matches!(self, Permission::Granted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Permission::Granted => "granted",
            Permission::Denied => "denied",
            Permission::Prompt => "prompt",
        }
    }
}

/// Access level a permission query or request is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    #[default]
    Read,
    ReadWrite,
}

/// Kind of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// One entry returned by [`ProjectFs::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
}

impl DirEntry {
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::File,
        }
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Directory,
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}

/// Filesystem capability for one project root.
///
/// All paths passed in are already normalized by [`DirectoryHandle`].
#[async_trait]
pub trait ProjectFs: Send + Sync + fmt::Debug {
    /// Display name of the root directory.
    fn name(&self) -> String;

    /// Whether a file or directory exists. Never fails; unreadable is absent.
    async fn exists(&self, path: &str) -> bool;

    /// Read a file's raw bytes.
    async fn read_binary(&self, path: &str) -> FsResult<Bytes>;

    /// Read a file as UTF-8 text.
    async fn read_text(&self, path: &str) -> FsResult<String> {
        let bytes = self.read_binary(path).await?;
        String::from_utf8(bytes.to_vec()).map_err(|_| FsError::NotUtf8(path.to_string()))
    }

    /// Replace a file's contents with text.
    async fn write_text(&self, path: &str, contents: &str) -> FsResult<()>;

    /// List the immediate children of a directory.
    async fn list(&self, path: &str) -> FsResult<Vec<DirEntry>>;

    /// Current permission state, without prompting.
    async fn query_permission(&self, mode: AccessMode) -> Permission;

    /// Ask for permission. May prompt the user.
    async fn request_permission(&self, mode: AccessMode) -> Permission;
}

/// Normalize a project-relative path.
///
/// Accepts `/` and `\` separators, drops `.` and empty segments and folds
/// `..` into its parent. Returns `None` when `..` would climb above the root.
pub fn normalize_path(path: &str) -> Option<String> {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            other => segments.push(other),
        }
    }
    Some(segments.join("/"))
}

/// Join `relative` onto `base`. A leading `/` in `relative` means the root.
pub fn join_path(base: &str, relative: &str) -> Option<String> {
    if relative.starts_with('/') {
        normalize_path(relative)
    } else if base.is_empty() {
        normalize_path(relative)
    } else {
        normalize_path(&format!("{base}/{relative}"))
    }
}

/// Directory portion of a normalized path (`""` for top-level files).
pub fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// A capability to a directory: a filesystem plus a base path inside it.
///
/// Cloning is cheap. Handles for subdirectories share the same permission
/// state as their root.
#[derive(Clone, Debug)]
pub struct DirectoryHandle {
    fs: Arc<dyn ProjectFs>,
    base: String,
}

impl DirectoryHandle {
    /// Handle to the root of `fs`.
    pub fn new(fs: Arc<dyn ProjectFs>) -> Self {
        Self {
            fs,
            base: String::new(),
        }
    }

    /// Handle to a subdirectory. Fails if the path escapes this handle.
    pub fn subdir(&self, path: &str) -> FsResult<Self> {
        Ok(Self {
            fs: Arc::clone(&self.fs),
            base: self.resolve(path)?,
        })
    }

    /// Base path of this handle inside its filesystem.
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Name shown to the user when asking for permission.
    pub fn name(&self) -> String {
        match self.base.rsplit('/').next() {
            Some(last) if !last.is_empty() => last.to_string(),
            _ => self.fs.name(),
        }
    }

    fn resolve(&self, path: &str) -> FsResult<String> {
        let relative = normalize_path(path).ok_or_else(|| FsError::InvalidPath(path.to_string()))?;
        Ok(match (self.base.is_empty(), relative.is_empty()) {
            (true, _) => relative,
            (false, true) => self.base.clone(),
            (false, false) => format!("{}/{}", self.base, relative),
        })
    }

    pub async fn exists(&self, path: &str) -> bool {
        match self.resolve(path) {
            Ok(resolved) => self.fs.exists(&resolved).await,
            Err(_) => false,
        }
    }

    /// Whether `path` names a file. Directories and unreadable paths do not.
    pub async fn is_file(&self, path: &str) -> bool {
        let Ok(resolved) = self.resolve(path) else {
            return false;
        };
        let (parent, name) = resolved.rsplit_once('/').unwrap_or(("", resolved.as_str()));
        if name.is_empty() {
            return false;
        }
        match self.fs.list(parent).await {
            Ok(entries) => entries.iter().any(|entry| entry.name == name && entry.is_file()),
            Err(_) => false,
        }
    }

    pub async fn read_binary(&self, path: &str) -> FsResult<Bytes> {
        let resolved = self.resolve(path)?;
        self.fs.read_binary(&resolved).await
    }

    pub async fn read_text(&self, path: &str) -> FsResult<String> {
        let resolved = self.resolve(path)?;
        self.fs.read_text(&resolved).await
    }

    pub async fn write_text(&self, path: &str, contents: &str) -> FsResult<()> {
        let resolved = self.resolve(path)?;
        self.fs.write_text(&resolved, contents).await
    }

    pub async fn list(&self, path: &str) -> FsResult<Vec<DirEntry>> {
        let resolved = self.resolve(path)?;
        self.fs.list(&resolved).await
    }

    pub async fn query_permission(&self, mode: AccessMode) -> Permission {
        self.fs.query_permission(mode).await
    }

    pub async fn request_permission(&self, mode: AccessMode) -> Permission {
        self.fs.request_permission(mode).await
    }

    /// Fail with [`FsError::PermissionDenied`] unless read access is granted.
    pub async fn ensure_readable(&self) -> FsResult<()> {
        match self.query_permission(AccessMode::Read).await {
            Permission::Granted => Ok(()),
            _ => Err(FsError::PermissionDenied(self.name())),
        }
    }
}

/// In-memory [`ProjectFs`] with a switchable permission.
#[derive(Debug)]
pub struct MemoryFs {
    name: String,
    files: RwLock<BTreeMap<String, Bytes>>,
    permission: RwLock<Permission>,
    request_result: RwLock<Permission>,
}

impl Default for MemoryFs {
    fn default() -> Self {
        Self::new("project")
    }
}

impl MemoryFs {
    /// Empty filesystem with read permission granted.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            files: RwLock::new(BTreeMap::new()),
            permission: RwLock::new(Permission::Granted),
            request_result: RwLock::new(Permission::Granted),
        }
    }

    /// Builder-style file insertion.
    pub fn with_file(self, path: &str, contents: impl Into<Bytes>) -> Self {
        self.insert(path, contents);
        self
    }

    /// Builder-style initial permission.
    pub fn with_permission(self, permission: Permission) -> Self {
        self.set_permission(permission);
        self
    }

    /// What a later [`ProjectFs::request_permission`] call resolves to.
    pub fn with_request_result(self, permission: Permission) -> Self {
        *self.request_result.write() = permission;
        self
    }

    pub fn insert(&self, path: &str, contents: impl Into<Bytes>) {
        if let Some(path) = normalize_path(path) {
            self.files.write().insert(path, contents.into());
        }
    }

    pub fn remove(&self, path: &str) -> bool {
        normalize_path(path)
            .map(|path| self.files.write().remove(&path).is_some())
            .unwrap_or(false)
    }

    pub fn set_permission(&self, permission: Permission) {
        *self.permission.write() = permission;
    }

    /// Wrap into a root [`DirectoryHandle`].
    pub fn into_handle(self) -> DirectoryHandle {
        DirectoryHandle::new(Arc::new(self))
    }

    fn check(&self) -> FsResult<()> {
        if self.permission.read().is_granted() {
            Ok(())
        } else {
            Err(FsError::PermissionDenied(self.name.clone()))
        }
    }

    fn is_dir(&self, path: &str) -> bool {
        if path.is_empty() {
            return true;
        }
        let prefix = format!("{path}/");
        self.files
            .read()
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(key, _)| key.starts_with(&prefix))
    }
}

#[async_trait]
impl ProjectFs for MemoryFs {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn exists(&self, path: &str) -> bool {
        if self.check().is_err() {
            return false;
        }
        self.files.read().contains_key(path) || self.is_dir(path)
    }

    async fn read_binary(&self, path: &str) -> FsResult<Bytes> {
        self.check()?;
        self.files
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| FsError::NotFound(path.to_string()))
    }

    async fn write_text(&self, path: &str, contents: &str) -> FsResult<()> {
        self.check()?;
        self.files
            .write()
            .insert(path.to_string(), Bytes::from(contents.to_string()));
        Ok(())
    }

    async fn list(&self, path: &str) -> FsResult<Vec<DirEntry>> {
        self.check()?;
        if !self.is_dir(path) {
            return Err(FsError::NotFound(path.to_string()));
        }
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{path}/")
        };

        let mut children: BTreeMap<String, EntryKind> = BTreeMap::new();
        for key in self.files.read().keys() {
            let Some(rest) = key.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((dir, _)) => {
                    children.insert(dir.to_string(), EntryKind::Directory);
                }
                None => {
                    children.entry(rest.to_string()).or_insert(EntryKind::File);
                }
            }
        }

        Ok(children
            .into_iter()
            .map(|(name, kind)| DirEntry { name, kind })
            .collect())
    }

    async fn query_permission(&self, _mode: AccessMode) -> Permission {
        *self.permission.read()
    }

    async fn request_permission(&self, _mode: AccessMode) -> Permission {
        let result = *self.request_result.read();
        *self.permission.write() = result;
        result
    }
}
