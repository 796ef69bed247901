//! Project identity and records.
//!
//! A project is identified by the first label of the host it is served from
//! (`blog.localhost` serves project `blog`). Its record holds the directory
//! handles the user granted and the router classification derived from the
//! manifest. Records are read through [`Projects`], which keeps the last
//! loaded copy of each record until it is explicitly reloaded.

use crate::error::{Error, Result};
use crate::manifest::{PackageManifest, RunConfig};
use crate::runtime::{DirectoryHandle, ProjectStore};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use url::{Host, Url};

/// Id used for requests to a bare host such as `localhost`.
pub const DEFAULT_PROJECT: &str = "default";

/// Stable identity of a project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive the id from a request URL.
    ///
    /// Multi-label domain hosts use their first label; single-label hosts
    /// and IP addresses map to [`DEFAULT_PROJECT`].
    pub fn from_url(url: &Url) -> Self {
        match url.host() {
            Some(Host::Domain(domain)) => match domain.split_once('.') {
                Some((label, _)) if !label.is_empty() => Self(label.to_ascii_lowercase()),
                _ => Self::default(),
            },
            _ => Self::default(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ProjectId {
    fn default() -> Self {
        Self(DEFAULT_PROJECT.to_string())
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How request pathnames map onto HTML files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RouterKind {
    /// No router chosen yet
    #[default]
    Unknown,
    /// Every pathname serves one HTML shell
    SinglePageApp { shell: String },
    /// Pathnames map onto HTML files under a directory
    Filesystem { root: String },
}

impl RouterKind {
    /// Classify a manifest `run.router` value.
    ///
    /// An `.html` extension means single-page app, anything else non-empty
    /// is a filesystem routing root.
    pub fn classify(router: &str) -> Self {
        let normalized = RunConfig::normalize_router(router);
        if normalized.is_empty() {
            RouterKind::Unknown
        } else if normalized.to_lowercase().ends_with(".html") {
            RouterKind::SinglePageApp { shell: normalized }
        } else {
            RouterKind::Filesystem {
                root: normalized.trim_end_matches('/').to_string(),
            }
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, RouterKind::Unknown)
    }
}

/// Persisted state of one project.
#[derive(Debug, Clone)]
pub struct ProjectRecord {
    pub id: ProjectId,
    /// Project root
    pub root: DirectoryHandle,
    /// Where non-bundled assets are served from
    pub static_root: DirectoryHandle,
    pub router: RouterKind,
    pub last_build: Option<DateTime<Utc>>,
}

impl ProjectRecord {
    /// New record serving static assets from the root.
    pub fn new(id: ProjectId, root: DirectoryHandle) -> Self {
        Self {
            id,
            static_root: root.clone(),
            root,
            router: RouterKind::Unknown,
            last_build: None,
        }
    }

    pub fn with_static_root(mut self, static_root: DirectoryHandle) -> Self {
        self.static_root = static_root;
        self
    }

    pub fn with_router(mut self, router: RouterKind) -> Self {
        self.router = router;
        self
    }

    pub fn is_configured(&self) -> bool {
        !self.router.is_unknown()
    }
}

/// Cached access to the project store.
#[derive(Debug)]
pub struct Projects {
    store: Arc<dyn ProjectStore>,
    loaded: RwLock<HashMap<ProjectId, ProjectRecord>>,
}

impl Projects {
    pub fn new(store: Arc<dyn ProjectStore>) -> Self {
        Self {
            store,
            loaded: RwLock::new(HashMap::new()),
        }
    }

    /// Record for `id`, or `None` when the project was never set up.
    pub async fn find(&self, id: &ProjectId) -> Result<Option<ProjectRecord>> {
        let cached = self.loaded.read().get(id).cloned();
        if cached.is_some() {
            return Ok(cached);
        }
        let record = self.store.get(id).await?;
        if let Some(record) = &record {
            debug!(project = %id, "loaded project record");
            self.loaded.write().insert(id.clone(), record.clone());
        }
        Ok(record)
    }

    /// Record for `id`. A missing record is [`Error::NeedsSetup`].
    pub async fn load(&self, id: &ProjectId) -> Result<ProjectRecord> {
        self.find(id)
            .await?
            .ok_or_else(|| Error::NeedsSetup(id.to_string()))
    }

    /// Persist a record and refresh the cached copy.
    pub async fn save(&self, record: ProjectRecord) -> Result<()> {
        self.store.put(record.clone()).await?;
        self.loaded.write().insert(record.id.clone(), record);
        Ok(())
    }

    /// Derive the router classification from a manifest and persist it.
    pub async fn configure(
        &self,
        mut record: ProjectRecord,
        manifest: &PackageManifest,
    ) -> Result<ProjectRecord> {
        record.router = manifest.run.router_kind();
        self.save(record.clone()).await?;
        Ok(record)
    }

    /// Stamp the last successful build time.
    pub async fn mark_built(&self, id: &ProjectId, at: DateTime<Utc>) -> Result<()> {
        let mut record = self.load(id).await?;
        record.last_build = Some(at);
        self.save(record).await
    }

    /// Forget the cached copy so the next load reads the store.
    pub fn reload(&self, id: &ProjectId) {
        self.loaded.write().remove(id);
    }

    /// Remove a project entirely.
    pub async fn remove(&self, id: &ProjectId) -> Result<bool> {
        self.reload(id);
        self.store.delete(id).await
    }
}
