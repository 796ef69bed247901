//! The worker service object.
//!
//! [`DevWorker`] wires every component together and exposes the four worker
//! events as async methods. Hosts construct it once through
//! [`DevWorker::builder`] and forward their events to it.

use crate::bundle::BundleEngine;
use crate::config::{CacheKind, WorkerConfig};
use crate::coordinator::BuildCoordinator;
use crate::error::{Error, READY, Result};
use crate::http::{FetchRequest, FetchResponse};
use crate::interceptor::{FetchInterceptor, RequestClass};
use crate::manifest::{PackageManifest, RunConfig};
use crate::project::{ProjectId, ProjectRecord, Projects};
use crate::runtime::{
    AccessMode, Bundler, CacheStorage, DirectoryHandle, MemoryCacheStorage, MemoryProjectStore,
    Network, ProjectStore,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// Messages clients post to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerMessage {
    /// Ask whether the client's project can be served
    IsReady,
    /// Ask for read permission on the project directory
    RequestPermission,
    /// Drop the cached project record and read it again
    Reload,
}

impl WorkerMessage {
    fn name(self) -> &'static str {
        match self {
            WorkerMessage::IsReady => "isReady",
            WorkerMessage::RequestPermission => "requestPermission",
            WorkerMessage::Reload => "reload",
        }
    }
}

/// Answer to a [`WorkerMessage`]: `{type, value}` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerReply {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: Value,
}

/// Outcome of the install event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    pub cached: Vec<String>,
    pub failed: Vec<String>,
}

/// Outcome of the activate event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActivateReport {
    /// Caches from previous versions that were removed
    pub deleted: Vec<String>,
    /// Whether open clients should be claimed
    pub claim_clients: bool,
}

/// Builder for [`DevWorker`].
pub struct DevWorkerBuilder {
    scope: Url,
    config: WorkerConfig,
    store: Option<Arc<dyn ProjectStore>>,
    caches: Option<Arc<dyn CacheStorage>>,
    network: Option<Arc<dyn Network>>,
    bundler: Option<Arc<dyn Bundler>>,
}

impl DevWorkerBuilder {
    pub fn config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(mut self, store: Arc<dyn ProjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn caches(mut self, caches: Arc<dyn CacheStorage>) -> Self {
        self.caches = Some(caches);
        self
    }

    pub fn network(mut self, network: Arc<dyn Network>) -> Self {
        self.network = Some(network);
        self
    }

    pub fn bundler(mut self, bundler: Arc<dyn Bundler>) -> Self {
        self.bundler = Some(bundler);
        self
    }

    /// Validate the configuration and assemble the worker.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid or no network or bundler
    /// was provided. Store and caches default to in-memory implementations.
    pub fn build(self) -> Result<DevWorker> {
        self.config.validate()?;
        let network = self
            .network
            .ok_or_else(|| Error::generic("DevWorker requires a network"))?;
        let bundler = self
            .bundler
            .ok_or_else(|| Error::generic("DevWorker requires a bundler"))?;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryProjectStore::new()));
        let caches = self
            .caches
            .unwrap_or_else(|| Arc::new(MemoryCacheStorage::new()));

        let config = Arc::new(self.config);
        let projects = Arc::new(Projects::new(store));
        let engine = Arc::new(BundleEngine::new(
            bundler,
            Arc::clone(&caches),
            Arc::clone(&network),
            Arc::clone(&config),
        ));
        let coordinator = Arc::new(BuildCoordinator::new(engine, config.build_timeout()));
        let interceptor = FetchInterceptor::new(
            Arc::clone(&config),
            Arc::clone(&projects),
            Arc::clone(&caches),
            Arc::clone(&network),
            Arc::clone(&coordinator),
            self.scope.clone(),
        );

        Ok(DevWorker {
            config,
            projects,
            caches,
            network,
            coordinator,
            interceptor,
            scope: self.scope,
        })
    }
}

/// The development server worker.
#[derive(Debug)]
pub struct DevWorker {
    config: Arc<WorkerConfig>,
    projects: Arc<Projects>,
    caches: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    coordinator: Arc<BuildCoordinator>,
    interceptor: FetchInterceptor,
    scope: Url,
}

impl DevWorker {
    /// Start building a worker serving the origin of `scope`.
    pub fn builder(scope: Url) -> DevWorkerBuilder {
        DevWorkerBuilder {
            scope,
            config: WorkerConfig::default(),
            store: None,
            caches: None,
            network: None,
            bundler: None,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn scope(&self) -> &Url {
        &self.scope
    }

    pub fn projects(&self) -> &Projects {
        &self.projects
    }

    pub fn coordinator(&self) -> &BuildCoordinator {
        &self.coordinator
    }

    /// Precache the tooling shells. Failures are logged, never fatal.
    pub async fn on_install(&self) -> InstallReport {
        let mut report = InstallReport::default();
        let cache = match self
            .caches
            .open(&self.config.cache_name(CacheKind::Precache))
            .await
        {
            Ok(cache) => cache,
            Err(err) => {
                warn!("failed to open precache: {err}");
                report.failed = self.config.precache.clone();
                return report;
            }
        };

        for path in &self.config.precache {
            let Ok(url) = self.scope.join(path) else {
                warn!(path, "invalid precache path");
                report.failed.push(path.clone());
                continue;
            };
            match self.network.fetch(&FetchRequest::get(url.clone())).await {
                Ok(response) if response.is_success() => match cache.put(&url, response).await {
                    Ok(()) => report.cached.push(path.clone()),
                    Err(err) => {
                        warn!(path, "failed to precache: {err}");
                        report.failed.push(path.clone());
                    }
                },
                Ok(response) => {
                    warn!(path, status = %response.status, "precache fetch failed");
                    report.failed.push(path.clone());
                }
                Err(err) => {
                    warn!(path, "precache fetch failed: {err}");
                    report.failed.push(path.clone());
                }
            }
        }

        info!(
            cached = report.cached.len(),
            failed = report.failed.len(),
            "worker installed"
        );
        report
    }

    /// Delete caches from other versions and claim clients.
    pub async fn on_activate(&self) -> ActivateReport {
        let current = self.config.cache_names();
        let mut deleted = Vec::new();
        for name in self.caches.keys().await {
            if !current.contains(&name) && self.caches.delete(&name).await {
                debug!(cache = %name, "deleted stale cache");
                deleted.push(name);
            }
        }
        info!(deleted = deleted.len(), "worker activated");
        ActivateReport {
            deleted,
            claim_clients: true,
        }
    }

    pub fn classify(&self, request: &FetchRequest) -> RequestClass {
        self.interceptor.classify(request)
    }

    /// Answer an intercepted request. `None` means the request was aborted.
    pub async fn on_fetch(&self, request: FetchRequest) -> Option<FetchResponse> {
        self.interceptor.handle(&request).await
    }

    /// Answer a client message. `client` is the URL of the posting page.
    pub async fn on_message(&self, message: WorkerMessage, client: &Url) -> WorkerReply {
        let id = ProjectId::from_url(client);
        debug!(project = %id, message = message.name(), "worker message");

        let value = match message {
            WorkerMessage::IsReady => Value::from(self.readiness(&id).await),
            WorkerMessage::RequestPermission => match self.projects.load(&id).await {
                Ok(record) => {
                    let permission = record.root.request_permission(AccessMode::Read).await;
                    Value::from(permission.as_str())
                }
                Err(err) => Value::from(err.code().as_i32()),
            },
            WorkerMessage::Reload => {
                self.projects.reload(&id);
                Value::from(self.readiness(&id).await)
            }
        };

        WorkerReply {
            kind: message.name().to_string(),
            value,
        }
    }

    /// `-1` when the project can be served, otherwise the blocking error code.
    pub async fn readiness(&self, id: &ProjectId) -> i32 {
        match self.check_ready(id).await {
            Ok(()) => READY,
            Err(err) => err.code().as_i32(),
        }
    }

    async fn check_ready(&self, id: &ProjectId) -> Result<()> {
        let record = self.projects.load(id).await?;
        record.root.ensure_readable().await?;
        let manifest = PackageManifest::load(&record.root).await?.unwrap_or_default();
        if manifest.run.is_router_unset() {
            return Err(Error::NeedsConfig(id.to_string()));
        }
        Ok(())
    }

    /// Create or replace a project record once the user picked a directory.
    pub async fn setup_project(
        &self,
        id: ProjectId,
        root: DirectoryHandle,
        static_root: Option<DirectoryHandle>,
    ) -> Result<ProjectRecord> {
        let mut record = ProjectRecord::new(id, root);
        if let Some(static_root) = static_root {
            record = record.with_static_root(static_root);
        }
        let manifest = PackageManifest::load(&record.root)
            .await?
            .unwrap_or_default();
        self.coordinator.invalidate(&record.id);
        let record = self.projects.configure(record, &manifest).await?;
        info!(project = %record.id, router = ?record.router, "project set up");
        Ok(record)
    }

    /// Save the `run` section to the project's manifest and reclassify it.
    pub async fn save_configuration(&self, id: &ProjectId, mut run: RunConfig) -> Result<ProjectRecord> {
        let record = self.projects.load(id).await?;
        record.root.ensure_readable().await?;

        let mut manifest = PackageManifest::load(&record.root)
            .await?
            .unwrap_or_default();
        run.normalize();
        manifest.run = run;
        manifest.save(&record.root).await?;

        self.projects.configure(record, &manifest).await
    }
}
