//! Fetch interception.
//!
//! Every request on the worker origin goes through [`FetchInterceptor::handle`].
//! Requests are classified in a fixed order and each class has its own
//! caching policy:
//!
//! | class        | source                                   | cache written   |
//! |--------------|------------------------------------------|-----------------|
//! | local-only   | caches, then network while online        | precache        |
//! | dependency   | dependency cache, then network           | dependency      |
//! | pass-through | network, then runtime cache              | runtime         |
//! | opaque       | network                                  | none            |
//! | tooling      | network, then precache                   | precache        |
//! | navigation   | route resolver + build coordinator       | bundles (engine)|
//! | asset        | bundle cache, then static asset subtree  | none            |
//!
//! Navigation failures always produce a page; the interceptor never rejects.

use crate::config::{CacheKind, WorkerConfig};
use crate::coordinator::BuildCoordinator;
use crate::error::Error;
use crate::http::{FetchRequest, FetchResponse};
use crate::manifest::PackageManifest;
use crate::pages::{self, ErrorReport};
use crate::project::{ProjectId, Projects};
use crate::route::RouteResolver;
use crate::runtime::{CacheStorage, FsError, Network, normalize_path};
use bytes::Bytes;
use chrono::Utc;
use futures::FutureExt;
use http::header::{self, HeaderValue};
use http::{Method, StatusCode};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, warn};
use url::Url;

/// How a request is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// Offline, or an asset only ever served from the local cache
    LocalOnly,
    /// Cross-origin request to an allow-listed CDN
    Dependency,
    /// Other cross-origin http(s) request
    PassThrough,
    /// Anything the worker does not touch
    Opaque,
    /// Same-origin tooling namespace
    Tooling,
    /// Same-origin page load
    Navigation,
    /// Same-origin subresource
    Asset,
}

type PageResult = Result<FetchResponse, Arc<Error>>;

/// Classifies and answers intercepted requests.
#[derive(Debug)]
pub struct FetchInterceptor {
    config: Arc<WorkerConfig>,
    projects: Arc<Projects>,
    caches: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    coordinator: Arc<BuildCoordinator>,
    scope: Url,
}

fn no_cache(response: FetchResponse) -> FetchResponse {
    response.with_header(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"))
}

fn private(response: FetchResponse) -> FetchResponse {
    response.with_header(header::CACHE_CONTROL, HeaderValue::from_static("private"))
}

fn bad_gateway(url: &Url, reason: &str) -> FetchResponse {
    FetchResponse::text(StatusCode::BAD_GATEWAY, format!("Failed to fetch {url}: {reason}"))
}

fn aborted() -> FetchResponse {
    FetchResponse::new(StatusCode::NO_CONTENT, Bytes::new())
}

impl FetchInterceptor {
    pub fn new(
        config: Arc<WorkerConfig>,
        projects: Arc<Projects>,
        caches: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
        coordinator: Arc<BuildCoordinator>,
        scope: Url,
    ) -> Self {
        Self {
            config,
            projects,
            caches,
            network,
            coordinator,
            scope,
        }
    }

    /// Whether `url` belongs to the worker origin or one of its project
    /// subdomains.
    pub fn is_same_origin(&self, url: &Url) -> bool {
        if url.scheme() != self.scope.scheme()
            || url.port_or_known_default() != self.scope.port_or_known_default()
        {
            return false;
        }
        match (url.host_str(), self.scope.host_str()) {
            (Some(host), Some(scope)) => {
                host == scope
                    || host
                        .strip_suffix(scope)
                        .is_some_and(|label| label.ends_with('.') && label.len() > 1)
            }
            _ => false,
        }
    }

    /// Classify a request. Order matters: the first matching rule wins.
    pub fn classify(&self, request: &FetchRequest) -> RequestClass {
        let same_origin = self.is_same_origin(&request.url);

        if !self.network.is_online() || (same_origin && self.config.is_local_only(request.url.path())) {
            return RequestClass::LocalOnly;
        }

        if !same_origin {
            let origin = request.url.origin().ascii_serialization();
            if self
                .config
                .cdn_origins
                .iter()
                .any(|allowed| allowed.trim_end_matches('/') == origin)
            {
                return RequestClass::Dependency;
            }
            return match request.url.scheme() {
                "http" | "https" => RequestClass::PassThrough,
                _ => RequestClass::Opaque,
            };
        }

        if request.method != Method::GET {
            return RequestClass::Opaque;
        }
        if request.url.path().starts_with(&self.config.tooling_prefix) {
            return RequestClass::Tooling;
        }
        if request.is_navigation() {
            return RequestClass::Navigation;
        }
        RequestClass::Asset
    }

    /// Answer a request.
    ///
    /// Returns `None` when the request was aborted; the host should drop it.
    pub async fn handle(&self, request: &FetchRequest) -> Option<FetchResponse> {
        if request.is_aborted() {
            return None;
        }

        let class = self.classify(request);
        debug!(url = %request.url, ?class, "intercepted request");

        let response = match AssertUnwindSafe(self.dispatch(class, request))
            .catch_unwind()
            .await
        {
            Ok(response) => response,
            Err(_) => {
                error!(url = %request.url, "request handler panicked");
                FetchResponse::html(StatusCode::INTERNAL_SERVER_ERROR, pages::MINIMAL_ERROR_PAGE)
            }
        };

        if request.is_aborted() {
            debug!(url = %request.url, "request aborted");
            return None;
        }
        Some(response)
    }

    async fn dispatch(&self, class: RequestClass, request: &FetchRequest) -> FetchResponse {
        match class {
            RequestClass::LocalOnly => self.local_only(request).await,
            RequestClass::Dependency => self.dependency(request).await,
            RequestClass::PassThrough => self.pass_through(request).await,
            RequestClass::Opaque => match self.network.fetch(request).await {
                Ok(response) => response,
                Err(err) => bad_gateway(&request.url, &err.to_string()),
            },
            RequestClass::Tooling => self.tooling(request).await,
            RequestClass::Navigation => self.navigation(request).await,
            RequestClass::Asset => self.asset(request).await,
        }
    }

    async fn cached(&self, kind: CacheKind, url: &Url) -> Option<FetchResponse> {
        match self.caches.open(&self.config.cache_name(kind)).await {
            Ok(cache) => cache.match_url(url).await,
            Err(err) => {
                warn!(cache = %kind, "failed to open cache: {err}");
                None
            }
        }
    }

    async fn store(&self, kind: CacheKind, url: &Url, response: &FetchResponse) {
        let result = match self.caches.open(&self.config.cache_name(kind)).await {
            Ok(cache) => cache.put(url, response.clone()).await,
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            warn!(cache = %kind, url = %url, "failed to cache response: {err}");
        }
    }

    async fn cached_anywhere(&self, url: &Url) -> Option<FetchResponse> {
        for kind in CacheKind::ALL {
            if let Some(hit) = self.cached(kind, url).await {
                return Some(hit);
            }
        }
        None
    }

    /// Tooling shells are precached under the scope origin.
    fn scoped_url(&self, path: &str) -> Option<Url> {
        self.scope.join(path).ok()
    }

    async fn local_only(&self, request: &FetchRequest) -> FetchResponse {
        if let Some(hit) = self.cached_anywhere(&request.url).await {
            return hit;
        }

        if self.network.is_online() {
            return match self.network.fetch(request).await {
                Ok(response) => {
                    if response.is_success() {
                        self.store(CacheKind::Precache, &request.url, &response).await;
                    }
                    response
                }
                Err(err) => bad_gateway(&request.url, &err.to_string()),
            };
        }

        if request.is_navigation() {
            let shell = match self.scoped_url(&self.config.offline_page) {
                Some(url) => self.cached(CacheKind::Precache, &url).await,
                None => None,
            };
            return shell.unwrap_or_else(|| FetchResponse::html(StatusCode::OK, pages::offline_page()));
        }

        FetchResponse::text(
            StatusCode::SERVICE_UNAVAILABLE,
            format!("Offline and not cached: {}", request.url.path()),
        )
    }

    async fn dependency(&self, request: &FetchRequest) -> FetchResponse {
        if let Some(hit) = self.cached(CacheKind::Dependencies, &request.url).await {
            return hit;
        }
        match self.network.fetch(request).await {
            Ok(response) => {
                if response.is_success() {
                    self.store(CacheKind::Dependencies, &request.url, &response).await;
                }
                response
            }
            Err(err) => bad_gateway(&request.url, &err.to_string()),
        }
    }

    async fn pass_through(&self, request: &FetchRequest) -> FetchResponse {
        match self.network.fetch(request).await {
            Ok(response) => {
                if response.is_success() && !response.is_private() {
                    self.store(CacheKind::Runtime, &request.url, &response).await;
                }
                response
            }
            Err(err) => match self.cached(CacheKind::Runtime, &request.url).await {
                Some(hit) => hit,
                None => bad_gateway(&request.url, &err.to_string()),
            },
        }
    }

    async fn tooling(&self, request: &FetchRequest) -> FetchResponse {
        let page = request
            .url
            .path()
            .strip_prefix(&self.config.tooling_prefix)
            .unwrap_or_default();

        let wants_reset = request.url.query_pairs().any(|(key, _)| key == "reset");
        if request.is_navigation() && page == "setup" && !wants_reset {
            let id = ProjectId::from_url(&request.url);
            if let Ok(Some(record)) = self.projects.find(&id).await {
                if record.is_configured() {
                    debug!(project = %id, "project already configured, leaving setup");
                    return FetchResponse::redirect("/");
                }
            }
        }

        match self.network.fetch(request).await {
            Ok(response) => {
                if response.is_success() && !response.is_private() && !page.contains("config") {
                    self.store(CacheKind::Precache, &request.url, &response).await;
                }
                response
            }
            Err(err) => {
                if let Some(hit) = self.cached(CacheKind::Precache, &request.url).await {
                    return hit;
                }
                let shell = match self.scoped_url(request.url.path()) {
                    Some(url) => self.cached(CacheKind::Precache, &url).await,
                    None => None,
                };
                shell.unwrap_or_else(|| bad_gateway(&request.url, &err.to_string()))
            }
        }
    }

    async fn navigation(&self, request: &FetchRequest) -> FetchResponse {
        let id = ProjectId::from_url(&request.url);
        match self.render(request, &id).await {
            Ok(response) => response,
            Err(err) => self.error_response(&err),
        }
    }

    async fn render(&self, request: &FetchRequest, id: &ProjectId) -> PageResult {
        let record = self.projects.load(id).await?;
        record.root.ensure_readable().await.map_err(Error::from)?;

        let manifest = PackageManifest::load(&record.root).await?.unwrap_or_default();
        if manifest.run.is_router_unset() {
            return Err(Arc::new(Error::NeedsConfig(id.to_string())));
        }
        let record = if manifest.run.router_kind() != record.router {
            self.projects.configure(record, &manifest).await?
        } else {
            record
        };

        let mut pathname = request.pathname();
        let raw = pathname.ends_with(".out");
        if raw {
            pathname.truncate(pathname.len() - ".out".len());
        }

        let out_dir = self.config.output_dir(id.as_str());
        let resolver = RouteResolver::for_project(&record, &out_dir)
            .ok_or_else(|| Error::NeedsConfig(id.to_string()))?;
        let Some(route) = resolver.resolve(&pathname).await? else {
            return Err(Arc::new(Error::RouteNotFound(pathname)));
        };
        if !route.is_buildable() {
            return Ok(no_cache(FetchResponse::html(
                StatusCode::OK,
                pages::missing_entries_page(&route.html_path),
            )));
        }

        let origin = Url::parse(&request.url.origin().ascii_serialization())
            .map_err(|e| Error::generic(format!("invalid request origin: {e}")))?;

        let mut output = tokio::select! {
            biased;
            _ = request.signal.cancelled() => return Ok(aborted()),
            result = self.coordinator.bundle(&record, &route, &origin) => result?,
        };
        // Joined a build of another page of the same project.
        if !output.html.contains_key(&route.page) {
            debug!(project = %id, page = %route.page, "joined build was for another page, rebuilding");
            output = tokio::select! {
                biased;
                _ = request.signal.cancelled() => return Ok(aborted()),
                result = self.coordinator.bundle(&record, &route, &origin) => result?,
            };
        }

        if let Err(err) = self.projects.mark_built(id, Utc::now()).await {
            warn!(project = %id, "failed to record build time: {err}");
        }

        if raw {
            return Ok(no_cache(FetchResponse::json(&*output).map_err(Error::from)?));
        }
        let html = output
            .html
            .get(&route.page)
            .cloned()
            .ok_or_else(|| Error::generic(format!("build produced no HTML for {}", route.page)))?;
        Ok(no_cache(FetchResponse::html(StatusCode::OK, html)))
    }

    /// Convert a navigation failure into the page the user sees.
    fn error_response(&self, err: &Error) -> FetchResponse {
        match err {
            Error::NeedsSetup(_) => FetchResponse::redirect(&self.config.setup_path()),
            Error::NeedsConfig(_) => FetchResponse::redirect(&self.config.config_path()),
            Error::RouteNotFound(pathname) => {
                no_cache(FetchResponse::html(StatusCode::NOT_FOUND, pages::not_found_page(pathname)))
            }
            other => {
                let report = ErrorReport::from_error(other);
                let client = self.config.tooling_path("client.js");
                private(FetchResponse::html(
                    StatusCode::OK,
                    pages::render_error_page(&report, &client),
                ))
            }
        }
    }

    async fn asset(&self, request: &FetchRequest) -> FetchResponse {
        if let Some(hit) = self.cached(CacheKind::Bundles, &request.url).await {
            return hit;
        }

        let pathname = request.pathname();
        let not_found = || FetchResponse::text(StatusCode::NOT_FOUND, format!("Not found: {pathname}"));

        let id = ProjectId::from_url(&request.url);
        let record = match self.projects.find(&id).await {
            Ok(Some(record)) => record,
            _ => return not_found(),
        };
        let Some(path) = normalize_path(&pathname).filter(|p| !p.is_empty()) else {
            return not_found();
        };

        match record.static_root.read_binary(&path).await {
            Ok(bytes) => no_cache(FetchResponse::file(&path, bytes)),
            Err(FsError::PermissionDenied(_)) => FetchResponse::text(
                StatusCode::FORBIDDEN,
                format!("Permission to read {} has not been granted", record.static_root.name()),
            ),
            Err(_) => not_found(),
        }
    }
}
