//! Outbound requests for the native host.
//!
//! The worker treats its own origin as "the network" for tooling pages and
//! local-only assets. Here that origin is this process, so those requests
//! are answered in place instead of looping back over HTTP.

use async_trait::async_trait;
use http::header::{self, HeaderMap};
use http::StatusCode;
use rust_embed::RustEmbed;
use tarn::runtime::{DirectoryHandle, FsError, NetError, Network};
use tarn::{FetchRequest, FetchResponse};
use tracing::debug;
use url::{Host, Url};

/// Tooling pages and scripts shipped inside the binary.
#[derive(RustEmbed)]
#[folder = "assets/tooling"]
pub struct ToolingAssets;

impl ToolingAssets {
    /// Asset for a path inside the tooling namespace; `setup` finds `setup.html`.
    pub fn lookup(name: &str) -> Option<(String, Vec<u8>)> {
        let name = name.trim_matches('/');
        if name.is_empty() {
            return None;
        }
        [name.to_string(), format!("{name}.html")]
            .into_iter()
            .find_map(|candidate| {
                Self::get(&candidate).map(|file| (candidate, file.data.into_owned()))
            })
    }
}

/// Headers never forwarded upstream.
const DROPPED_REQUEST_HEADERS: [header::HeaderName; 3] =
    [header::HOST, header::ACCEPT_ENCODING, header::CONNECTION];

/// Headers recomputed for the body the worker holds.
const DROPPED_RESPONSE_HEADERS: [header::HeaderName; 3] = [
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::CONNECTION,
];

/// [`Network`] backed by `reqwest`, with the server's own origin served locally.
#[derive(Debug, Clone)]
pub struct HostNetwork {
    client: reqwest::Client,
    scope: Url,
    tooling_prefix: String,
    origin_files: Option<DirectoryHandle>,
}

impl HostNetwork {
    pub fn new(scope: Url, tooling_prefix: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            scope,
            tooling_prefix: tooling_prefix.into(),
            origin_files: None,
        }
    }

    /// Serve other own-origin paths from a folder.
    pub fn with_origin_files(mut self, root: DirectoryHandle) -> Self {
        self.origin_files = Some(root);
        self
    }

    /// The scope's origin or one of its project subdomains.
    fn is_own_origin(&self, url: &Url) -> bool {
        if url.scheme() != self.scope.scheme()
            || url.port_or_known_default() != self.scope.port_or_known_default()
        {
            return false;
        }
        match (url.host(), self.scope.host()) {
            (Some(Host::Domain(host)), Some(Host::Domain(scope))) => {
                host == scope || host.ends_with(&format!(".{scope}"))
            }
            (Some(host), Some(scope)) => host == scope,
            _ => false,
        }
    }

    fn tooling(&self, path: &str) -> FetchResponse {
        let name = path.strip_prefix(&self.tooling_prefix).unwrap_or(path);
        match ToolingAssets::lookup(name) {
            Some((file, data)) => FetchResponse::file(&file, data),
            None => FetchResponse::text(StatusCode::NOT_FOUND, format!("No tooling page at {path}")),
        }
    }

    async fn origin_file(&self, request: &FetchRequest) -> FetchResponse {
        let path = request.pathname();
        let Some(root) = &self.origin_files else {
            return FetchResponse::text(StatusCode::NOT_FOUND, format!("Not found: {path}"));
        };
        match root.read_binary(&path).await {
            Ok(body) => FetchResponse::file(&path, body),
            Err(FsError::PermissionDenied(_)) => {
                FetchResponse::text(StatusCode::FORBIDDEN, format!("Forbidden: {path}"))
            }
            Err(_) => FetchResponse::text(StatusCode::NOT_FOUND, format!("Not found: {path}")),
        }
    }

    async fn remote(&self, request: &FetchRequest) -> Result<FetchResponse, NetError> {
        let mut headers = request.headers.clone();
        for name in &DROPPED_REQUEST_HEADERS {
            headers.remove(name);
        }

        let response = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(headers)
            .send()
            .await
            .map_err(|e| net_error(&request.url, e))?;

        let status = response.status();
        let mut upstream: HeaderMap = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| net_error(&request.url, e))?;

        for name in &DROPPED_RESPONSE_HEADERS {
            upstream.remove(name);
        }
        let mut fetched = FetchResponse::new(status, body);
        fetched.headers.extend(upstream);
        debug!(url = %request.url, status = %status, "fetched upstream");
        Ok(fetched)
    }
}

fn net_error(url: &Url, err: reqwest::Error) -> NetError {
    if err.is_connect() || err.is_timeout() {
        NetError::Unreachable(url.to_string())
    } else {
        NetError::Http(err.to_string())
    }
}

#[async_trait]
impl Network for HostNetwork {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, NetError> {
        if request.is_aborted() {
            return Err(NetError::Aborted);
        }
        if self.is_own_origin(&request.url) {
            let path = request.url.path();
            if path.starts_with(&self.tooling_prefix) {
                return Ok(self.tooling(path));
            }
            return Ok(self.origin_file(request).await);
        }
        match request.url.scheme() {
            "http" | "https" => {}
            other => return Err(NetError::UnsupportedScheme(other.to_string())),
        }

        tokio::select! {
            _ = request.signal.cancelled() => Err(NetError::Aborted),
            result = self.remote(request) => result,
        }
    }
}
