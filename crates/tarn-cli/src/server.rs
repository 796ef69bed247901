//! HTTP front end for the worker.
//!
//! Every request becomes a [`FetchRequest`] for [`DevWorker::on_fetch`], the
//! way a browser hands fetch events to a service worker. Two extra routes
//! under the tooling prefix carry what a page would otherwise `postMessage`:
//!
//! - `POST {prefix}message` - a [`WorkerMessage`], answered with a [`WorkerReply`]
//! - `POST {prefix}api/config` - a [`RunConfig`] to save into package.json

use crate::error::{CliError, Result};
use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
    routing::post,
};
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tarn::{
    DevWorker, FetchRequest, FetchResponse, ProjectId, RequestMode, RunConfig, WorkerMessage,
    WorkerReply,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::debug;
use url::{Host, Url};

/// Shared state of the HTTP server.
#[derive(Debug, Clone)]
struct ServerState {
    worker: Arc<DevWorker>,
}

/// Worker scope for a bound address.
///
/// Loopback and unspecified addresses become `localhost` so projects can be
/// reached on `<project>.localhost` subdomains.
pub fn scope_url(addr: SocketAddr) -> Result<Url> {
    let ip = addr.ip();
    let host = if ip.is_loopback() || ip.is_unspecified() {
        "localhost".to_string()
    } else if ip.is_ipv6() {
        format!("[{ip}]")
    } else {
        ip.to_string()
    };
    Url::parse(&format!("http://{host}:{}/", addr.port()))
        .map_err(|e| CliError::Server(format!("Invalid server address {addr}: {e}")))
}

/// Absolute URL of an incoming request.
///
/// Starts from the scope so the worker always sees its own origin; a `Host`
/// header naming a project subdomain of the scope is kept.
pub fn request_url(scope: &Url, headers: &HeaderMap, uri: &Uri) -> Url {
    let mut url = scope.clone();
    let requested = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(|host| host.rsplit_once(':').map_or(host, |(name, _)| name));
    if let (Some(requested), Some(Host::Domain(scope_host))) = (requested, scope.host()) {
        if requested
            .to_ascii_lowercase()
            .ends_with(&format!(".{scope_host}"))
        {
            if let Err(err) = url.set_host(Some(requested)) {
                debug!(host = requested, %err, "unusable Host header, serving on the scope host");
            }
        }
    }
    url.set_path(uri.path());
    url.set_query(uri.query());
    url
}

/// Fetch mode from `Sec-Fetch-Mode`, falling back to `Accept` for clients
/// that don't send it.
pub fn request_mode(method: &Method, headers: &HeaderMap) -> RequestMode {
    let header_value = |name: &str| headers.get(name).and_then(|value| value.to_str().ok());
    match header_value("sec-fetch-mode") {
        Some("navigate") => RequestMode::Navigate,
        Some("same-origin") => RequestMode::SameOrigin,
        Some("cors") => RequestMode::Cors,
        Some("no-cors") => RequestMode::NoCors,
        _ if *method == Method::GET
            && header_value(header::ACCEPT.as_str()).is_some_and(|accept| accept.contains("text/html")) =>
        {
            RequestMode::Navigate
        }
        _ => RequestMode::NoCors,
    }
}

fn into_response(fetched: FetchResponse) -> Response {
    let mut response = Response::new(Body::from(fetched.body));
    *response.status_mut() = fetched.status;
    *response.headers_mut() = fetched.headers;
    response
}

/// Router answering every request through `worker`.
pub fn router(worker: Arc<DevWorker>) -> Router {
    let prefix = worker.config().tooling_prefix.clone();
    Router::new()
        .route(&format!("{prefix}message"), post(handle_message))
        .route(&format!("{prefix}api/config"), post(handle_save_config))
        .fallback(handle_fetch)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(ServerState { worker })
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    worker: Arc<DevWorker>,
    listener: TcpListener,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    axum::serve(listener, router(worker))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| CliError::Server(format!("Server error: {}", e)))
}

async fn handle_fetch(
    State(state): State<ServerState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let url = request_url(state.worker.scope(), &headers, &uri);
    let mode = request_mode(&method, &headers);
    debug!(%method, %url, ?mode, "request");

    // Dropping this handler (client went away) aborts the request.
    let signal = CancellationToken::new();
    let abort_on_drop = signal.clone().drop_guard();
    let request = FetchRequest {
        method,
        url,
        mode,
        headers,
        signal,
    };
    let response = state.worker.on_fetch(request).await;
    abort_on_drop.disarm();

    match response {
        Some(fetched) => into_response(fetched),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn handle_message(
    State(state): State<ServerState>,
    uri: Uri,
    headers: HeaderMap,
    Json(message): Json<WorkerMessage>,
) -> Json<WorkerReply> {
    let client = request_url(state.worker.scope(), &headers, &uri);
    Json(state.worker.on_message(message, &client).await)
}

async fn handle_save_config(
    State(state): State<ServerState>,
    uri: Uri,
    headers: HeaderMap,
    Json(run): Json<RunConfig>,
) -> Response {
    let client = request_url(state.worker.scope(), &headers, &uri);
    let id = ProjectId::from_url(&client);
    match state.worker.save_configuration(&id, run).await {
        Ok(record) => Json(json!({ "project": record.id, "router": record.router })).into_response(),
        Err(err) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "code": err.code().as_i32(), "message": err.to_string() })),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn scope() -> Url {
        Url::parse("http://localhost:3000/").unwrap()
    }

    fn host(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn loopback_scope_uses_localhost() {
        let scope = scope_url("127.0.0.1:4000".parse().unwrap()).unwrap();
        assert_eq!(scope.as_str(), "http://localhost:4000/");
        let scope = scope_url("0.0.0.0:80".parse().unwrap()).unwrap();
        assert_eq!(scope.as_str(), "http://localhost/");
        let scope = scope_url("192.168.1.5:3000".parse().unwrap()).unwrap();
        assert_eq!(scope.as_str(), "http://192.168.1.5:3000/");
    }

    #[test]
    fn request_url_keeps_project_subdomains() {
        let uri: Uri = "/posts/1?draft=1".parse().unwrap();
        let url = request_url(&scope(), &host("blog.localhost:3000"), &uri);
        assert_eq!(url.as_str(), "http://blog.localhost:3000/posts/1?draft=1");
    }

    #[test]
    fn request_url_falls_back_to_scope_origin() {
        let uri: Uri = "/about".parse().unwrap();
        let url = request_url(&scope(), &host("127.0.0.1:3000"), &uri);
        assert_eq!(url.as_str(), "http://localhost:3000/about");
        let url = request_url(&scope(), &HeaderMap::new(), &uri);
        assert_eq!(url.as_str(), "http://localhost:3000/about");
    }

    #[test]
    fn unparsable_subdomain_keeps_scope_host() {
        let uri: Uri = "/about".parse().unwrap();
        let url = request_url(&scope(), &host("a<b.localhost:3000"), &uri);
        assert_eq!(url.as_str(), "http://localhost:3000/about");
    }

    #[test]
    fn mode_from_fetch_metadata() {
        let mut headers = HeaderMap::new();
        headers.insert("sec-fetch-mode", HeaderValue::from_static("navigate"));
        assert_eq!(request_mode(&Method::GET, &headers), RequestMode::Navigate);
        headers.insert("sec-fetch-mode", HeaderValue::from_static("cors"));
        assert_eq!(request_mode(&Method::GET, &headers), RequestMode::Cors);
    }

    #[test]
    fn mode_from_accept_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("text/html,*/*"));
        assert_eq!(request_mode(&Method::GET, &headers), RequestMode::Navigate);
        assert_eq!(request_mode(&Method::POST, &headers), RequestMode::NoCors);
        assert_eq!(request_mode(&Method::GET, &HeaderMap::new()), RequestMode::NoCors);
    }
}
