//! Request and response values passed through the worker.
//!
//! These are plain data: the host converts its native request type into a
//! [`FetchRequest`] and turns the returned [`FetchResponse`] back into
//! whatever it sends to the client.

use bytes::Bytes;
use http::header::{self, HeaderName};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Fetch mode of an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Top-level document load
    Navigate,
    SameOrigin,
    #[default]
    NoCors,
    Cors,
}

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: Url,
    pub mode: RequestMode,
    pub headers: HeaderMap,
    /// Fires when the client no longer wants the response.
    pub signal: CancellationToken,
}

impl FetchRequest {
    /// A plain `GET` subresource request.
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            mode: RequestMode::NoCors,
            headers: HeaderMap::new(),
            signal: CancellationToken::new(),
        }
    }

    /// A top-level navigation.
    pub fn navigate(url: Url) -> Self {
        Self {
            mode: RequestMode::Navigate,
            ..Self::get(url)
        }
    }

    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = signal;
        self
    }

    pub fn with_mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }

    pub fn is_aborted(&self) -> bool {
        self.signal.is_cancelled()
    }

    /// Percent-decoded pathname.
    pub fn pathname(&self) -> String {
        let raw = urlencoding::decode_binary(self.url.path().as_bytes());
        String::from_utf8_lossy(&raw).into_owned()
    }
}

/// A response produced by the worker or fetched from the network.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl FetchResponse {
    /// Response with a body and no headers besides `Content-Length`.
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn html(status: StatusCode, body: impl Into<String>) -> Self {
        Self::new(status, body.into())
            .with_header(header::CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"))
    }

    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        Self::new(status, body.into())
            .with_header(header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"))
    }

    /// Pretty-printed JSON body.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_vec_pretty(value)?;
        Ok(Self::new(StatusCode::OK, body)
            .with_header(header::CONTENT_TYPE, HeaderValue::from_static("application/json")))
    }

    /// File contents with a media type inferred from `path`.
    pub fn file(path: &str, body: impl Into<Bytes>) -> Self {
        Self::new(StatusCode::OK, body)
            .with_header(header::CONTENT_TYPE, HeaderValue::from_static(content_type_for(path)))
    }

    /// `302 Found` to `location`.
    pub fn redirect(location: &str) -> Self {
        let value = HeaderValue::from_str(location).unwrap_or_else(|_| HeaderValue::from_static("/"));
        Self::new(StatusCode::FOUND, Bytes::new()).with_header(header::LOCATION, value)
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Header value as a string, if present and valid.
    pub fn header(&self, name: HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(header::CONTENT_TYPE)
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Whether `Cache-Control` forbids shared caching.
    pub fn is_private(&self) -> bool {
        self.header(header::CACHE_CONTROL)
            .map(|value| {
                let value = value.to_ascii_lowercase();
                value.contains("private") || value.contains("no-store")
            })
            .unwrap_or(false)
    }

    pub fn text_body(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Determine the media type for a path from its extension.
pub fn content_type_for(path: &str) -> &'static str {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    let extension = path
        .rsplit_once('.')
        .filter(|(_, ext)| !ext.contains('/'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "wasm" => "application/wasm",
        "js" | "mjs" => "application/javascript",
        "json" => "application/json",
        "map" => "application/json",
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css",
        "txt" => "text/plain; charset=utf-8",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        _ => "application/octet-stream",
    }
}
