//! Outbound network access.

use crate::http::{FetchRequest, FetchResponse};
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

/// Errors reported by a [`Network`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetError {
    /// Could not reach the server
    #[error("Network unreachable: {0}")]
    Unreachable(String),

    /// The request's abort signal fired
    #[error("Request aborted")]
    Aborted,

    /// The URL scheme cannot be fetched
    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    /// Protocol-level failure
    #[error("HTTP error: {0}")]
    Http(String),
}

/// Fetches requests the worker does not answer itself.
///
/// Non-2xx responses are returned as `Ok`; only transport failures are errors.
#[async_trait]
pub trait Network: Send + Sync + fmt::Debug {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, NetError>;

    /// Whether the host believes it has connectivity.
    fn is_online(&self) -> bool {
        true
    }
}
