//! Error taxonomy for the worker pipeline.
//!
//! Every failure a request can run into maps onto one [`Error`] variant, and
//! every variant maps onto a stable numeric [`ErrorCode`] that pages and the
//! `isReady` message expose to clients. The fetch interceptor is the single
//! place where an error becomes HTML; everything below it propagates with `?`.

use crate::runtime::FsError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type used throughout the worker.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Value reported by the `isReady` message when a project can be served.
pub const READY: i32 = -1;

/// Stable numeric error codes shared with client pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    NeedsSetup = 1,
    NeedsConfig = 2,
    RequirePermission = 3,
    InvalidConfig = 4,
    ParsingPackageJson = 5,
    BuildFailed = 6,
    RouteNotFound = 7,
    GenericError = 99,
}

impl ErrorCode {
    /// Numeric value sent over the message channel.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Human-readable title used on error pages.
    pub fn title(self) -> &'static str {
        match self {
            ErrorCode::NeedsSetup => "Project not set up",
            ErrorCode::NeedsConfig => "Project needs configuration",
            ErrorCode::RequirePermission => "Permission required",
            ErrorCode::InvalidConfig => "Invalid build configuration",
            ErrorCode::ParsingPackageJson => "Could not read package.json",
            ErrorCode::BuildFailed => "Build failed",
            ErrorCode::RouteNotFound => "Page not found",
            ErrorCode::GenericError => "Something went wrong",
        }
    }

    /// Look a code up by its numeric value.
    pub fn from_i32(value: i32) -> Option<Self> {
        Some(match value {
            1 => ErrorCode::NeedsSetup,
            2 => ErrorCode::NeedsConfig,
            3 => ErrorCode::RequirePermission,
            4 => ErrorCode::InvalidConfig,
            5 => ErrorCode::ParsingPackageJson,
            6 => ErrorCode::BuildFailed,
            7 => ErrorCode::RouteNotFound,
            99 => ErrorCode::GenericError,
            _ => return None,
        })
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i32())
    }
}

/// A single compiler message with an optional source location.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Diagnostic {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    /// Source excerpt around `line`, already formatted with line numbers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

impl Diagnostic {
    /// Create a diagnostic without location information.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    /// Attach a file location.
    pub fn at(mut self, file: impl Into<String>, line: Option<u32>, column: Option<u32>) -> Self {
        self.file = Some(file.into());
        self.line = line;
        self.column = column;
        self
    }

    /// `file:line:column`, with whatever parts are known.
    pub fn location(&self) -> Option<String> {
        let file = self.file.as_deref()?;
        Some(match (self.line, self.column) {
            (Some(line), Some(column)) => format!("{file}:{line}:{column}"),
            (Some(line), None) => format!("{file}:{line}"),
            _ => file.to_string(),
        })
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location() {
            Some(location) => write!(f, "{location}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Every way serving a project request can fail.
#[derive(Debug, Error)]
pub enum Error {
    /// The project has never been set up on this origin
    #[error("Project '{0}' has not been set up")]
    NeedsSetup(String),

    /// The manifest does not name a router yet
    #[error("Project '{0}' has no router configured")]
    NeedsConfig(String),

    /// Read permission on the project directory is not granted
    #[error("Permission to read '{0}' has not been granted")]
    RequirePermission(String),

    /// The build tool configuration file could not be used
    #[error("Invalid build configuration in {file}: {message}")]
    InvalidConfig { file: String, message: String },

    /// package.json exists but is not valid
    #[error("Failed to parse {file}: {message}")]
    ParsingPackageJson { file: String, message: String },

    /// The bundler reported one or more errors
    #[error("Build failed with {} error(s)", .0.len())]
    BuildFailed(Vec<Diagnostic>),

    /// No page matches the requested pathname
    #[error("No page matches '{0}'")]
    RouteNotFound(String),

    /// Filesystem collaborator failure
    #[error(transparent)]
    Fs(FsError),

    /// Project store collaborator failure
    #[error("Project store error: {0}")]
    Store(String),

    /// Response cache collaborator failure
    #[error("Cache error: {0}")]
    Cache(String),

    /// JSON serialization failures outside of manifest parsing
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Anything else
    #[error("{0}")]
    Generic(String),
}

impl Error {
    /// Error code exposed to client pages.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::NeedsSetup(_) => ErrorCode::NeedsSetup,
            Error::NeedsConfig(_) => ErrorCode::NeedsConfig,
            Error::RequirePermission(_) => ErrorCode::RequirePermission,
            Error::InvalidConfig { .. } => ErrorCode::InvalidConfig,
            Error::ParsingPackageJson { .. } => ErrorCode::ParsingPackageJson,
            Error::BuildFailed(_) => ErrorCode::BuildFailed,
            Error::RouteNotFound(_) => ErrorCode::RouteNotFound,
            Error::Fs(FsError::PermissionDenied(_)) => ErrorCode::RequirePermission,
            Error::Fs(_)
            | Error::Store(_)
            | Error::Cache(_)
            | Error::Json(_)
            | Error::Generic(_) => ErrorCode::GenericError,
        }
    }

    /// Diagnostics attached to the error, if any.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            Error::BuildFailed(diagnostics) => diagnostics,
            _ => &[],
        }
    }

    /// Shorthand for [`Error::Generic`].
    pub fn generic(message: impl Into<String>) -> Self {
        Error::Generic(message.into())
    }
}

impl From<FsError> for Error {
    fn from(err: FsError) -> Self {
        match err {
            FsError::PermissionDenied(path) => Error::RequirePermission(path),
            other => Error::Fs(other),
        }
    }
}
