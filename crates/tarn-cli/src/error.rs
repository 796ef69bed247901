//! Error handling for the tarn CLI.
//!
//! Messages that the user can act on end with a `Hint:` paragraph. Worker
//! errors convert through `#[from]` and keep their error code.

mod miette;

pub use self::miette::cli_error_to_miette;

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Top-level CLI error type.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Errors reported by the worker
    #[error("{0}")]
    Worker(#[from] tarn::Error),

    /// The project folder does not exist
    #[error("Project folder not found: {}\n\nHint: Pass the folder that contains package.json", .0.display())]
    FileNotFound(PathBuf),

    #[error("{} is not a directory\n\nHint: tarn serves a project folder, not a single file", .0.display())]
    NotADirectory(PathBuf),

    /// The listening socket could not be opened
    #[error("Failed to bind to {addr}: {source}\n\nHint: Is another server using this port? Choose one with --port")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The HTTP front end stopped with an error
    #[error("Server error: {0}")]
    Server(String),
}

/// Configuration-specific errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file given with `--config` doesn't exist
    #[error("Config file not found: {}\n\nHint: Create a tarn.config.json file or drop the --config flag", .0.display())]
    NotFound(PathBuf),

    /// Sources could not be merged into a configuration
    #[error("Invalid configuration: {0}\n\nHint: Check tarn.config.json syntax and TARN_* environment variables")]
    Extract(String),

    /// Invalid value for a configuration option
    #[error("Invalid value for '{field}': {value}\n\nHint: {hint}")]
    InvalidValue {
        /// Name of the field with invalid value
        field: String,
        /// The invalid value
        value: String,
        /// Helpful hint for correct values
        hint: String,
    },
}

/// Result type alias using `CliError` as the default error type.
pub type Result<T, E = CliError> = std::result::Result<T, E>;

/// Extension trait for attaching a path to I/O failures.
pub trait ResultExt<T> {
    /// Turn a not-found I/O error into [`CliError::FileNotFound`] for `path`.
    fn with_path(self, path: impl AsRef<Path>) -> Result<T>;
}

impl<T, E: Into<CliError>> ResultExt<T> for std::result::Result<T, E> {
    fn with_path(self, path: impl AsRef<Path>) -> Result<T> {
        self.map_err(|e| match e.into() {
            CliError::Io(err) if err.kind() == std::io::ErrorKind::NotFound => {
                CliError::FileNotFound(path.as_ref().to_path_buf())
            }
            other => other,
        })
    }
}
