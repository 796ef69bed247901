//! Native host for the tarn worker.
//!
//! `tarn serve <dir>` runs the same [`tarn::DevWorker`] a browser would run
//! as a service worker, behind an axum server. The worker's collaborators are
//! native: the project folder on disk, `reqwest` for the network, and the
//! `esbuild` binary as the bundler. Tooling pages are embedded in the binary.
//!
//! # Modules
//!
//! - [`cli`] - Command-line argument definitions
//! - [`commands`] - Command implementations
//! - [`config`] - Layered configuration (`tarn.config.json`, `TARN_*`, flags)
//! - [`native`] - Filesystem, network and bundler collaborators
//! - [`server`] - HTTP front end translating requests for the worker

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logger;
pub mod native;
pub mod server;
pub mod ui;

pub use config::TarnConfig;
pub use error::{CliError, ConfigError, Result};
