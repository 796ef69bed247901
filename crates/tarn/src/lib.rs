//! # tarn
//!
//! Tarn worker - a development server that lives in a service worker.
//!
//! The worker intercepts every request on its origin. Page loads are
//! resolved to an HTML file in the user's project, its scripts and
//! stylesheets are bundled on demand, and the rewritten page is served with
//! the build artifacts cached for later subresource requests. Third-party
//! packages are fetched from a CDN and cached.
//!
//! ## Features
//!
//! - **Request interception**: one classification, one caching policy per class
//! - **Routing**: filesystem routes with dynamic segments, or a single-page shell
//! - **On-demand builds**: at most one build per project, shared by all waiters
//! - **Platform abstraction**: filesystem, caches, network and compiler are traits
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tarn::{DevWorker, FetchRequest, ProjectId};
//! use tarn::runtime::{Bundler, MemoryFs, Network};
//! use url::Url;
//!
//! # async fn run(network: Arc<dyn Network>, bundler: Arc<dyn Bundler>) -> tarn::Result<()> {
//! let scope = Url::parse("http://localhost:3000/").unwrap();
//! let worker = DevWorker::builder(scope)
//!     .network(network)
//!     .bundler(bundler)
//!     .build()?;
//!
//! worker.on_install().await;
//! worker.on_activate().await;
//!
//! let root = MemoryFs::new("site")
//!     .with_file("package.json", r#"{"run":{"router":"pages"}}"#)
//!     .into_handle();
//! worker.setup_project(ProjectId::default(), root, None).await?;
//!
//! let page = Url::parse("http://localhost:3000/about").unwrap();
//! let response = worker.on_fetch(FetchRequest::navigate(page)).await;
//! # Ok(()) }
//! ```

pub mod bundle;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod http;
pub mod interceptor;
pub mod manifest;
pub mod pages;
pub mod project;
pub mod route;
pub mod runtime;
pub mod worker;

// Re-export primary APIs
pub use bundle::{BuildOutput, BundleEngine, ImportMap, ImportResolver};
pub use config::{CacheKind, WorkerConfig};
pub use coordinator::{BuildCoordinator, BuildResult, BuildStatus};
pub use error::{Diagnostic, Error, ErrorCode, READY, Result};
pub use http::{FetchRequest, FetchResponse, RequestMode};
pub use interceptor::{FetchInterceptor, RequestClass};
pub use manifest::{PackageManifest, RunConfig};
pub use project::{ProjectId, ProjectRecord, Projects, RouterKind};
pub use route::{Route, RouteResolver};
pub use worker::{
    ActivateReport, DevWorker, DevWorkerBuilder, InstallReport, WorkerMessage, WorkerReply,
};
