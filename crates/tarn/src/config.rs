//! Worker configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config.
//! Hosts deserialize this from their own config layer (the CLI nests it under
//! `worker` in `tarn.config.json`).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// The named caches the worker owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    /// Tooling shells and local-only assets fetched at install time
    Precache,
    /// Emitted build artifacts
    Bundles,
    /// Allow-listed CDN dependencies ("offline" cache)
    Dependencies,
    /// Opportunistic copies of pass-through responses
    Runtime,
}

impl CacheKind {
    pub const ALL: [CacheKind; 4] = [
        CacheKind::Precache,
        CacheKind::Bundles,
        CacheKind::Dependencies,
        CacheKind::Runtime,
    ];

    fn label(self) -> &'static str {
        match self {
            CacheKind::Precache => "precache",
            CacheKind::Bundles => "bundles",
            CacheKind::Dependencies => "deps",
            CacheKind::Runtime => "runtime",
        }
    }
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Settings shared by every worker component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkerConfig {
    /// Path prefix of the tooling namespace (setup and config pages)
    pub tooling_prefix: String,

    /// Path segment build artifacts are served under
    pub output_prefix: String,

    /// Host that dependency imports are rewritten to
    pub cdn_host: String,

    /// Cross-origin origins whose responses go into the dependency cache
    pub cdn_origins: Vec<String>,

    /// Prefix of every cache name
    pub cache_prefix: String,

    /// Bumping this invalidates every cache on the next activation
    pub cache_version: u32,

    /// URLs (same-origin paths) fetched into the precache on install
    pub precache: Vec<String>,

    /// Path suffixes that are only ever served from the local cache
    pub local_only_extensions: Vec<String>,

    /// Optional build tool config file at the project root
    pub tool_config_file: String,

    /// Precached page shown for navigations while offline
    pub offline_page: String,

    /// Upper bound for a single build in seconds; `0` disables the deadline
    pub build_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            tooling_prefix: "/_dev_/".to_string(),
            output_prefix: "_out_".to_string(),
            cdn_host: "esm.sh".to_string(),
            cdn_origins: vec!["https://esm.sh".to_string()],
            cache_prefix: "tarn".to_string(),
            cache_version: 1,
            precache: vec![
                "/_dev_/setup".to_string(),
                "/_dev_/config".to_string(),
                "/_dev_/offline".to_string(),
                "/_dev_/client.js".to_string(),
            ],
            local_only_extensions: vec![".wasm".to_string(), ".worker.js".to_string()],
            tool_config_file: "tsconfig.json".to_string(),
            offline_page: "/_dev_/offline".to_string(),
            build_timeout_secs: 120,
        }
    }
}

impl WorkerConfig {
    /// Versioned cache name for a cache kind.
    pub fn cache_name(&self, kind: CacheKind) -> String {
        format!("{}-{}-v{}", self.cache_prefix, kind, self.cache_version)
    }

    /// Every cache name the current version owns.
    pub fn cache_names(&self) -> Vec<String> {
        CacheKind::ALL.iter().map(|kind| self.cache_name(*kind)).collect()
    }

    /// Path of a page inside the tooling namespace.
    pub fn tooling_path(&self, page: &str) -> String {
        format!("{}{}", self.tooling_prefix, page)
    }

    pub fn setup_path(&self) -> String {
        self.tooling_path("setup")
    }

    pub fn config_path(&self) -> String {
        self.tooling_path("config")
    }

    /// URL path prefix of one project's build output, without trailing slash.
    pub fn output_dir(&self, project: &str) -> String {
        format!("/{}/{}", self.output_prefix.trim_matches('/'), project)
    }

    pub fn build_timeout(&self) -> Option<Duration> {
        (self.build_timeout_secs > 0).then(|| Duration::from_secs(self.build_timeout_secs))
    }

    /// Whether a path is served from the local cache only.
    pub fn is_local_only(&self, path: &str) -> bool {
        self.local_only_extensions
            .iter()
            .any(|ext| path.ends_with(ext.as_str()))
    }

    /// Check invariants the worker relies on.
    pub fn validate(&self) -> Result<()> {
        if !self.tooling_prefix.starts_with('/') || !self.tooling_prefix.ends_with('/') {
            return Err(Error::generic(format!(
                "toolingPrefix must start and end with '/', got '{}'",
                self.tooling_prefix
            )));
        }
        if self.output_prefix.trim_matches('/').is_empty() {
            return Err(Error::generic("outputPrefix must not be empty"));
        }
        if self.cdn_host.is_empty() || self.cdn_host.contains('/') {
            return Err(Error::generic(format!(
                "cdnHost must be a bare host name, got '{}'",
                self.cdn_host
            )));
        }
        for origin in &self.cdn_origins {
            url::Url::parse(origin)
                .map_err(|e| Error::generic(format!("invalid CDN origin '{origin}': {e}")))?;
        }
        Ok(())
    }
}
