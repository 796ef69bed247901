//! Configuration for `tarn serve`, merged from several sources.
//!
//! Priority: CLI flags > `TARN_*` environment > `tarn.config.json` > defaults.
//!
//! ```json
//! {
//!   "port": 4000,
//!   "router": "pages/",
//!   "worker": { "cdnHost": "esm.sh", "buildTimeoutSecs": 60 }
//! }
//! ```
//!
//! Top-level keys can also come from the environment (`TARN_PORT`,
//! `TARN_HOST`, `TARN_ROUTER`, `TARN_ESBUILD`, `TARN_STATIC_DIR`).

use crate::cli::ServeArgs;
use crate::error::{ConfigError, Result};
use figment::{
    Figment,
    providers::{Env, Format as _, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tarn::WorkerConfig;

/// Config file looked up in the project folder.
pub const CONFIG_FILE: &str = "tarn.config.json";

/// Settings of one `tarn serve` run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TarnConfig {
    /// Interface to bind
    pub host: String,

    /// Port to listen on; `0` picks a free one
    pub port: u16,

    /// Router written to package.json before serving
    #[serde(skip_serializing_if = "Option::is_none")]
    pub router: Option<String>,

    /// Separate folder for static assets, relative to the project folder
    #[serde(alias = "static_dir", skip_serializing_if = "Option::is_none")]
    pub static_dir: Option<PathBuf>,

    /// esbuild binary, looked up on `PATH` when not a path
    pub esbuild: String,

    /// Settings handed to the worker
    pub worker: WorkerConfig,
}

impl Default for TarnConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            router: None,
            static_dir: None,
            esbuild: "esbuild".to_string(),
            worker: WorkerConfig::default(),
        }
    }
}

/// Flags the user actually passed; unset ones don't override lower layers.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct CliOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    router: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    static_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    esbuild: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    worker: Option<WorkerOverrides>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WorkerOverrides {
    cdn_host: String,
}

impl From<&ServeArgs> for CliOverrides {
    fn from(args: &ServeArgs) -> Self {
        Self {
            host: args.host.clone(),
            port: args.port,
            router: args.router.clone(),
            static_dir: args.static_dir.clone(),
            esbuild: args.esbuild.clone(),
            worker: args
                .cdn_host
                .clone()
                .map(|cdn_host| WorkerOverrides { cdn_host }),
        }
    }
}

impl TarnConfig {
    /// Load configuration for a serve invocation.
    pub fn load(args: &ServeArgs) -> Result<Self> {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));

        let config_file = match &args.config {
            Some(path) if !path.is_file() => {
                return Err(ConfigError::NotFound(path.clone()).into());
            }
            Some(path) => Some(path.clone()),
            None => {
                let default_path = args.dir.join(CONFIG_FILE);
                default_path.is_file().then_some(default_path)
            }
        };
        if let Some(path) = config_file {
            figment = figment.merge(Json::file(path));
        }

        figment = figment.merge(Env::prefixed("TARN_"));
        figment = figment.merge(Serialized::defaults(CliOverrides::from(args)));

        let mut config: Self = figment
            .extract()
            .map_err(|e| ConfigError::Extract(e.to_string()))?;
        config.trust_cdn_host();
        config.validate()?;
        Ok(config)
    }

    /// Check values the server and worker rely on.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "host".to_string(),
                value: format!("'{}'", self.host),
                hint: "Use an interface address such as 127.0.0.1".to_string(),
            }
            .into());
        }
        if self.esbuild.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "esbuild".to_string(),
                value: "''".to_string(),
                hint: "Point it at the esbuild binary or leave it unset".to_string(),
            }
            .into());
        }
        self.worker.validate().map_err(|e| ConfigError::InvalidValue {
            field: "worker".to_string(),
            value: e.to_string(),
            hint: "Check the \"worker\" section of tarn.config.json".to_string(),
        })?;
        Ok(())
    }

    /// Static asset folder, resolved against the project folder.
    pub fn static_root(&self, project_dir: &Path) -> Option<PathBuf> {
        self.static_dir.as_ref().map(|dir| project_dir.join(dir))
    }

    /// Responses from the configured CDN host are always cacheable.
    fn trust_cdn_host(&mut self) {
        let origin = format!("https://{}", self.worker.cdn_host);
        if !self.worker.cdn_origins.contains(&origin) {
            self.worker.cdn_origins.push(origin);
        }
    }
}
