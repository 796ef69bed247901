//! `tarn serve`: register a folder as the project and serve it.

use crate::cli::ServeArgs;
use crate::config::TarnConfig;
use crate::error::{CliError, Result, ResultExt};
use crate::native::{EsbuildBundler, HostNetwork, NativeFs};
use crate::{server, ui};
use std::path::Path;
use std::sync::Arc;
use tarn::runtime::DirectoryHandle;
use tarn::{DevWorker, ErrorCode, PackageManifest, ProjectId, ProjectRecord, READY};
use tokio::net::TcpListener;
use tracing::warn;
use url::Url;

/// Execute the serve command.
pub async fn execute(args: ServeArgs) -> Result<()> {
    let config = TarnConfig::load(&args)?;
    let project = project_fs(&args.dir)?;

    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .map_err(|source| CliError::Bind {
            addr: format!("{}:{}", config.host, config.port),
            source,
        })?;
    let scope = server::scope_url(listener.local_addr()?)?;

    let worker = Arc::new(build_worker(&config, &project, scope)?);
    prepare(&worker, &config, &project).await?;

    ui::serving(project.root(), worker.scope());
    server::serve(worker, listener, shutdown_signal()).await
}

/// Open the project folder, which must be an existing directory.
pub fn project_fs(dir: &Path) -> Result<NativeFs> {
    let metadata = std::fs::metadata(dir).with_path(dir)?;
    if !metadata.is_dir() {
        return Err(CliError::NotADirectory(dir.to_path_buf()));
    }
    Ok(NativeFs::new(dir)?)
}

/// Wire a worker to the native collaborators for one project folder.
pub fn build_worker(config: &TarnConfig, project: &NativeFs, scope: Url) -> Result<DevWorker> {
    let network = HostNetwork::new(scope.clone(), config.worker.tooling_prefix.clone())
        .with_origin_files(DirectoryHandle::new(Arc::new(project.clone())));
    let bundler = EsbuildBundler::new(config.esbuild.clone(), project.root());

    Ok(DevWorker::builder(scope)
        .config(config.worker.clone())
        .network(Arc::new(network))
        .bundler(Arc::new(bundler))
        .build()?)
}

/// Set the folder up as the default project and run install and activate.
///
/// A `router` from the configuration is saved into package.json first.
pub async fn prepare(worker: &DevWorker, config: &TarnConfig, project: &NativeFs) -> Result<ProjectRecord> {
    let id = ProjectId::default();
    let root = DirectoryHandle::new(Arc::new(project.clone()));
    let static_root = match config.static_root(project.root()) {
        Some(dir) => Some(DirectoryHandle::new(Arc::new(project_fs(&dir)?))),
        None => None,
    };

    let mut record = worker.setup_project(id.clone(), root, static_root).await?;
    if let Some(router) = &config.router {
        let mut run = PackageManifest::load(&record.root)
            .await?
            .unwrap_or_default()
            .run;
        run.router = router.clone();
        record = worker.save_configuration(&id, run).await?;
    }

    let install = worker.on_install().await;
    for url in &install.failed {
        warn!(%url, "could not precache tooling page");
    }
    let activate = worker.on_activate().await;
    ui::removed_caches(&activate.deleted);

    match worker.readiness(&id).await {
        READY => {}
        code if code == ErrorCode::NeedsConfig.as_i32() => ui::warning(&format!(
            "No router configured. Pass --router or open {}",
            worker
                .scope()
                .join(&worker.config().config_path())
                .map(|url| url.to_string())
                .unwrap_or_else(|_| worker.config().config_path())
        )),
        code => ui::warning(&format!(
            "Project is not ready yet (error code {code}); pages will explain why"
        )),
    }
    Ok(record)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "could not listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    ui::info("Shutting down");
}
