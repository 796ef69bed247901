//! Shared test utilities for tarn-cli integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tarn::DevWorker;
use tarn::runtime::{
    BundleInput, Bundler, BundlerFailure, BundlerOutput, DirectoryHandle, MetaOutput, OutputFile,
};
use tarn_cli::TarnConfig;
use tarn_cli::commands::serve::{prepare, project_fs};
use tarn_cli::native::HostNetwork;
use tarn_cli::server;
use tempfile::TempDir;
use tokio::net::TcpListener;
use url::Url;

/// Bundler that copies each entry to `<stem>.js` unchanged.
#[derive(Debug, Default)]
pub struct CopyBundler;

#[async_trait]
impl Bundler for CopyBundler {
    async fn build(&self, input: BundleInput) -> Result<BundlerOutput, BundlerFailure> {
        let mut output = BundlerOutput::default();
        for entry in &input.entry_points {
            let source = input
                .fs
                .read_text(entry)
                .await
                .map_err(|e| BundlerFailure::single(e.to_string()))?;
            let file = entry.rsplit('/').next().unwrap_or(entry);
            let stem = file.rsplit_once('.').map_or(file, |(stem, _)| stem);
            let name = format!("{stem}.js");
            output.metafile.outputs.insert(
                name.clone(),
                MetaOutput {
                    entry_point: Some(entry.clone()),
                    css_bundle: None,
                    bytes: source.len() as u64,
                },
            );
            output.output_files.push(OutputFile::new(name, source));
        }
        Ok(output)
    }

    fn resolves_imports(&self) -> bool {
        false
    }
}

/// Project folder with `src/index.html` loading `src/main.ts`.
pub fn project(manifest: &str) -> TempDir {
    let temp = TempDir::new().unwrap();
    write(temp.path(), "package.json", manifest);
    write(
        temp.path(),
        "src/index.html",
        "<html><head><title>Site</title></head><body><script type=\"module\" src=\"./main.ts\"></script></body></html>",
    );
    write(temp.path(), "src/main.ts", "import React from 'react';\nconsole.log(React);\n");
    temp
}

pub fn write(root: &Path, path: &str, contents: &str) {
    let target = root.join(path);
    fs::create_dir_all(target.parent().unwrap()).unwrap();
    fs::write(target, contents).unwrap();
}

/// A running server for a project folder.
pub struct TestServer {
    pub base: Url,
    pub worker: Arc<DevWorker>,
    pub client: reqwest::Client,
}

impl TestServer {
    pub async fn start(dir: &Path, config: TarnConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let scope = server::scope_url(listener.local_addr().unwrap()).unwrap();
        let project = project_fs(dir).unwrap();

        let network = HostNetwork::new(scope.clone(), config.worker.tooling_prefix.clone())
            .with_origin_files(DirectoryHandle::new(Arc::new(project.clone())));
        let worker = DevWorker::builder(scope.clone())
            .config(config.worker.clone())
            .network(Arc::new(network))
            .bundler(Arc::new(CopyBundler))
            .build()
            .unwrap();
        let worker = Arc::new(worker);
        prepare(&worker, &config, &project).await.unwrap();

        tokio::spawn(server::serve(
            worker.clone(),
            listener,
            std::future::pending(),
        ));

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap();
        // The scope says `localhost`; connect over IPv4 explicitly.
        let base = Url::parse(&format!("http://127.0.0.1:{}/", scope.port().unwrap())).unwrap();
        Self {
            base,
            worker,
            client,
        }
    }

    pub fn url(&self, path: &str) -> Url {
        self.base.join(path).unwrap()
    }

    pub async fn navigate(&self, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .header("sec-fetch-mode", "navigate")
            .header("accept", "text/html")
            .send()
            .await
            .unwrap()
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client.get(self.url(path)).send().await.unwrap()
    }

    pub async fn post_json(&self, path: &str, body: serde_json::Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .header("content-type", "application/json")
            .body(body.to_string())
            .send()
            .await
            .unwrap()
    }
}
