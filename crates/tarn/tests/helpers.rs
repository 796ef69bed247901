//! Shared test utilities for tarn integration tests
//!
//! Fakes for the network and the compiler, plus a harness that wires a
//! [`DevWorker`] to an in-memory project served as `blog.localhost`.

#![allow(dead_code)]

use async_trait::async_trait;
use http::StatusCode;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tarn::bundle::{Namespace, Resolution};
use tarn::runtime::{
    BundleInput, Bundler, BundlerFailure, BundlerOutput, DirectoryHandle, MemoryCacheStorage,
    MemoryFs, MetaOutput, NetError, Network, OutputFile,
};
use tarn::{
    DevWorker, Diagnostic, FetchRequest, FetchResponse, ProjectId, ProjectRecord, WorkerConfig,
};
use url::Url;

pub const SCOPE: &str = "http://localhost:3000/";
pub const PROJECT: &str = "blog";

/// URL on the test project's origin.
pub fn url(path: &str) -> Url {
    Url::parse(&format!("http://{PROJECT}.localhost:3000{path}")).unwrap()
}

pub fn navigate(path: &str) -> FetchRequest {
    FetchRequest::navigate(url(path))
}

pub fn get(path: &str) -> FetchRequest {
    FetchRequest::get(url(path))
}

/// A page loading `./main.ts`.
pub const PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Blog</title></head>
<body>
<script type="module" src="./main.ts"></script>
</body>
</html>"#;

/// Project with a filesystem router rooted at `src/`.
pub fn site() -> MemoryFs {
    MemoryFs::new("blog")
        .with_file("package.json", r#"{"name":"blog","run":{"router":"src/"}}"#)
        .with_file("src/index.html", PAGE)
        .with_file("src/main.ts", "console.log('hi')")
}

/// Network answering from a fixed table of URLs.
#[derive(Debug, Default)]
pub struct ScriptedNetwork {
    responses: Mutex<HashMap<String, FetchResponse>>,
    requests: Mutex<Vec<String>>,
    offline: AtomicBool,
}

impl ScriptedNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, url: &str, response: FetchResponse) {
        self.responses.lock().insert(url.to_string(), response);
    }

    pub fn respond_text(&self, url: &str, body: &str) {
        self.respond(url, FetchResponse::text(StatusCode::OK, body));
    }

    pub fn forget(&self, url: &str) {
        self.responses.lock().remove(url);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of fetches made for `url`.
    pub fn hits(&self, url: &str) -> usize {
        self.requests.lock().iter().filter(|u| *u == url).count()
    }
}

#[async_trait]
impl Network for ScriptedNetwork {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, NetError> {
        let key = request.url.to_string();
        self.requests.lock().push(key.clone());
        if self.offline.load(Ordering::SeqCst) {
            return Err(NetError::Unreachable(key));
        }
        self.responses
            .lock()
            .get(&key)
            .cloned()
            .ok_or(NetError::Unreachable(key))
    }

    fn is_online(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }
}

/// Compiler stand-in.
///
/// Emits one `{stem}.js` (or `.css`) file per entry point. Imports listed
/// with [`FakeBundler::with_imports`] are resolved through the build's
/// resolver and written into every output.
#[derive(Debug)]
pub struct FakeBundler {
    calls: AtomicUsize,
    delay: Option<Duration>,
    imports: Vec<String>,
    resolves_imports: bool,
    hashed_chunks: bool,
    failure: Mutex<Option<Vec<Diagnostic>>>,
    panics: AtomicBool,
}

impl Default for FakeBundler {
    fn default() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: None,
            imports: Vec::new(),
            resolves_imports: true,
            hashed_chunks: false,
            failure: Mutex::new(None),
            panics: AtomicBool::new(false),
        }
    }
}

impl FakeBundler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_imports(mut self, imports: &[&str]) -> Self {
        self.imports = imports.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Behave like an external process that cannot call back for imports.
    pub fn without_import_resolution(mut self) -> Self {
        self.resolves_imports = false;
        self
    }

    /// Also emit a shared chunk whose name changes with every build.
    pub fn with_hashed_chunks(mut self) -> Self {
        self.hashed_chunks = true;
        self
    }

    /// Fail every following build with `errors`, or succeed again with `None`.
    pub fn fail_with(&self, errors: Option<Vec<Diagnostic>>) {
        *self.failure.lock() = errors;
    }

    pub fn set_panics(&self, panics: bool) {
        self.panics.store(panics, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Bundler for FakeBundler {
    async fn build(&self, input: BundleInput) -> Result<BundlerOutput, BundlerFailure> {
        let build = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.panics.load(Ordering::SeqCst) {
            panic!("bundler crashed");
        }
        if let Some(errors) = self.failure.lock().clone() {
            return Err(BundlerFailure::new(errors));
        }

        let mut resolved = Vec::new();
        for specifier in &self.imports {
            match input.resolver.resolve(specifier, "", Namespace::Local).await {
                Ok(Resolution::Remote(url)) => {
                    let source = input.resolver.load_remote(&url).await;
                    resolved.push(format!("{url} {}", if source.is_some() { "inlined" } else { "external" }));
                }
                Ok(Resolution::External(spec)) | Ok(Resolution::Local(spec)) => resolved.push(spec),
                Err(err) => {
                    let errors = if err.diagnostics().is_empty() {
                        vec![Diagnostic::new(err.to_string())]
                    } else {
                        err.diagnostics().to_vec()
                    };
                    return Err(BundlerFailure::new(errors));
                }
            }
        }

        let mut output = BundlerOutput::default();
        for entry in &input.entry_points {
            let file = entry.rsplit('/').next().unwrap_or(entry);
            let (stem, ext) = file.rsplit_once('.').unwrap_or((file, "js"));
            let name = if ext == "css" {
                format!("{stem}.css")
            } else {
                format!("{stem}.js")
            };
            let contents = format!("/* {entry} */\n{}\n", resolved.join("\n"));
            output.metafile.outputs.insert(
                name.clone(),
                MetaOutput {
                    entry_point: Some(entry.clone()),
                    css_bundle: None,
                    bytes: contents.len() as u64,
                },
            );
            output.output_files.push(OutputFile::new(name, contents));
        }
        if self.hashed_chunks {
            let name = format!("chunk-{build}.js");
            output.metafile.outputs.insert(
                name.clone(),
                MetaOutput {
                    entry_point: None,
                    css_bundle: None,
                    bytes: 1,
                },
            );
            output.output_files.push(OutputFile::new(name, "1"));
        }
        Ok(output)
    }

    fn resolves_imports(&self) -> bool {
        self.resolves_imports
    }
}

/// A worker with one project set up.
pub struct Harness {
    pub worker: DevWorker,
    pub fs: Arc<MemoryFs>,
    pub network: Arc<ScriptedNetwork>,
    pub bundler: Arc<FakeBundler>,
}

impl Harness {
    pub fn id(&self) -> ProjectId {
        ProjectId::new(PROJECT)
    }

    pub async fn fetch(&self, request: FetchRequest) -> FetchResponse {
        self.worker
            .on_fetch(request)
            .await
            .expect("request was not aborted")
    }
}

/// Worker without any project.
pub fn bare_worker(config: WorkerConfig, bundler: Arc<FakeBundler>) -> (DevWorker, Arc<ScriptedNetwork>) {
    let network = Arc::new(ScriptedNetwork::new());
    let worker = DevWorker::builder(Url::parse(SCOPE).unwrap())
        .config(config)
        .caches(Arc::new(MemoryCacheStorage::new()))
        .network(network.clone())
        .bundler(bundler)
        .build()
        .unwrap();
    (worker, network)
}

pub async fn harness_with(fs: MemoryFs, bundler: FakeBundler, config: WorkerConfig) -> Harness {
    let bundler = Arc::new(bundler);
    let (worker, network) = bare_worker(config, bundler.clone());
    let fs = Arc::new(fs);
    let record: ProjectRecord = worker
        .setup_project(ProjectId::new(PROJECT), DirectoryHandle::new(fs.clone()), None)
        .await
        .unwrap();
    assert_eq!(record.id.as_str(), PROJECT);
    Harness {
        worker,
        fs,
        network,
        bundler,
    }
}

pub async fn harness(fs: MemoryFs) -> Harness {
    harness_with(fs, FakeBundler::new(), WorkerConfig::default()).await
}
