//! Request classification, caching policies and worker lifecycle events.

mod helpers;

use helpers::*;
use http::header::{self, HeaderValue};
use http::{Method, StatusCode};
use std::sync::Arc;
use tarn::runtime::{CacheStorage, MemoryCacheStorage, MemoryFs, Permission, ProjectFs};
use tarn::{
    DevWorker, FetchRequest, FetchResponse, ProjectId, READY, RequestClass, RouterKind, RunConfig,
    WorkerConfig, WorkerMessage, WorkerReply,
};
use url::Url;

fn external(url: &str) -> FetchRequest {
    FetchRequest::get(Url::parse(url).unwrap())
}

fn scope_url(path: &str) -> String {
    format!("http://localhost:3000{path}")
}

#[tokio::test]
async fn classification_order() {
    let h = harness(site()).await;
    let class = |request: &FetchRequest| h.worker.classify(request);

    assert_eq!(class(&navigate("/")), RequestClass::Navigation);
    assert_eq!(class(&get("/logo.png")), RequestClass::Asset);
    assert_eq!(class(&get("/_dev_/setup")), RequestClass::Tooling);
    assert_eq!(class(&navigate("/_dev_/config")), RequestClass::Tooling);
    assert_eq!(class(&get("/pkg/engine.wasm")), RequestClass::LocalOnly);
    assert_eq!(class(&get("/compute.worker.js")), RequestClass::LocalOnly);
    assert_eq!(class(&external("https://esm.sh/react@18")), RequestClass::Dependency);
    assert_eq!(class(&external("https://fonts.example.com/a.css")), RequestClass::PassThrough);
    assert_eq!(class(&external("http://blog.localhost:4000/")), RequestClass::PassThrough);
    assert_eq!(class(&external("chrome-extension://abc/x.js")), RequestClass::Opaque);

    let post = FetchRequest {
        method: Method::POST,
        ..get("/api")
    };
    assert_eq!(class(&post), RequestClass::Opaque);

    h.network.set_offline(true);
    assert_eq!(class(&navigate("/")), RequestClass::LocalOnly);
    assert_eq!(class(&external("https://esm.sh/react@18")), RequestClass::LocalOnly);
}

#[tokio::test]
async fn cdn_dependencies_are_cached() {
    let h = harness(site()).await;
    let cdn = "https://esm.sh/react@18";
    h.network.respond_text(cdn, "export default {}");

    let first = h.fetch(external(cdn)).await;
    let second = h.fetch(external(cdn)).await;
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(second.text_body(), "export default {}");
    assert_eq!(h.network.hits(cdn), 1);
}

#[tokio::test]
async fn cdn_failure_is_bad_gateway() {
    let h = harness(site()).await;
    let response = h.fetch(external("https://esm.sh/missing")).await;
    assert_eq!(response.status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn pass_through_falls_back_to_runtime_cache() {
    let h = harness(site()).await;
    let font = "https://fonts.example.com/a.css";
    let secret = "https://api.example.com/me";
    h.network.respond_text(font, "body{}");
    h.network.respond(
        secret,
        FetchResponse::text(StatusCode::OK, "{}")
            .with_header(header::CACHE_CONTROL, HeaderValue::from_static("private")),
    );

    assert_eq!(h.fetch(external(font)).await.status, StatusCode::OK);
    assert_eq!(h.fetch(external(secret)).await.status, StatusCode::OK);

    h.network.forget(font);
    h.network.forget(secret);
    let cached = h.fetch(external(font)).await;
    assert_eq!(cached.status, StatusCode::OK);
    assert_eq!(cached.text_body(), "body{}");
    assert_eq!(h.fetch(external(secret)).await.status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn static_assets_come_from_static_root() {
    let h = harness(site().with_file("logo.png", vec![0x89, b'P', b'N', b'G'])).await;

    let logo = h.fetch(get("/logo.png")).await;
    assert_eq!(logo.status, StatusCode::OK);
    assert_eq!(logo.content_type(), Some("image/png"));
    assert_eq!(&logo.body[..], &[0x89, b'P', b'N', b'G']);

    assert_eq!(h.fetch(get("/nope.png")).await.status, StatusCode::NOT_FOUND);

    h.fs.set_permission(Permission::Denied);
    assert_eq!(h.fetch(get("/logo.png")).await.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn separate_static_root() {
    let bundler = Arc::new(FakeBundler::new());
    let (worker, _network) = bare_worker(WorkerConfig::default(), bundler);
    let root = site().into_handle();
    let public = MemoryFs::new("public")
        .with_file("robots.txt", "User-agent: *")
        .into_handle();
    worker
        .setup_project(ProjectId::new(PROJECT), root, Some(public))
        .await
        .unwrap();

    let robots = worker.on_fetch(get("/robots.txt")).await.unwrap();
    assert_eq!(robots.text_body(), "User-agent: *");
    let manifest = worker.on_fetch(get("/package.json")).await.unwrap();
    assert_eq!(manifest.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn setup_page_redirects_configured_projects() {
    let h = harness(site()).await;
    let setup = h.fetch(navigate("/_dev_/setup")).await;
    assert_eq!(setup.status, StatusCode::FOUND);
    assert_eq!(setup.header(header::LOCATION), Some("/"));

    let reset = url("/_dev_/setup?reset");
    h.network.respond(reset.as_str(), FetchResponse::html(StatusCode::OK, "<h1>Setup</h1>"));
    let page = h.fetch(FetchRequest::navigate(reset)).await;
    assert_eq!(page.status, StatusCode::OK);
    assert!(page.text_body().contains("Setup"));
}

#[tokio::test]
async fn only_a_reset_key_keeps_setup_reachable() {
    let h = harness(site()).await;
    for query in ["?preset=1", "?x=resetting", "?reset_all"] {
        let page = h.fetch(navigate(&format!("/_dev_/setup{query}"))).await;
        assert_eq!(page.status, StatusCode::FOUND, "{query}");
        assert_eq!(page.header(header::LOCATION), Some("/"));
    }

    let reset = url("/_dev_/setup?step=2&reset=1");
    h.network.respond(reset.as_str(), FetchResponse::html(StatusCode::OK, "<h1>Setup</h1>"));
    let page = h.fetch(FetchRequest::navigate(reset)).await;
    assert_eq!(page.status, StatusCode::OK);
}

#[tokio::test]
async fn tooling_falls_back_to_precache_but_never_caches_config() {
    let h = harness(site()).await;
    for path in &h.worker.config().precache {
        h.network.respond_text(&scope_url(path), &format!("shell {path}"));
    }
    h.worker.on_install().await;

    // Project subdomains reuse the shells precached on the scope origin.
    let client = h.fetch(get("/_dev_/client.js")).await;
    assert_eq!(client.text_body(), "shell /_dev_/client.js");

    let config = url("/_dev_/config");
    h.network.respond_text(config.as_str(), "config page");
    assert_eq!(h.fetch(get("/_dev_/config")).await.text_body(), "config page");
    h.network.forget(config.as_str());
    // Falls back to the install-time copy, not the one fetched above.
    assert_eq!(
        h.fetch(get("/_dev_/config")).await.text_body(),
        "shell /_dev_/config"
    );
}

#[tokio::test]
async fn offline_navigation_serves_offline_shell() {
    let h = harness(site()).await;
    h.network
        .respond_text(&scope_url("/_dev_/offline"), "offline shell");
    let report = h.worker.on_install().await;
    assert_eq!(report.cached, vec!["/_dev_/offline".to_string()]);
    assert_eq!(report.failed.len(), 3);

    h.fetch(navigate("/")).await;
    h.network.set_offline(true);

    assert_eq!(h.fetch(navigate("/about")).await.text_body(), "offline shell");
    let built = h.fetch(get("/_out_/blog/main.js")).await;
    assert_eq!(built.status, StatusCode::OK);
    let missing = h.fetch(get("/other.js")).await;
    assert_eq!(missing.status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn offline_without_shell_uses_builtin_page() {
    let h = harness(site()).await;
    h.network.set_offline(true);
    let page = h.fetch(navigate("/")).await;
    assert_eq!(page.status, StatusCode::OK);
    assert!(page.text_body().contains("You are offline"));
}

#[tokio::test]
async fn local_only_assets_are_fetched_once() {
    let h = harness(site()).await;
    let wasm = url("/engine.wasm");
    h.network.respond(
        wasm.as_str(),
        FetchResponse::file("engine.wasm", vec![0u8, 97, 115, 109]),
    );
    h.fetch(get("/engine.wasm")).await;
    let again = h.fetch(get("/engine.wasm")).await;
    assert_eq!(again.content_type(), Some("application/wasm"));
    assert_eq!(h.network.hits(wasm.as_str()), 1);
}

#[tokio::test]
async fn activate_removes_other_versions() {
    let caches = Arc::new(MemoryCacheStorage::new());
    caches.open("tarn-bundles-v0").await.unwrap();
    caches.open("tarn-bundles-v1").await.unwrap();
    caches.open("unrelated").await.unwrap();

    let worker = DevWorker::builder(Url::parse(SCOPE).unwrap())
        .caches(caches.clone())
        .network(Arc::new(ScriptedNetwork::new()))
        .bundler(Arc::new(FakeBundler::new()))
        .build()
        .unwrap();

    let report = worker.on_activate().await;
    assert!(report.claim_clients);
    assert_eq!(report.deleted, vec!["tarn-bundles-v0", "unrelated"]);
    assert_eq!(caches.keys().await, vec!["tarn-bundles-v1"]);
}

#[tokio::test]
async fn builder_requires_collaborators() {
    let missing_bundler = DevWorker::builder(Url::parse(SCOPE).unwrap())
        .network(Arc::new(ScriptedNetwork::new()))
        .build();
    assert!(missing_bundler.is_err());

    let bad_config = DevWorker::builder(Url::parse(SCOPE).unwrap())
        .config(WorkerConfig {
            tooling_prefix: "_dev_".into(),
            ..WorkerConfig::default()
        })
        .network(Arc::new(ScriptedNetwork::new()))
        .bundler(Arc::new(FakeBundler::new()))
        .build();
    assert!(bad_config.is_err());
}

#[tokio::test]
async fn readiness_codes() {
    let (worker, _network) = bare_worker(WorkerConfig::default(), Arc::new(FakeBundler::new()));
    let id = ProjectId::new(PROJECT);
    assert_eq!(worker.readiness(&id).await, 1);

    let h = harness(site()).await;
    assert_eq!(h.worker.readiness(&h.id()).await, READY);

    h.fs.set_permission(Permission::Prompt);
    assert_eq!(h.worker.readiness(&h.id()).await, 3);
    h.fs.set_permission(Permission::Granted);

    h.fs.insert("package.json", "{ broken");
    assert_eq!(h.worker.readiness(&h.id()).await, 5);

    h.fs.insert("package.json", r#"{"run":{"router":""}}"#);
    assert_eq!(h.worker.readiness(&h.id()).await, 2);
}

#[tokio::test]
async fn messages_use_type_value_shape() {
    let h = harness(site()).await;
    let message: WorkerMessage = serde_json::from_str(r#"{"type":"isReady"}"#).unwrap();
    let reply = h.worker.on_message(message, &url("/")).await;
    assert_eq!(
        serde_json::to_value(&reply).unwrap(),
        serde_json::json!({"type": "isReady", "value": -1})
    );

    let reload: WorkerReply = h.worker.on_message(WorkerMessage::Reload, &url("/")).await;
    assert_eq!(reload.value, READY);

    let other = h
        .worker
        .on_message(WorkerMessage::IsReady, &Url::parse("http://docs.localhost:3000/").unwrap())
        .await;
    assert_eq!(other.value, 1);
}

#[tokio::test]
async fn permission_request_can_be_denied() {
    let h = harness(site().with_request_result(Permission::Denied)).await;
    h.fs.set_permission(Permission::Prompt);
    let reply = h
        .worker
        .on_message(WorkerMessage::RequestPermission, &url("/"))
        .await;
    assert_eq!(reply.value, "denied");
    assert!(h.fetch(navigate("/")).await.text_body().contains("Grant access"));
}

#[tokio::test]
async fn saving_configuration_writes_manifest() {
    let fs = MemoryFs::new("blog")
        .with_file("package.json", r#"{"name":"blog","private":true}"#)
        .with_file("src/index.html", PAGE)
        .with_file("src/main.ts", "");
    let h = harness(fs).await;
    assert_eq!(h.worker.readiness(&h.id()).await, 2);

    let run = RunConfig {
        router: "./src/".into(),
        ..RunConfig::default()
    };
    let record = h.worker.save_configuration(&h.id(), run).await.unwrap();
    assert_eq!(record.router, RouterKind::Filesystem { root: "src".into() });

    let text = h.fs.read_text("package.json").await.unwrap();
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json["run"]["router"], "src/");
    assert_eq!(json["private"], true);

    assert_eq!(h.fetch(navigate("/")).await.status, StatusCode::OK);
}

#[tokio::test]
async fn import_map_for_bundlers_without_resolution() {
    let fs = MemoryFs::new("blog")
        .with_file(
            "package.json",
            r#"{"run":{"router":"src/"},"dependencies":{"react":"^18.2.0"}}"#,
        )
        .with_file("src/index.html", PAGE)
        .with_file("src/main.ts", "import React from 'react'");
    let h = harness_with(
        fs,
        FakeBundler::new().without_import_resolution(),
        WorkerConfig::default(),
    )
    .await;

    let html = h.fetch(navigate("/")).await.text_body();
    let map = html.find(r#"<script type="importmap">"#).expect("import map injected");
    assert!(map < html.find("<title>").unwrap());
    assert!(html.contains(r#""react":"https://esm.sh/react@^18.2.0""#));
}

#[tokio::test]
async fn dependency_imports_resolve_through_cdn() {
    let fs = MemoryFs::new("blog")
        .with_file(
            "package.json",
            r#"{"run":{"router":"src/","dependencies":{"@ui/kit":"2"}},"dependencies":{"react":"18"}}"#,
        )
        .with_file("src/index.html", PAGE)
        .with_file("src/main.ts", "")
        .with_file("src/util.ts", "");
    let h = harness_with(
        fs,
        FakeBundler::new().with_imports(&["react", "@ui/kit/theme.css", "./util", "https://x.dev/a.js"]),
        WorkerConfig::default(),
    )
    .await;

    let out = h.fetch(navigate("/index.out")).await;
    let json: serde_json::Value = serde_json::from_slice(&out.body).unwrap();
    let warnings = json["warnings"].as_array().unwrap();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0]["message"].as_str().unwrap().contains("@ui/kit@2/theme.css"));

    let built = h.fetch(get("/_out_/blog/main.js")).await.text_body();
    assert!(built.contains("https://esm.sh/react@18\n"));
    assert!(built.contains("https://esm.sh/@ui/kit@2/theme.css external"));
    assert!(built.contains("src/util.ts"));
    assert!(built.contains("https://x.dev/a.js"));
}
