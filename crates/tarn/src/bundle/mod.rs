//! Bundle engine: builds one route of a project.
//!
//! The engine owns everything around the compiler call:
//!
//! 1. check read permission on the project root
//! 2. read the manifest and the optional tool config file
//! 3. create an [`ImportResolver`] for the build
//! 4. run the [`Bundler`]
//! 5. write every emitted file into the bundle cache under
//!    `{origin}/{output-prefix}/{project}/…`
//! 6. rewrite the page's HTML to load the built entries
//!
//! Diagnostics from a failed build are enriched with source excerpts read
//! from the project before being returned.

pub mod bootstrap;
mod importmap;
pub mod resolve;

pub use bootstrap::{EntryOutput, EntryOutputs};
pub use importmap::ImportMap;
pub use resolve::{ImportResolver, Namespace, Resolution};

use crate::config::{CacheKind, WorkerConfig};
use crate::error::{Diagnostic, Error, Result};
use crate::http::FetchResponse;
use crate::manifest::PackageManifest;
use crate::project::ProjectRecord;
use crate::route::Route;
use crate::runtime::{BundleInput, Bundler, CacheStorage, DirectoryHandle, FsError, Network};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};
use url::Url;

/// Lines of source shown above a diagnostic's line.
const CONTEXT_LINES: u32 = 2;

/// Result of a successful build.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildOutput {
    pub warnings: Vec<Diagnostic>,
    /// Absolute URLs of every cached artifact
    pub entry_points: Vec<String>,
    /// Page key → rendered HTML
    pub html: BTreeMap<String, String>,
}

/// Builds routes and caches their artifacts.
#[derive(Debug)]
pub struct BundleEngine {
    bundler: Arc<dyn Bundler>,
    caches: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    config: Arc<WorkerConfig>,
}

impl BundleEngine {
    pub fn new(
        bundler: Arc<dyn Bundler>,
        caches: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
        config: Arc<WorkerConfig>,
    ) -> Self {
        Self {
            bundler,
            caches,
            network,
            config,
        }
    }

    /// Read the optional tool config file.
    ///
    /// A missing file is an empty config. Anything other than a JSON object
    /// fails the build before the bundler runs.
    async fn tool_config(&self, root: &DirectoryHandle) -> Result<Map<String, Value>> {
        let file = &self.config.tool_config_file;
        let text = match root.read_text(file).await {
            Ok(text) => text,
            Err(FsError::NotFound(_)) => return Ok(Map::new()),
            Err(FsError::NotUtf8(_)) => {
                return Err(Error::InvalidConfig {
                    file: file.clone(),
                    message: "file is not valid UTF-8".to_string(),
                });
            }
            Err(err) => return Err(err.into()),
        };

        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(Error::InvalidConfig {
                file: file.clone(),
                message: format!("expected a JSON object, found {}", json_kind(&other)),
            }),
            Err(err) => Err(Error::InvalidConfig {
                file: file.clone(),
                message: err.to_string(),
            }),
        }
    }

    /// Build a route.
    ///
    /// Artifacts of `previous` that this build did not emit again are evicted
    /// from the bundle cache once the new ones are stored.
    pub async fn build(
        &self,
        project: &ProjectRecord,
        route: &Route,
        origin: &Url,
        previous: Option<&BuildOutput>,
    ) -> Result<BuildOutput> {
        let started = Instant::now();
        project.root.ensure_readable().await?;

        let manifest = PackageManifest::load(&project.root)
            .await?
            .unwrap_or_default();
        let mut options = manifest.build.clone();
        options.extend(self.tool_config(&project.root).await?);

        let resolver = Arc::new(ImportResolver::new(
            project.root.clone(),
            Arc::clone(&self.network),
            self.config.cdn_host.clone(),
            route.working_dir.clone(),
            manifest.cdn_dependencies(),
        ));

        let uses_import_map = !self.bundler.resolves_imports();
        let externals = if uses_import_map {
            resolver.dependencies().keys().cloned().collect()
        } else {
            Vec::new()
        };

        debug!(
            project = %project.id,
            page = %route.page,
            entries = route.entry_points.len(),
            "starting bundler"
        );
        let input = BundleInput {
            project: project.id.clone(),
            entry_points: route.entry_paths(),
            working_dir: route.working_dir.clone(),
            externals,
            options,
            resolver: Arc::clone(&resolver),
            fs: project.root.clone(),
        };

        let output = match self.bundler.build(input).await {
            Ok(output) => output,
            Err(failure) => {
                let diagnostics = self.with_snippets(&project.root, failure.errors).await;
                return Err(Error::BuildFailed(diagnostics));
            }
        };

        let cache = self.caches.open(&self.config.cache_name(CacheKind::Bundles)).await?;
        let out_dir = route.out_dir.trim_end_matches('/');
        let mut urls: BTreeMap<String, String> = BTreeMap::new();
        for file in &output.output_files {
            let relative = file.path.trim_start_matches('/');
            let url = origin
                .join(&format!("{out_dir}/{relative}"))
                .map_err(|e| Error::generic(format!("invalid output path '{relative}': {e}")))?;
            cache
                .put(&url, FetchResponse::file(relative, file.contents.clone()))
                .await?;
            urls.insert(relative.to_string(), url.to_string());
        }
        if let Some(previous) = previous {
            let current: HashSet<&str> = urls.values().map(String::as_str).collect();
            let mut evicted = 0;
            for stale in &previous.entry_points {
                if current.contains(stale.as_str()) {
                    continue;
                }
                if let Ok(url) = Url::parse(stale) {
                    evicted += usize::from(cache.delete(&url).await);
                }
            }
            debug!(project = %project.id, evicted, "evicted stale build artifacts");
        }

        let mut entry_outputs = EntryOutputs::new();
        for entry in &route.entry_points {
            let Some((out_path, meta)) = output.metafile.output_for_entry(&entry.path) else {
                continue;
            };
            let url_of = |path: &str| urls.get(path.trim_start_matches('/')).cloned();
            let built = url_of(out_path);
            let is_css = out_path.to_ascii_lowercase().ends_with(".css");
            entry_outputs.insert(
                entry.path.clone(),
                EntryOutput {
                    script: built.clone().filter(|_| !is_css),
                    stylesheet: if is_css {
                        built
                    } else {
                        meta.css_bundle.as_deref().and_then(url_of)
                    },
                },
            );
        }

        let page = project.root.read_text(&route.html_path).await?;
        let import_map = uses_import_map.then(|| resolver.import_map());
        let html = bootstrap::rewrite_page(
            &page,
            &route.entry_points,
            &entry_outputs,
            import_map.as_ref(),
        );

        let mut warnings = output.warnings;
        warnings.extend(resolver.take_warnings());

        info!(
            project = %project.id,
            page = %route.page,
            files = urls.len(),
            warnings = warnings.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "build finished"
        );

        Ok(BuildOutput {
            warnings,
            entry_points: urls.into_values().collect(),
            html: BTreeMap::from([(route.page.clone(), html)]),
        })
    }

    /// Fill in missing snippets from the project's sources.
    async fn with_snippets(&self, root: &DirectoryHandle, diagnostics: Vec<Diagnostic>) -> Vec<Diagnostic> {
        let mut enriched = Vec::with_capacity(diagnostics.len());
        for mut diagnostic in diagnostics {
            if diagnostic.snippet.is_none() {
                if let (Some(file), Some(line)) = (diagnostic.file.as_deref(), diagnostic.line) {
                    if let Ok(source) = root.read_text(file).await {
                        diagnostic.snippet = source_excerpt(&source, line);
                    }
                }
            }
            enriched.push(diagnostic);
        }
        enriched
    }
}

/// Up to [`CONTEXT_LINES`] lines before `line` plus the line itself,
/// prefixed with right-aligned line numbers.
pub fn source_excerpt(source: &str, line: u32) -> Option<String> {
    if line == 0 {
        return None;
    }
    let lines: Vec<&str> = source.lines().collect();
    if line as usize > lines.len() {
        return None;
    }
    let first = line.saturating_sub(CONTEXT_LINES).max(1);
    let width = line.to_string().len();
    let excerpt = (first..=line)
        .map(|n| format!("{n:>width$} | {}", lines[(n - 1) as usize]))
        .collect::<Vec<_>>()
        .join("\n");
    Some(excerpt)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excerpt_includes_context() {
        let source = "one\ntwo\nthree\nfour";
        assert_eq!(
            source_excerpt(source, 3).as_deref(),
            Some("1 | one\n2 | two\n3 | three")
        );
        assert_eq!(source_excerpt(source, 1).as_deref(), Some("1 | one"));
    }

    #[test]
    fn excerpt_out_of_range() {
        assert_eq!(source_excerpt("one", 0), None);
        assert_eq!(source_excerpt("one", 5), None);
    }

    #[test]
    fn excerpt_pads_line_numbers() {
        let source = (1..=10).map(|n| n.to_string()).collect::<Vec<_>>().join("\n");
        assert_eq!(
            source_excerpt(&source, 10).as_deref(),
            Some(" 8 | 8\n 9 | 9\n10 | 10")
        );
    }
}
