//! Import walk run before esbuild.
//!
//! esbuild resolves project files on its own, so the walk only collects what
//! it must be told about: dependency files that are fetched from the CDN and
//! bundled from a local copy, and the dependency imports that stay external.
//! Every local module reachable from the entry points is checked against the
//! worker's resolution rules, so an unresolvable import fails the build with
//! the same 404 diagnostic an in-process bundler would produce.

use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tarn::bundle::resolve::{is_passthrough, split_package};
use tarn::bundle::{ImportResolver, Namespace, Resolution};
use tarn::runtime::{BundleInput, BundlerFailure};
use tarn::Error;
use tracing::debug;

static BLOCK_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/").expect("valid regex"));

static LINE_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*//.*$").expect("valid regex"));

static SCRIPT_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:\bfrom|\bimport)\s*\(?\s*["']([^"'\n]+)["']"#).expect("valid regex")
});

static STYLE_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"@import\s+(?:url\(\s*)?["']?([^"')\s;]+)"#).expect("valid regex")
});

/// What the walk found.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ImportPlan {
    /// Specifier → local copy of the CDN file bundled in its place
    pub aliases: BTreeMap<String, PathBuf>,
    /// Dependency specifiers the browser loads through the import map
    pub externals: BTreeSet<String>,
}

impl ImportPlan {
    /// Whether some specifier of package `name` is bundled from a local copy.
    pub fn bundles_from(&self, name: &str) -> bool {
        self.aliases
            .keys()
            .any(|specifier| matches!(split_package(specifier), Some((package, _)) if package == name))
    }

    /// External specifiers that belong to package `name`.
    pub fn externals_of<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a String> + 'a {
        self.externals
            .iter()
            .filter(move |specifier| matches!(split_package(specifier), Some((package, _)) if package == name))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceKind {
    Script,
    Style,
}

impl SourceKind {
    fn of(path: &str) -> Option<Self> {
        let file = path.split(['?', '#']).next()?.rsplit('/').next()?;
        let (_, ext) = file.rsplit_once('.')?;
        match ext.to_ascii_lowercase().as_str() {
            "js" | "mjs" | "cjs" | "jsx" | "ts" | "mts" | "cts" | "tsx" => Some(Self::Script),
            "css" => Some(Self::Style),
            _ => None,
        }
    }

    fn pattern(self) -> &'static Regex {
        match self {
            Self::Script => &SCRIPT_IMPORT,
            Self::Style => &STYLE_IMPORT,
        }
    }

    /// Import specifiers in `source`, in order, without duplicates.
    fn specifiers(self, source: &str) -> Vec<String> {
        let without_blocks = BLOCK_COMMENT.replace_all(source, "");
        let code = LINE_COMMENT.replace_all(&without_blocks, "");
        let mut seen = HashSet::new();
        self.pattern()
            .captures_iter(&code)
            .map(|caps| caps[1].to_string())
            .filter(|specifier| seen.insert(specifier.clone()))
            .collect()
    }
}

/// Walk the modules reachable from the entry points.
///
/// Bundled CDN files are written into `vendor_dir`. A CDN file that cannot
/// be fetched stays external; the resolver records a warning for it.
pub async fn plan(input: &BundleInput, vendor_dir: &Path) -> Result<ImportPlan, BundlerFailure> {
    let resolver = &input.resolver;
    let mut plan = ImportPlan::default();
    let mut seen: HashSet<String> = input.entry_points.iter().cloned().collect();
    let mut queue: VecDeque<String> = input.entry_points.iter().cloned().collect();

    while let Some(module) = queue.pop_front() {
        let Some(kind) = SourceKind::of(&module) else {
            continue;
        };
        // esbuild reports unreadable modules itself.
        let Ok(source) = input.fs.read_text(&module).await else {
            continue;
        };

        for specifier in kind.specifiers(&source) {
            if plan.aliases.contains_key(&specifier) || plan.externals.contains(&specifier) {
                continue;
            }
            match resolver.resolve(&specifier, &module, Namespace::Local).await {
                Ok(Resolution::Local(path)) => {
                    if seen.insert(path.clone()) {
                        queue.push_back(path);
                    }
                }
                Ok(Resolution::External(_)) => {
                    if !is_passthrough(&specifier) {
                        plan.externals.insert(specifier);
                    }
                }
                Ok(Resolution::Remote(url)) => match resolver.load_remote(&url).await {
                    Some(remote) => {
                        let copy = vendor_dir.join(vendor_name(plan.aliases.len(), &url));
                        let remote = rewrite_remote(resolver, &remote, &url).await;
                        tokio::fs::write(&copy, remote).await.map_err(|e| {
                            BundlerFailure::single(format!("cannot store {url}: {e}"))
                        })?;
                        debug!(%specifier, %url, "bundling CDN file from a local copy");
                        plan.aliases.insert(specifier, copy);
                    }
                    None => {
                        plan.externals.insert(specifier);
                    }
                },
                Err(err) => return Err(failure(err)),
            }
        }
    }
    Ok(plan)
}

/// Point the imports inside a fetched CDN file at the CDN.
async fn rewrite_remote(resolver: &ImportResolver, source: &str, url: &str) -> String {
    let kind = SourceKind::of(url).unwrap_or(SourceKind::Script);
    let mut targets: HashMap<String, String> = HashMap::new();
    for specifier in kind.specifiers(source) {
        if is_passthrough(&specifier) {
            continue;
        }
        match resolver.resolve(&specifier, url, Namespace::Remote).await {
            Ok(Resolution::Remote(target)) | Ok(Resolution::External(target)) => {
                targets.insert(specifier, target);
            }
            Ok(Resolution::Local(_)) | Err(_) => {}
        }
    }
    if targets.is_empty() {
        return source.to_string();
    }
    kind.pattern()
        .replace_all(source, |caps: &regex::Captures<'_>| {
            let whole = &caps[0];
            match targets.get(&caps[1]) {
                Some(target) => whole.replacen(&caps[1], target, 1),
                None => whole.to_string(),
            }
        })
        .into_owned()
}

/// File name for the `index`-th CDN copy, keeping the URL's file name.
fn vendor_name(index: usize, url: &str) -> String {
    let file = url
        .split(['?', '#'])
        .next()
        .and_then(|path| path.rsplit('/').next())
        .filter(|name| !name.is_empty())
        .unwrap_or("module.js");
    let safe: String = file
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect();
    format!("{index}-{safe}")
}

fn failure(err: Error) -> BundlerFailure {
    if err.diagnostics().is_empty() {
        BundlerFailure::single(err.to_string())
    } else {
        BundlerFailure::new(err.diagnostics().to_vec())
    }
}
