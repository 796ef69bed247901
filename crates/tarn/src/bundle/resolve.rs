//! Import specifier resolution.
//!
//! Rules are applied in priority order:
//!
//! 1. Data URIs and absolute URLs pass through untouched.
//! 2. A declared dependency becomes a CDN URL. It stays external unless the
//!    file it points at is something browsers cannot import natively.
//! 3. Imports made from inside a remote module resolve against the CDN and
//!    get the minification flag.
//! 4. Everything else is a project file: the bare path, then the path with
//!    each of [`RESOLVE_EXTENSIONS`] appended.
//!
//! One resolver is created per build. Dependency rewrites are memoized so
//! every import of the same specifier in a build yields the same URL.

use crate::error::{Diagnostic, Error, Result};
use crate::http::FetchRequest;
use crate::route::entries::strip_suffixes;
use crate::runtime::fs::{join_path, parent_dir};
use crate::runtime::{DirectoryHandle, Network};
use super::ImportMap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

/// Extensions tried, in order, for extensionless project imports.
pub const RESOLVE_EXTENSIONS: [&str; 8] =
    [".js", ".ts", ".tsx", ".jsx", ".css", ".png", ".jpg", ".webp"];

/// Dependency files that must be bundled rather than imported by the browser.
const BUNDLED_DEPENDENCY_EXTENSIONS: &[&str] = &["css", "json", "ts", "tsx", "jsx"];

/// Where the importing module came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Namespace {
    /// A project file
    #[default]
    Local,
    /// A module fetched from the CDN
    Remote,
}

/// Outcome of resolving one specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Left for the browser to load from this URL
    External(String),
    /// Fetched from this URL and bundled
    Remote(String),
    /// Project-relative path of a file to bundle
    Local(String),
}

/// Whether a specifier is already a URL that must not be touched.
pub fn is_passthrough(specifier: &str) -> bool {
    specifier.starts_with("data:")
        || specifier.starts_with("http://")
        || specifier.starts_with("https://")
        || specifier.starts_with("//")
}

fn is_relative_or_absolute(specifier: &str) -> bool {
    specifier.starts_with("./") || specifier.starts_with("../") || specifier.starts_with('/')
}

/// Split a bare specifier into package name and remainder.
///
/// `@scope/pkg/sub/path.js` → (`@scope/pkg`, `/sub/path.js`),
/// `pkg` → (`pkg`, ``).
pub fn split_package(specifier: &str) -> Option<(&str, &str)> {
    if specifier.is_empty() || is_relative_or_absolute(specifier) || is_passthrough(specifier) {
        return None;
    }
    let name_end = if specifier.starts_with('@') {
        let scope_end = specifier.find('/')?;
        specifier[scope_end + 1..]
            .find('/')
            .map(|i| scope_end + 1 + i)
            .unwrap_or(specifier.len())
    } else {
        specifier.find('/').unwrap_or(specifier.len())
    };
    Some(specifier.split_at(name_end))
}

/// Append the CDN minification flag.
pub fn with_min_flag(url: &str) -> String {
    if url.contains('?') {
        format!("{url}&min")
    } else {
        format!("{url}?min")
    }
}

fn extension(path: &str) -> Option<String> {
    let last = strip_suffixes(path).rsplit('/').next()?;
    last.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase())
}

/// Resolves and loads imports for one build.
#[derive(Debug)]
pub struct ImportResolver {
    fs: DirectoryHandle,
    network: Arc<dyn Network>,
    cdn_host: String,
    working_dir: String,
    dependencies: BTreeMap<String, String>,
    rewrites: Mutex<HashMap<String, String>>,
    warnings: Mutex<Vec<Diagnostic>>,
}

impl ImportResolver {
    pub fn new(
        fs: DirectoryHandle,
        network: Arc<dyn Network>,
        cdn_host: impl Into<String>,
        working_dir: impl Into<String>,
        dependencies: BTreeMap<String, String>,
    ) -> Self {
        Self {
            fs,
            network,
            cdn_host: cdn_host.into(),
            working_dir: working_dir.into(),
            dependencies,
            rewrites: Mutex::new(HashMap::new()),
            warnings: Mutex::new(Vec::new()),
        }
    }

    /// Declared dependencies, name → version.
    pub fn dependencies(&self) -> &BTreeMap<String, String> {
        &self.dependencies
    }

    /// CDN URL of a package root.
    ///
    /// `*`, `latest` and empty versions resolve to the unversioned package.
    pub fn package_url(&self, name: &str, version: &str) -> String {
        let version = version.trim();
        if version.is_empty() || version == "*" || version == "latest" {
            format!("https://{}/{}", self.cdn_host, name)
        } else {
            format!("https://{}/{}@{}", self.cdn_host, name, version)
        }
    }

    /// CDN URL for a declared dependency specifier, memoized per resolver.
    pub fn dependency_url(&self, specifier: &str) -> Option<String> {
        if let Some(url) = self.rewrites.lock().get(specifier) {
            return Some(url.clone());
        }
        let (name, remainder) = split_package(specifier)?;
        let version = self.dependencies.get(name)?;
        let url = format!("{}{}", self.package_url(name, version), remainder);
        debug!(specifier, url = %url, "rewrote dependency import");
        self.rewrites
            .lock()
            .entry(specifier.to_string())
            .or_insert(url)
            .clone()
            .into()
    }

    /// URL for a specifier imported from inside a remote module.
    pub fn remote_url(&self, specifier: &str, importer: &str) -> Result<String> {
        let url = if specifier.starts_with('/') {
            format!("https://{}{}", self.cdn_host, specifier)
        } else if specifier.starts_with("./") || specifier.starts_with("../") {
            Url::parse(importer)
                .and_then(|base| base.join(specifier))
                .map(|url| url.to_string())
                .map_err(|_| unresolved(specifier, importer))?
        } else {
            format!("https://{}/{}", self.cdn_host, specifier)
        };
        Ok(with_min_flag(&url))
    }

    /// Resolve `specifier` imported by `importer`.
    ///
    /// `importer` is a project-relative path for local modules, a URL for
    /// remote ones, and empty for entry points.
    pub async fn resolve(
        &self,
        specifier: &str,
        importer: &str,
        namespace: Namespace,
    ) -> Result<Resolution> {
        if is_passthrough(specifier) {
            return Ok(Resolution::External(specifier.to_string()));
        }

        if let Some(url) = self.dependency_url(specifier) {
            // Only the subpath has a file extension; versions contain dots.
            let bundled = split_package(specifier)
                .and_then(|(_, subpath)| extension(subpath))
                .is_some_and(|ext| BUNDLED_DEPENDENCY_EXTENSIONS.contains(&ext.as_str()));
            return Ok(if bundled {
                Resolution::Remote(url)
            } else {
                Resolution::External(url)
            });
        }

        if namespace == Namespace::Remote {
            return self.remote_url(specifier, importer).map(Resolution::Remote);
        }

        self.resolve_local(specifier, importer)
            .await
            .map(Resolution::Local)
    }

    async fn resolve_local(&self, specifier: &str, importer: &str) -> Result<String> {
        let base = if importer.is_empty() {
            self.working_dir.as_str()
        } else {
            parent_dir(importer)
        };
        let bare = strip_suffixes(specifier);
        let path = join_path(base, bare).ok_or_else(|| unresolved(specifier, importer))?;

        if self.fs.is_file(&path).await {
            return Ok(path);
        }
        for ext in RESOLVE_EXTENSIONS {
            let candidate = format!("{path}{ext}");
            if self.fs.is_file(&candidate).await {
                return Ok(candidate);
            }
        }
        Err(unresolved(specifier, importer))
    }

    /// Fetch a remote module's source, best-effort.
    ///
    /// On failure a warning is recorded and `None` is returned; the bundler
    /// then keeps the import external.
    pub async fn load_remote(&self, url: &str) -> Option<String> {
        let failure = match Url::parse(url) {
            Ok(parsed) => match self.network.fetch(&FetchRequest::get(parsed)).await {
                Ok(response) if response.is_success() => return Some(response.text_body()),
                Ok(response) => format!("HTTP {}", response.status),
                Err(err) => err.to_string(),
            },
            Err(err) => err.to_string(),
        };
        warn!(url, reason = %failure, "remote module fetch failed, keeping import external");
        self.warnings.lock().push(Diagnostic::new(format!(
            "Could not fetch {url} ({failure}); it will be loaded by the browser"
        )));
        None
    }

    /// Drain warnings recorded so far.
    pub fn take_warnings(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut *self.warnings.lock())
    }

    /// Import map covering every declared dependency.
    pub fn import_map(&self) -> ImportMap {
        let mut map = ImportMap::new();
        for (name, version) in &self.dependencies {
            map.register_package(name, &self.package_url(name, version));
        }
        map
    }
}

fn unresolved(specifier: &str, importer: &str) -> Error {
    let mut diagnostic = Diagnostic::new(format!("404: Could not resolve \"{specifier}\""));
    if !importer.is_empty() {
        diagnostic.file = Some(importer.to_string());
    }
    Error::BuildFailed(vec![diagnostic])
}
