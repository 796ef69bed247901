//! Pathname to page resolution.
//!
//! A [`RouteResolver`] turns a request pathname into the HTML page that
//! should be built for it. Two strategies exist, selected by the project's
//! [`RouterKind`]:
//!
//! - **Filesystem**: pathnames map onto `.html` files under a directory,
//!   with `[name].html` files acting as dynamic segments.
//! - **Single-page app**: every pathname serves the same shell page.
//!
//! Resolving to `None` is a normal outcome (the page does not exist) and is
//! not an error.

pub mod entries;

pub use entries::{EntryKind, EntryPoint};

use crate::error::Result;
use crate::project::{ProjectRecord, RouterKind};
use crate::runtime::fs::parent_dir;
use crate::runtime::{DirectoryHandle, FsError};
use serde::Serialize;
use tracing::debug;

/// A page to build, resolved for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    /// Logical page key in the build output's HTML map
    pub page: String,
    /// Project-relative path of the HTML file
    pub html_path: String,
    pub entry_points: Vec<EntryPoint>,
    /// Project-relative directory the page lives in
    pub working_dir: String,
    /// URL path prefix build artifacts are emitted under
    pub out_dir: String,
}

impl Route {
    /// Build a route by reading and scanning an HTML file.
    pub async fn from_html(fs: &DirectoryHandle, html_path: &str, out_dir: &str) -> Result<Self> {
        let html = fs.read_text(html_path).await?;
        let working_dir = parent_dir(html_path).to_string();
        let entry_points = entries::scan(&html, &working_dir);
        Ok(Self {
            page: html_path.to_string(),
            html_path: html_path.to_string(),
            entry_points,
            working_dir,
            out_dir: out_dir.to_string(),
        })
    }

    /// Whether the page references anything to build.
    pub fn is_buildable(&self) -> bool {
        !self.entry_points.is_empty()
    }

    /// Project-relative paths of the entry points.
    pub fn entry_paths(&self) -> Vec<String> {
        self.entry_points.iter().map(|e| e.path.clone()).collect()
    }
}

/// Split a decoded pathname into clean segments.
///
/// Returns `None` for pathnames containing `..`.
fn pathname_segments(pathname: &str) -> Option<Vec<&str>> {
    let mut segments = Vec::new();
    for segment in pathname.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => return None,
            other => segments.push(other),
        }
    }
    Some(segments)
}

fn join(root: &str, rest: &str) -> String {
    if root.is_empty() {
        rest.to_string()
    } else {
        format!("{root}/{rest}")
    }
}

fn is_dynamic_page(name: &str) -> bool {
    name.len() > "[].html".len() && name.starts_with('[') && name.ends_with("].html")
}

/// Maps pathnames onto HTML files under a routing root.
#[derive(Debug, Clone)]
pub struct FilesystemRouter {
    fs: DirectoryHandle,
    root: String,
    out_dir: String,
}

impl FilesystemRouter {
    pub fn new(fs: DirectoryHandle, root: impl Into<String>, out_dir: impl Into<String>) -> Self {
        Self {
            fs,
            root: root.into(),
            out_dir: out_dir.into(),
        }
    }

    /// Candidate files for a pathname, in lookup order.
    ///
    /// For `/a/b` (with or without a trailing slash): `a/b.html`, then
    /// `a/b/index.html`. The site root maps to `index.html`.
    pub fn candidates(&self, segments: &[&str]) -> Vec<String> {
        let mut candidates: Vec<String> = Vec::new();
        let mut push = |path: String| {
            if !candidates.contains(&path) {
                candidates.push(path);
            }
        };

        if segments.is_empty() {
            push(join(&self.root, "index.html"));
            return candidates;
        }

        let path = segments.join("/");
        if path.to_ascii_lowercase().ends_with(".html") {
            push(join(&self.root, &path));
        }
        push(join(&self.root, &format!("{path}.html")));
        push(join(&self.root, &format!("{path}/index.html")));
        candidates
    }

    async fn dynamic_candidate(&self, segments: &[&str]) -> Result<Option<String>> {
        let Some((_, parents)) = segments.split_last() else {
            return Ok(None);
        };
        let dir = join(&self.root, &parents.join("/"));
        let dir = dir.trim_end_matches('/');

        let entries = match self.fs.list(dir).await {
            Ok(entries) => entries,
            Err(FsError::NotFound(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let mut dynamic: Vec<&str> = entries
            .iter()
            .filter(|entry| entry.is_file() && is_dynamic_page(&entry.name))
            .map(|entry| entry.name.as_str())
            .collect();
        dynamic.sort_unstable();

        Ok(dynamic.first().map(|name| join(dir, name)))
    }

    pub async fn resolve(&self, pathname: &str) -> Result<Option<Route>> {
        let Some(segments) = pathname_segments(pathname) else {
            debug!(pathname, "rejected pathname with parent segments");
            return Ok(None);
        };

        for candidate in self.candidates(&segments) {
            if self.fs.exists(&candidate).await {
                match Route::from_html(&self.fs, &candidate, &self.out_dir).await {
                    Ok(route) => return Ok(Some(route)),
                    // A directory named like a page; keep looking.
                    Err(crate::Error::Fs(FsError::NotFound(_))) => continue,
                    Err(err) => return Err(err),
                }
            }
        }

        match self.dynamic_candidate(&segments).await? {
            Some(page) => Route::from_html(&self.fs, &page, &self.out_dir)
                .await
                .map(Some),
            None => Ok(None),
        }
    }
}

/// Serves one shell page for every pathname.
#[derive(Debug, Clone)]
pub struct SinglePageRouter {
    fs: DirectoryHandle,
    shell: String,
    out_dir: String,
}

impl SinglePageRouter {
    pub fn new(fs: DirectoryHandle, shell: impl Into<String>, out_dir: impl Into<String>) -> Self {
        Self {
            fs,
            shell: shell.into(),
            out_dir: out_dir.into(),
        }
    }

    pub async fn resolve(&self, _pathname: &str) -> Result<Option<Route>> {
        if !self.fs.exists(&self.shell).await {
            return Ok(None);
        }
        Route::from_html(&self.fs, &self.shell, &self.out_dir)
            .await
            .map(Some)
    }
}

/// Route resolution strategy for a project.
#[derive(Debug, Clone)]
pub enum RouteResolver {
    Filesystem(FilesystemRouter),
    SinglePageApp(SinglePageRouter),
}

impl RouteResolver {
    /// Resolver for a configured project; `None` while its router is unknown.
    pub fn for_project(record: &ProjectRecord, out_dir: &str) -> Option<Self> {
        match &record.router {
            RouterKind::Unknown => None,
            RouterKind::Filesystem { root } => Some(RouteResolver::Filesystem(
                FilesystemRouter::new(record.root.clone(), root.clone(), out_dir),
            )),
            RouterKind::SinglePageApp { shell } => Some(RouteResolver::SinglePageApp(
                SinglePageRouter::new(record.root.clone(), shell.clone(), out_dir),
            )),
        }
    }

    /// Resolve a decoded request pathname.
    pub async fn resolve(&self, pathname: &str) -> Result<Option<Route>> {
        match self {
            RouteResolver::Filesystem(router) => router.resolve(pathname).await,
            RouteResolver::SinglePageApp(router) => router.resolve(pathname).await,
        }
    }
}
