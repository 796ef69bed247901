//! Entry point discovery in HTML pages.
//!
//! A page's entry points are the local scripts and stylesheets it references
//! through `<script src>` and `<link href>`. Remote URLs and data URIs are
//! left for the browser.

use crate::runtime::fs::join_path;
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

static SCRIPT_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b([^>]*)>").expect("valid regex"));

static LINK_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<link\b([^>]*)>").expect("valid regex"));

static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)([a-z_:][-a-z0-9_:.]*)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+)))?"#)
        .expect("valid regex")
});

/// Extensions the bundler accepts as entry points.
pub const ENTRY_EXTENSIONS: &[&str] = &["js", "mjs", "jsx", "ts", "mts", "tsx", "css"];

/// Which tag an entry point came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EntryKind {
    Script,
    Stylesheet,
}

/// A local file referenced by a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryPoint {
    /// The attribute value exactly as written in the page
    pub reference: String,
    /// Project-relative path of the referenced file
    pub path: String,
    pub kind: EntryKind,
}

/// Parse the attributes of a tag body (the text between the tag name and `>`).
///
/// Names are lower-cased; valueless attributes get an empty value.
pub fn parse_attributes(tag_body: &str) -> Vec<(String, String)> {
    ATTRIBUTE
        .captures_iter(tag_body)
        .filter_map(|caps| {
            let name = caps.get(1)?.as_str().to_ascii_lowercase();
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            Some((name, value))
        })
        .filter(|(name, _)| name != "/")
        .collect()
}

pub(crate) fn attribute<'a>(attributes: &'a [(String, String)], name: &str) -> Option<&'a str> {
    attributes
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

/// Whether a reference points into the project rather than at a URL.
pub fn is_local_reference(reference: &str) -> bool {
    let reference = reference.trim();
    if reference.is_empty() || reference.starts_with("//") || reference.starts_with('#') {
        return false;
    }
    match reference.split_once(':') {
        Some((scheme, _)) => !scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')),
        None => true,
    }
}

/// Reference with any query string or fragment removed.
pub fn strip_suffixes(reference: &str) -> &str {
    reference.split(['?', '#']).next().unwrap_or(reference)
}

fn has_entry_extension(path: &str) -> bool {
    path.rsplit_once('.')
        .map(|(_, ext)| ENTRY_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn resolve_reference(reference: &str, base_dir: &str, kind: EntryKind) -> Option<EntryPoint> {
    if !is_local_reference(reference) {
        return None;
    }
    let bare = strip_suffixes(reference.trim());
    if !has_entry_extension(bare) {
        return None;
    }
    let path = join_path(base_dir, bare)?;
    Some(EntryPoint {
        reference: reference.to_string(),
        path,
        kind,
    })
}

/// Find entry points in a page located in `base_dir`.
///
/// Relative references resolve against `base_dir`; references starting with
/// `/` resolve against the project root. Each file is listed once, scripts
/// first in document order, then stylesheets.
pub fn scan(html: &str, base_dir: &str) -> Vec<EntryPoint> {
    let mut entries: Vec<EntryPoint> = Vec::new();
    let mut push = |entry: Option<EntryPoint>| {
        if let Some(entry) = entry {
            if !entries.iter().any(|e| e.path == entry.path) {
                entries.push(entry);
            }
        }
    };

    for caps in SCRIPT_TAG.captures_iter(html) {
        let attributes = parse_attributes(&caps[1]);
        if let Some(src) = attribute(&attributes, "src") {
            push(resolve_reference(src, base_dir, EntryKind::Script));
        }
    }

    for caps in LINK_TAG.captures_iter(html) {
        let attributes = parse_attributes(&caps[1]);
        let is_stylesheet = attribute(&attributes, "rel")
            .map(|rel| rel.to_ascii_lowercase().split_whitespace().any(|r| r == "stylesheet"))
            .unwrap_or(false);
        if !is_stylesheet {
            continue;
        }
        if let Some(href) = attribute(&attributes, "href") {
            push(resolve_reference(href, base_dir, EntryKind::Stylesheet));
        }
    }

    entries
}
