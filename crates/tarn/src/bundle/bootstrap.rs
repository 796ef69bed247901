//! Post-processing of built HTML pages.
//!
//! Entry `<script src>` tags are replaced by an inline module that loads the
//! built output, and entry stylesheet links are pointed at the built CSS.

use super::ImportMap;
use crate::route::entries::{attribute, parse_attributes};
use crate::route::{EntryKind, EntryPoint};
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::sync::LazyLock;

static SCRIPT_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b([^>]*)>").expect("valid regex"));

static LINK_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<link\b([^>]*?)/?>").expect("valid regex"));

static HEAD_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<head\b[^>]*>").expect("valid regex"));

/// Built URLs for one entry point.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryOutput {
    /// Built JavaScript module
    pub script: Option<String>,
    /// Built or extracted stylesheet
    pub stylesheet: Option<String>,
}

/// Entry path → built URLs.
pub type EntryOutputs = BTreeMap<String, EntryOutput>;

fn escape_attribute(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
}

fn render_tag(name: &str, attributes: &[(String, String)]) -> String {
    let mut tag = format!("<{name}");
    for (key, value) in attributes {
        tag.push(' ');
        tag.push_str(key);
        if !value.is_empty() {
            tag.push_str("=\"");
            tag.push_str(&escape_attribute(value));
            tag.push('"');
        }
    }
    tag.push('>');
    tag
}

/// Inline module that loads a built entry.
///
/// Stubs `process.env` with a read-only proxy, imports the module, copies
/// its exports onto `globalThis`, and rethrows import errors on a later
/// microtask so they surface as uncaught errors in the console.
pub fn bootstrap_script(url: &str) -> String {
    let url = serde_json::to_string(url)
        .unwrap_or_else(|_| format!("\"{url}\""))
        .replace("</", "<\\/");
    format!(
        r#"
const env = new Proxy(Object.freeze({{ NODE_ENV: "development" }}), {{
  set() {{ return false; }},
  defineProperty() {{ return false; }},
  deleteProperty() {{ return false; }},
}});
globalThis.process ??= {{}};
globalThis.process.env = env;
try {{
  const exports = await import({url});
  for (const [name, value] of Object.entries(exports)) globalThis[name] = value;
}} catch (error) {{
  queueMicrotask(() => {{ throw error; }});
}}
"#
    )
}

fn find_entry<'a>(entries: &'a [EntryPoint], reference: &str, kind: EntryKind) -> Option<&'a EntryPoint> {
    entries
        .iter()
        .find(|entry| entry.kind == kind && entry.reference == reference)
}

/// Rewrite a page for serving.
///
/// Tags whose entry produced no output are left as they are. When
/// `import_map` is given and non-empty it is inserted at the top of `<head>`.
pub fn rewrite_page(
    html: &str,
    entries: &[EntryPoint],
    outputs: &EntryOutputs,
    import_map: Option<&ImportMap>,
) -> String {
    let html = SCRIPT_OPEN.replace_all(html, |caps: &Captures| {
        let original = caps[0].to_string();
        let attributes = parse_attributes(&caps[1]);
        let Some(src) = attribute(&attributes, "src") else {
            return original;
        };
        let Some(entry) = find_entry(entries, src, EntryKind::Script) else {
            return original;
        };
        let Some(output) = outputs.get(&entry.path) else {
            return original;
        };
        let Some(script) = output.script.as_deref() else {
            return original;
        };

        let mut kept: Vec<(String, String)> = attributes
            .into_iter()
            .filter(|(name, _)| name != "src" && name != "type")
            .collect();
        kept.insert(0, ("type".to_string(), "module".to_string()));

        let mut replacement = String::new();
        if let Some(css) = output.stylesheet.as_deref() {
            replacement.push_str(&render_tag(
                "link",
                &[
                    ("rel".to_string(), "stylesheet".to_string()),
                    ("href".to_string(), css.to_string()),
                ],
            ));
        }
        replacement.push_str(&render_tag("script", &kept));
        replacement.push_str(&bootstrap_script(script));
        replacement
    });

    let html = LINK_TAG.replace_all(&html, |caps: &Captures| {
        let original = caps[0].to_string();
        let mut attributes = parse_attributes(&caps[1]);
        let Some(href) = attribute(&attributes, "href") else {
            return original;
        };
        let Some(entry) = find_entry(entries, href, EntryKind::Stylesheet) else {
            return original;
        };
        let Some(css) = outputs.get(&entry.path).and_then(|o| o.stylesheet.clone()) else {
            return original;
        };
        for (name, value) in attributes.iter_mut() {
            if name == "href" {
                *value = css.clone();
            }
        }
        render_tag("link", &attributes)
    });

    let map_tag = import_map
        .filter(|map| !map.is_empty())
        .and_then(|map| map.to_html().ok());
    match map_tag {
        Some(tag) => match HEAD_OPEN.find(&html) {
            Some(head) => {
                let mut out = String::with_capacity(html.len() + tag.len());
                out.push_str(&html[..head.end()]);
                out.push_str(&tag);
                out.push_str(&html[head.end()..]);
                out
            }
            None => format!("{tag}{html}"),
        },
        None => html.into_owned(),
    }
}
