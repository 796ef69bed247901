use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Browser import map mapping bare specifiers to CDN URLs.
/// <https://developer.mozilla.org/en-US/docs/Web/HTML/Element/script/type/importmap>
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportMap {
    imports: BTreeMap<String, String>,
}

impl ImportMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a package to `url`, including its subpaths (`name/` → `url/`).
    pub fn register_package(&mut self, name: &str, url: &str) -> &mut Self {
        self.imports.insert(name.to_string(), url.to_string());
        self.imports
            .insert(format!("{name}/"), format!("{}/", url.trim_end_matches('/')));
        self
    }

    pub fn get(&self, specifier: &str) -> Option<&str> {
        self.imports.get(specifier).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.imports.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// `<script type="importmap">` tag, safe to embed in a page.
    pub fn to_html(&self) -> serde_json::Result<String> {
        self.to_json().map(|json| {
            format!(
                r#"<script type="importmap">{}</script>"#,
                json.replace("</", "<\\/")
            )
        })
    }
}
