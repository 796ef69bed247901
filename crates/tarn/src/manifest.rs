//! `package.json` handling.
//!
//! The manifest is parsed fresh every time the worker checks whether a
//! project can be built, and written back after configuration saves. Keys the
//! worker does not understand are kept verbatim so saving never loses data.

use crate::error::{Error, Result};
use crate::project::RouterKind;
use crate::runtime::{DirectoryHandle, FsError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Project manifest file name.
pub const MANIFEST_FILE: &str = "package.json";

/// The `run` section: how the worker serves the project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunConfig {
    /// Either an HTML file (single-page app) or a directory (filesystem routing)
    pub router: String,

    /// Dependency versions that override every other dependency table
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,
}

impl RunConfig {
    /// Canonical form of a router path.
    ///
    /// Trims whitespace, converts `\` to `/`, and strips leading `./` and `/`.
    pub fn normalize_router(router: &str) -> String {
        let mut router = router.trim().replace('\\', "/");
        loop {
            if let Some(rest) = router.strip_prefix("./") {
                router = rest.to_string();
            } else if let Some(rest) = router.strip_prefix('/') {
                router = rest.to_string();
            } else {
                break;
            }
        }
        router
    }

    /// Normalize `router` in place.
    pub fn normalize(&mut self) {
        self.router = Self::normalize_router(&self.router);
    }

    /// Whether no router has been chosen yet.
    pub fn is_router_unset(&self) -> bool {
        Self::normalize_router(&self.router)
            .to_lowercase()
            .is_empty()
    }

    /// Router classification derived from `router`.
    pub fn router_kind(&self) -> RouterKind {
        RouterKind::classify(&self.router)
    }
}

/// Parsed `package.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dev_dependencies: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub peer_dependencies: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub optional_dependencies: BTreeMap<String, String>,

    #[serde(default)]
    pub run: RunConfig,

    /// Free-form build tool options
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub build: Map<String, Value>,

    /// Every other key, preserved on save
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PackageManifest {
    /// Parse manifest text. The router is normalized on the way in.
    pub fn parse(text: &str) -> Result<Self> {
        let mut manifest: PackageManifest =
            serde_json::from_str(text).map_err(|e| Error::ParsingPackageJson {
                file: MANIFEST_FILE.to_string(),
                message: e.to_string(),
            })?;
        manifest.run.normalize();
        Ok(manifest)
    }

    /// Serialize as pretty JSON with a trailing newline.
    pub fn to_json_pretty(&self) -> Result<String> {
        let mut text = serde_json::to_string_pretty(self)?;
        text.push('\n');
        Ok(text)
    }

    /// Read the manifest from a project root. `Ok(None)` when there is none.
    pub async fn load(root: &DirectoryHandle) -> Result<Option<Self>> {
        match root.read_text(MANIFEST_FILE).await {
            Ok(text) => Self::parse(&text).map(Some),
            Err(FsError::NotFound(_)) => Ok(None),
            Err(FsError::NotUtf8(_)) => Err(Error::ParsingPackageJson {
                file: MANIFEST_FILE.to_string(),
                message: "file is not valid UTF-8".to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    /// Write the manifest back to a project root.
    pub async fn save(&self, root: &DirectoryHandle) -> Result<()> {
        let text = self.to_json_pretty()?;
        root.write_text(MANIFEST_FILE, &text).await?;
        Ok(())
    }

    /// Dependency table used for CDN rewrites.
    ///
    /// Later tables win: dev, optional, peer, regular, then `run.dependencies`.
    pub fn cdn_dependencies(&self) -> BTreeMap<String, String> {
        let mut merged = BTreeMap::new();
        for table in [
            &self.dev_dependencies,
            &self.optional_dependencies,
            &self.peer_dependencies,
            &self.dependencies,
            &self.run.dependencies,
        ] {
            for (name, version) in table {
                merged.insert(name.clone(), version.clone());
            }
        }
        merged
    }
}
