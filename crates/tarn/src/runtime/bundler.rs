//! Bundler collaborator contract.
//!
//! The compiler itself is out of scope: the engine hands a [`BundleInput`] to
//! a [`Bundler`] and gets back emitted files plus a metafile, or a list of
//! diagnostics. Bundlers that can call back into the worker use
//! [`BundleInput::resolver`] and [`BundleInput::fs`] to resolve and load every
//! import; bundlers that cannot (an external process) get the declared
//! dependencies as [`BundleInput::externals`] instead.

use crate::bundle::ImportResolver;
use crate::error::Diagnostic;
use crate::project::ProjectId;
use crate::runtime::DirectoryHandle;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Everything a bundler needs for one build.
#[derive(Debug, Clone)]
pub struct BundleInput {
    pub project: ProjectId,
    /// Project-relative source paths
    pub entry_points: Vec<String>,
    /// Project-relative directory imports are resolved from
    pub working_dir: String,
    /// Specifiers the bundler must leave untouched
    pub externals: Vec<String>,
    /// Merged build-tool options (manifest `build` key, then tool config file)
    pub options: serde_json::Map<String, serde_json::Value>,
    pub resolver: Arc<ImportResolver>,
    pub fs: DirectoryHandle,
}

/// One emitted file. `path` is relative to the output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    pub path: String,
    pub contents: Bytes,
}

impl OutputFile {
    pub fn new(path: impl Into<String>, contents: impl Into<Bytes>) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
        }
    }
}

/// Metadata about one emitted file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetaOutput {
    /// Project-relative source entry this output was built from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<String>,
    /// Output path of the stylesheet extracted from this entry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub css_bundle: Option<String>,
    pub bytes: u64,
}

/// Build metadata, keyed by output path relative to the output directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metafile {
    pub outputs: BTreeMap<String, MetaOutput>,
}

impl Metafile {
    /// Output path built from a given source entry.
    pub fn output_for_entry(&self, entry: &str) -> Option<(&str, &MetaOutput)> {
        self.outputs
            .iter()
            .find(|(_, meta)| meta.entry_point.as_deref() == Some(entry))
            .map(|(path, meta)| (path.as_str(), meta))
    }
}

/// A successful build.
#[derive(Debug, Clone, Default)]
pub struct BundlerOutput {
    pub output_files: Vec<OutputFile>,
    pub metafile: Metafile,
    pub warnings: Vec<Diagnostic>,
}

/// A failed build.
#[derive(Debug, Clone, Error)]
#[error("bundler reported {} error(s)", .errors.len())]
pub struct BundlerFailure {
    pub errors: Vec<Diagnostic>,
}

impl BundlerFailure {
    pub fn new(errors: Vec<Diagnostic>) -> Self {
        Self { errors }
    }

    pub fn single(message: impl Into<String>) -> Self {
        Self::new(vec![Diagnostic::new(message)])
    }
}

/// The compiler seam.
#[async_trait]
pub trait Bundler: Send + Sync + fmt::Debug {
    async fn build(&self, input: BundleInput) -> Result<BundlerOutput, BundlerFailure>;

    /// Whether the bundler resolves imports through [`BundleInput::resolver`].
    ///
    /// When `false` the engine externalizes declared dependencies and injects
    /// an import map into the page instead.
    fn resolves_imports(&self) -> bool {
        true
    }
}
