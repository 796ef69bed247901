//! Bundling with the `esbuild` binary.
//!
//! esbuild runs as a child process in the project folder and cannot call back
//! into the worker's resolver. An import walk applies the worker's rules
//! first: missing project files fail the build, dependency files that must
//! be bundled are fetched and aliased, and the remaining dependency imports
//! are passed as externals for the page's import map.

mod imports;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tarn::Diagnostic;
use tarn::bundle::resolve::RESOLVE_EXTENSIONS;
use tarn::runtime::{BundleInput, Bundler, BundlerFailure, BundlerOutput, MetaOutput, OutputFile};
use tokio::process::Command;
use tracing::debug;

pub use imports::ImportPlan;

/// Build options from `package.json` `build` or the tool config file that
/// translate to esbuild flags.
const SUPPORTED_OPTIONS: &[&str] = &[
    "alias",
    "charset",
    "conditions",
    "define",
    "drop",
    "jsx",
    "jsxFactory",
    "jsxFragment",
    "jsxImportSource",
    "keepNames",
    "legalComments",
    "loader",
    "mainFields",
    "minify",
    "platform",
    "pure",
    "sourcemap",
    "target",
];

/// Project file extensions emitted as separate files.
const FILE_LOADER_EXTENSIONS: &[&str] = &[".png", ".jpg", ".webp"];

/// Options whose array values are repeated flags rather than a list.
const REPEATED_OPTIONS: &[&str] = &["drop", "pure"];

static MESSAGE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:\S+\s+)?\[(ERROR|WARNING)\]\s+(.+?)\s*$").expect("valid regex")
});

static LOCATION_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s+(\S[^:]*):(\d+):(\d+):\s*$").expect("valid regex"));

/// [`Bundler`] running esbuild in a project folder.
#[derive(Debug, Clone)]
pub struct EsbuildBundler {
    binary: String,
    root: PathBuf,
}

impl EsbuildBundler {
    pub fn new(binary: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            root: root.into(),
        }
    }

    fn args(
        &self,
        input: &BundleInput,
        plan: &ImportPlan,
        out_dir: &Path,
        metafile: &Path,
    ) -> Vec<String> {
        let mut args: Vec<String> = input.entry_points.clone();
        args.extend([
            "--bundle".to_string(),
            "--format=esm".to_string(),
            "--splitting".to_string(),
            "--color=false".to_string(),
            "--log-level=warning".to_string(),
            format!("--outdir={}", out_dir.display()),
            format!("--metafile={}", metafile.display()),
            format!("--resolve-extensions={}", RESOLVE_EXTENSIONS.join(",")),
        ]);
        let user_loaders = input.options.get("loader").and_then(Value::as_object);
        for ext in FILE_LOADER_EXTENSIONS {
            if !user_loaders.is_some_and(|loaders| loaders.contains_key(*ext)) {
                args.push(format!("--loader:{ext}=file"));
            }
        }
        args.push("--external:https://*".to_string());
        args.push("--external:http://*".to_string());
        for external in &input.externals {
            args.push(format!("--external:{external}"));
            if plan.bundles_from(external) {
                // A wildcard would shadow the aliased files.
                args.extend(
                    plan.externals_of(external)
                        .filter(|specifier| *specifier != external)
                        .map(|specifier| format!("--external:{specifier}")),
                );
            } else {
                args.push(format!("--external:{external}/*"));
            }
        }
        for (specifier, copy) in &plan.aliases {
            args.push(format!("--alias:{specifier}={}", copy.display()));
        }
        args.extend(option_flags(&input.options));
        args
    }

    async fn run(&self, input: &BundleInput) -> Result<BundlerOutput, BundlerFailure> {
        let root = tokio::fs::canonicalize(&self.root)
            .await
            .map_err(|e| failure(format!("cannot open project folder {}: {e}", self.root.display())))?;
        let scratch = tempfile::tempdir().map_err(|e| failure(format!("cannot create output folder: {e}")))?;
        let scratch_path = tokio::fs::canonicalize(scratch.path())
            .await
            .map_err(|e| failure(format!("cannot open output folder: {e}")))?;
        let out_dir = scratch_path.join("out");
        let metafile_path = scratch_path.join("meta.json");
        let vendor_dir = scratch_path.join("vendor");
        tokio::fs::create_dir_all(&vendor_dir)
            .await
            .map_err(|e| failure(format!("cannot create output folder: {e}")))?;
        let plan = imports::plan(input, &vendor_dir).await?;

        let args = self.args(input, &plan, &out_dir, &metafile_path);
        debug!(binary = %self.binary, ?args, "running esbuild");
        let output = Command::new(&self.binary)
            .args(&args)
            .current_dir(&root)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => failure(format!(
                    "esbuild was not found at '{}'. Install it (npm install -g esbuild) or pass --esbuild <PATH>",
                    self.binary
                )),
                _ => failure(format!("failed to run esbuild: {e}")),
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        let (errors, warnings) = parse_messages(&stderr);
        if !output.status.success() {
            return Err(if errors.is_empty() {
                BundlerFailure::single(format!("esbuild exited with {}: {}", output.status, stderr.trim()))
            } else {
                BundlerFailure::new(errors)
            });
        }

        let meta_text = tokio::fs::read_to_string(&metafile_path)
            .await
            .map_err(|e| failure(format!("esbuild wrote no metafile: {e}")))?;
        let meta: EsbuildMetafile = serde_json::from_str(&meta_text)
            .map_err(|e| failure(format!("unreadable esbuild metafile: {e}")))?;

        let mut bundled = BundlerOutput {
            warnings,
            ..BundlerOutput::default()
        };
        for (key, entry) in meta.outputs {
            let absolute = path_clean::clean(root.join(&key));
            let relative = output_path(&absolute, &out_dir);
            let contents = tokio::fs::read(&absolute)
                .await
                .map_err(|e| failure(format!("cannot read esbuild output {key}: {e}")))?;
            bundled.metafile.outputs.insert(
                relative.clone(),
                MetaOutput {
                    entry_point: entry.entry_point,
                    css_bundle: entry
                        .css_bundle
                        .map(|css| output_path(&path_clean::clean(root.join(css)), &out_dir)),
                    bytes: entry.bytes,
                },
            );
            bundled.output_files.push(OutputFile::new(relative, contents));
        }
        Ok(bundled)
    }
}

#[async_trait]
impl Bundler for EsbuildBundler {
    async fn build(&self, input: BundleInput) -> Result<BundlerOutput, BundlerFailure> {
        self.run(&input).await
    }

    fn resolves_imports(&self) -> bool {
        false
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EsbuildMetafile {
    outputs: BTreeMap<String, EsbuildOutput>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct EsbuildOutput {
    entry_point: Option<String>,
    css_bundle: Option<String>,
    bytes: u64,
}

fn failure(message: String) -> BundlerFailure {
    BundlerFailure::single(message)
}

/// Path of an emitted file relative to the output folder, `/`-separated.
fn output_path(absolute: &Path, out_dir: &Path) -> String {
    let relative = absolute.strip_prefix(out_dir).unwrap_or(absolute);
    let joined = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    if relative == absolute {
        // Outside the output folder; keep the file name.
        absolute
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or(joined)
    } else {
        joined
    }
}

/// `jsxFactory` -> `jsx-factory`.
fn kebab_case(key: &str) -> String {
    let mut flag = String::with_capacity(key.len() + 4);
    for ch in key.chars() {
        if ch.is_ascii_uppercase() {
            flag.push('-');
            flag.push(ch.to_ascii_lowercase());
        } else {
            flag.push(ch);
        }
    }
    flag
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// esbuild flags for the supported build options. Others are ignored.
pub fn option_flags(options: &Map<String, Value>) -> Vec<String> {
    let mut flags = Vec::new();
    for (key, value) in options {
        if !SUPPORTED_OPTIONS.contains(&key.as_str()) {
            debug!(option = %key, "ignoring build option esbuild does not take");
            continue;
        }
        let flag = kebab_case(key);
        match value {
            Value::Bool(true) => flags.push(format!("--{flag}")),
            Value::Bool(false) | Value::Null => {}
            Value::String(_) | Value::Number(_) => {
                if let Some(v) = scalar(value) {
                    flags.push(format!("--{flag}={v}"));
                }
            }
            Value::Array(items) => {
                let items: Vec<String> = items.iter().filter_map(scalar).collect();
                if REPEATED_OPTIONS.contains(&key.as_str()) {
                    flags.extend(items.iter().map(|item| format!("--{flag}:{item}")));
                } else if !items.is_empty() {
                    flags.push(format!("--{flag}={}", items.join(",")));
                }
            }
            Value::Object(entries) => {
                for (name, v) in entries {
                    if let Some(v) = scalar(v) {
                        flags.push(format!("--{flag}:{name}={v}"));
                    }
                }
            }
        }
    }
    flags
}

/// Split esbuild's log output into errors and warnings.
pub fn parse_messages(log: &str) -> (Vec<Diagnostic>, Vec<Diagnostic>) {
    let mut errors: Vec<Diagnostic> = Vec::new();
    let mut warnings: Vec<Diagnostic> = Vec::new();
    // Whether the last message went to `errors`.
    let mut current: Option<bool> = None;

    for line in log.lines() {
        if let Some(caps) = MESSAGE_LINE.captures(line) {
            let diagnostic = Diagnostic::new(&caps[2]);
            let is_error = &caps[1] == "ERROR";
            if is_error {
                errors.push(diagnostic);
            } else {
                warnings.push(diagnostic);
            }
            current = Some(is_error);
            continue;
        }
        let Some(caps) = LOCATION_LINE.captures(line) else {
            continue;
        };
        let target = match current {
            Some(true) => errors.last_mut(),
            Some(false) => warnings.last_mut(),
            None => None,
        };
        if let Some(diagnostic) = target.filter(|d| d.file.is_none()) {
            diagnostic.file = Some(caps[1].to_string());
            diagnostic.line = caps[2].parse().ok();
            diagnostic.column = caps[3].parse().ok();
        }
    }
    (errors, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::{HostNetwork, NativeFs};
    use serde_json::json;
    use std::sync::Arc;
    use tarn::ImportResolver;
    use tarn::ProjectId;
    use tarn::runtime::DirectoryHandle;
    use tempfile::TempDir;
    use url::Url;

    const LOG: &str = r#"✘ [ERROR] Could not resolve "./missing"

    src/main.ts:2:7:
      2 │ import "./missing"
        ╵        ~~~~~~~~~~~

▲ [WARNING] Duplicate key "a" in object literal [duplicate-object-key]

    src/util.ts:4:2:
      4 │   a: 2,
        ╵   ^

  The original key "a" is here:

    src/util.ts:3:2:
      3 │   a: 1,
        ╵   ^

✘ [ERROR] Transforming const to the configured target environment is not supported yet

1 warning and 2 errors
"#;

    #[test]
    fn parses_errors_and_warnings_with_locations() {
        let (errors, warnings) = parse_messages(LOG);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].message, r#"Could not resolve "./missing""#);
        assert_eq!(errors[0].location().as_deref(), Some("src/main.ts:2:7"));
        assert!(errors[1].file.is_none());

        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.starts_with(r#"Duplicate key "a""#));
        assert_eq!(warnings[0].location().as_deref(), Some("src/util.ts:4:2"));
    }

    #[test]
    fn windows_marker_is_accepted() {
        let (errors, _) = parse_messages("X [ERROR] Unexpected end of file\n");
        assert_eq!(errors[0].message, "Unexpected end of file");
    }

    #[test]
    fn maps_build_options_to_flags() {
        let options = json!({
            "minify": true,
            "keepNames": false,
            "target": ["es2020", "chrome100"],
            "jsxFactory": "h",
            "define": {"process.env.NODE_ENV": "\"development\""},
            "drop": ["console", "debugger"],
            "compilerOptions": {"strict": true}
        });
        let flags = option_flags(options.as_object().unwrap());
        assert!(flags.contains(&"--minify".to_string()));
        assert!(flags.contains(&"--target=es2020,chrome100".to_string()));
        assert!(flags.contains(&"--jsx-factory=h".to_string()));
        assert!(flags.contains(&r#"--define:process.env.NODE_ENV="development""#.to_string()));
        assert!(flags.contains(&"--drop:console".to_string()));
        assert!(flags.contains(&"--drop:debugger".to_string()));
        assert!(!flags.iter().any(|f| f.contains("keep-names")));
        assert!(!flags.iter().any(|f| f.contains("compiler")));
    }

    #[test]
    fn output_paths_are_relative_to_out_dir() {
        let out = Path::new("/tmp/x/out");
        assert_eq!(output_path(Path::new("/tmp/x/out/main.js"), out), "main.js");
        assert_eq!(output_path(Path::new("/tmp/x/out/chunks/a.js"), out), "chunks/a.js");
        assert_eq!(output_path(Path::new("/elsewhere/b.js"), out), "b.js");
    }

    fn input_for(dir: &Path, entries: &[&str], externals: &[&str]) -> BundleInput {
        let root = DirectoryHandle::new(Arc::new(NativeFs::new(dir).unwrap()));
        let network = Arc::new(HostNetwork::new(
            Url::parse("http://localhost:3000/").unwrap(),
            "/_dev_/",
        ));
        BundleInput {
            project: ProjectId::new("site"),
            entry_points: entries.iter().map(|e| e.to_string()).collect(),
            working_dir: "src".to_string(),
            externals: externals.iter().map(|e| e.to_string()).collect(),
            options: Map::new(),
            resolver: Arc::new(ImportResolver::new(
                root.clone(),
                network,
                "esm.sh".to_string(),
                "src".to_string(),
                externals
                    .iter()
                    .map(|name| (name.to_string(), "18.2.0".to_string()))
                    .collect(),
            )),
            fs: root,
        }
    }

    #[test]
    fn args_include_externals_and_outputs() {
        let temp = TempDir::new().unwrap();
        let bundler = EsbuildBundler::new("esbuild", temp.path());
        let input = input_for(temp.path(), &["src/main.ts"], &["react"]);
        let args = bundler.args(
            &input,
            &ImportPlan::default(),
            Path::new("/o/out"),
            Path::new("/o/meta.json"),
        );
        assert_eq!(args[0], "src/main.ts");
        assert!(args.contains(&"--bundle".to_string()));
        assert!(args.contains(&"--outdir=/o/out".to_string()));
        assert!(args.contains(&"--metafile=/o/meta.json".to_string()));
        assert!(args.contains(&"--external:react".to_string()));
        assert!(args.contains(&"--external:react/*".to_string()));
    }

    #[test]
    fn args_follow_worker_resolution_rules() {
        let temp = TempDir::new().unwrap();
        let bundler = EsbuildBundler::new("esbuild", temp.path());
        let mut input = input_for(temp.path(), &["src/main.ts"], &["react", "@scope/ui"]);
        input.options.insert("loader".to_string(), json!({".webp": "dataurl"}));
        let plan = ImportPlan {
            aliases: BTreeMap::from([(
                "@scope/ui/button.css".to_string(),
                PathBuf::from("/o/vendor/0-button.css"),
            )]),
            externals: ["@scope/ui".to_string(), "@scope/ui/icons".to_string()].into(),
        };
        let args = bundler.args(&input, &plan, Path::new("/o/out"), Path::new("/o/meta.json"));
        let has = |flag: &str| args.iter().any(|a| a == flag);

        assert!(has("--resolve-extensions=.js,.ts,.tsx,.jsx,.css,.png,.jpg,.webp"));
        assert!(has("--loader:.png=file"));
        assert!(has("--loader:.jpg=file"));
        assert!(!has("--loader:.webp=file"));
        assert!(has("--loader:.webp=dataurl"));
        assert!(has("--external:https://*"));
        assert!(has("--external:http://*"));

        assert!(has("--external:react/*"));
        assert!(has("--external:@scope/ui"));
        assert!(has("--external:@scope/ui/icons"));
        assert!(!has("--external:@scope/ui/*"));
        assert!(has("--alias:@scope/ui/button.css=/o/vendor/0-button.css"));
    }

    #[tokio::test]
    async fn missing_project_import_fails_before_esbuild_runs() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("src")).unwrap();
        std::fs::write(temp.path().join("src/main.ts"), "import './gone';").unwrap();
        let bundler = EsbuildBundler::new("/nonexistent/esbuild", temp.path());
        let failure = bundler
            .build(input_for(temp.path(), &["src/main.ts"], &[]))
            .await
            .unwrap_err();
        assert_eq!(failure.errors[0].message, "404: Could not resolve \"./gone\"");
        assert_eq!(failure.errors[0].file.as_deref(), Some("src/main.ts"));
    }

    #[tokio::test]
    async fn missing_binary_is_a_build_failure() {
        let temp = TempDir::new().unwrap();
        let bundler = EsbuildBundler::new("/nonexistent/esbuild", temp.path());
        let failure = bundler
            .build(input_for(temp.path(), &["src/main.ts"], &[]))
            .await
            .unwrap_err();
        assert!(failure.errors[0].message.contains("esbuild was not found"));
    }

    #[tokio::test]
    async fn bundles_with_installed_esbuild() {
        if std::process::Command::new("esbuild").arg("--version").output().is_err() {
            return;
        }
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("src")).unwrap();
        std::fs::write(temp.path().join("src/util.ts"), "export const n: number = 2;").unwrap();
        std::fs::write(
            temp.path().join("src/main.ts"),
            "import { n } from './util';\nimport React from 'react';\nconsole.log(n, React);",
        )
        .unwrap();

        let bundler = EsbuildBundler::new("esbuild", temp.path());
        let output = bundler
            .build(input_for(temp.path(), &["src/main.ts"], &["react"]))
            .await
            .unwrap();

        let (path, meta) = output.metafile.output_for_entry("src/main.ts").unwrap();
        assert_eq!(path, "main.js");
        assert!(meta.bytes > 0);
        let main = output.output_files.iter().find(|f| f.path == "main.js").unwrap();
        let text = String::from_utf8_lossy(&main.contents);
        assert!(text.contains("from \"react\""), "{text}");
    }
}
