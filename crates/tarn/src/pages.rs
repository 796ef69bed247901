//! HTML pages the worker renders itself.
//!
//! Every failure a navigation can hit ends up here as an [`ErrorReport`].
//! Rendering is infallible from the caller's point of view:
//! [`render_error_page`] falls back to [`MINIMAL_ERROR_PAGE`] if anything
//! inside the renderer goes wrong, and never recurses into itself.
//!
//! # Security
//!
//! All interpolated text is HTML-escaped. Messages and file paths come from
//! user projects and compiler output.

use crate::error::{Diagnostic, Error, ErrorCode};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::panic::{self, AssertUnwindSafe};
use tracing::error;

/// Served when rendering an error page fails.
pub const MINIMAL_ERROR_PAGE: &str = "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>Error</title></head><body><h1>Something went wrong</h1><p>The development server could not render this error. Check the console for details.</p></body></html>";

const STYLE: &str = "body{font-family:system-ui,sans-serif;background:#1e1e1e;color:#e6e6e6;margin:0;padding:2rem;line-height:1.5}\
main{max-width:60rem;margin:0 auto}\
h1{color:#ff6b6b;margin-top:0}\
.code{display:inline-block;background:#333;border-radius:4px;padding:0 .5rem;font-size:.85rem;color:#aaa}\
.diagnostic{background:#2a2a2a;border-left:4px solid #ff6b6b;border-radius:4px;padding:1rem;margin:1rem 0}\
.location{color:#8ab4f8;font-family:monospace}\
pre{background:#111;padding:.75rem;border-radius:4px;overflow-x:auto}\
button{background:#4a90e2;color:#fff;border:0;border-radius:4px;padding:.5rem 1rem;font-size:1rem;cursor:pointer}";

/// Escape HTML special characters to prevent XSS attacks.
///
/// Converts the following characters:
/// - `&` -> `&amp;`
/// - `<` -> `&lt;`
/// - `>` -> `&gt;`
/// - `"` -> `&quot;`
/// - `'` -> `&#x27;`
pub fn html_escape(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Everything an error page shows. Every field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ErrorReport {
    pub code: Option<i32>,
    pub title: String,
    pub message: String,
    pub diagnostics: Vec<Diagnostic>,
    /// Directory name shown on the permission page
    pub directory: Option<String>,
}

impl ErrorReport {
    pub fn from_error(err: &Error) -> Self {
        let code = err.code();
        Self {
            code: Some(code.as_i32()),
            title: code.title().to_string(),
            message: err.to_string(),
            diagnostics: err.diagnostics().to_vec(),
            directory: match err {
                Error::RequirePermission(dir) => Some(dir.clone()),
                _ => None,
            },
        }
    }

    fn error_code(&self) -> Option<ErrorCode> {
        self.code.and_then(ErrorCode::from_i32)
    }
}

fn document(title: &str, code: Option<i32>, body: &str) -> String {
    let code_attr = code
        .map(|c| format!(" data-error-code=\"{c}\""))
        .unwrap_or_default();
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <title>{title}</title>\n<style>{STYLE}</style>\n</head>\n<body{code_attr}>\n<main>\n{body}\n</main>\n</body>\n</html>\n",
        title = html_escape(title),
    )
}

fn render_diagnostic(out: &mut String, diagnostic: &Diagnostic) {
    out.push_str("<section class=\"diagnostic\">\n");
    if let Some(location) = diagnostic.location() {
        let _ = writeln!(out, "<div class=\"location\">{}</div>", html_escape(&location));
    }
    let message = if diagnostic.message.trim().is_empty() {
        "(no message)"
    } else {
        diagnostic.message.as_str()
    };
    let _ = writeln!(out, "<p>{}</p>", html_escape(message));
    if let Some(snippet) = diagnostic.snippet.as_deref().filter(|s| !s.is_empty()) {
        let _ = writeln!(out, "<pre><code>{}</code></pre>", html_escape(snippet));
    }
    out.push_str("</section>\n");
}

fn render_report(report: &ErrorReport, client_script: &str) -> String {
    let code = report.error_code().unwrap_or(ErrorCode::GenericError);
    let title = if report.title.trim().is_empty() {
        code.title()
    } else {
        report.title.as_str()
    };

    if code == ErrorCode::RequirePermission {
        return permission_page(report.directory.as_deref().unwrap_or("project"), client_script);
    }

    let mut body = String::new();
    let _ = writeln!(body, "<h1>{}</h1>", html_escape(title));
    let _ = writeln!(
        body,
        "<p><span class=\"code\">Error code {}</span></p>",
        report.code.unwrap_or(code.as_i32())
    );
    if !report.message.trim().is_empty() {
        let _ = writeln!(body, "<p>{}</p>", html_escape(&report.message));
    }
    for diagnostic in &report.diagnostics {
        render_diagnostic(&mut body, diagnostic);
    }
    if code == ErrorCode::BuildFailed {
        body.push_str("<p><button onclick=\"location.reload()\">Rebuild</button></p>\n");
    }
    document(title, report.code, &body)
}

/// Render an error page, falling back to [`MINIMAL_ERROR_PAGE`].
///
/// `client_script` is the URL of the tooling client script the permission
/// page loads.
pub fn render_error_page(report: &ErrorReport, client_script: &str) -> String {
    match panic::catch_unwind(AssertUnwindSafe(|| render_report(report, client_script))) {
        Ok(html) => html,
        Err(_) => {
            error!("error page rendering failed, serving minimal page");
            MINIMAL_ERROR_PAGE.to_string()
        }
    }
}

/// Interstitial asking the user to grant read access again.
pub fn permission_page(directory: &str, client_script: &str) -> String {
    let body = format!(
        "<h1>Permission required</h1>\n\
         <p><span class=\"code\">Error code {code}</span></p>\n\
         <p>The browser needs permission to read <strong>{directory}</strong> before this page can be built.</p>\n\
         <p><button id=\"grant\" type=\"button\">Grant access</button></p>\n\
         <script src=\"{client}\"></script>\n\
         <script>document.getElementById(\"grant\").addEventListener(\"click\", async () => {{\n\
         const state = await tarn.requestPermission();\n\
         if (state === \"granted\") location.reload();\n\
         }});</script>",
        code = ErrorCode::RequirePermission.as_i32(),
        directory = html_escape(directory),
        client = html_escape(client_script),
    );
    document("Permission required", Some(ErrorCode::RequirePermission.as_i32()), &body)
}

/// 404 page for a pathname no page matches.
pub fn not_found_page(pathname: &str) -> String {
    let body = format!(
        "<h1>Page not found</h1>\n<p><span class=\"code\">Error code {}</span></p>\n\
         <p>No page matches <code>{}</code>.</p>",
        ErrorCode::RouteNotFound.as_i32(),
        html_escape(pathname)
    );
    document("Page not found", Some(ErrorCode::RouteNotFound.as_i32()), &body)
}

/// Page for an HTML file that references nothing to build.
pub fn missing_entries_page(html_path: &str) -> String {
    let body = format!(
        "<h1>No entry files</h1>\n\
         <p><code>{}</code> does not reference any local scripts or stylesheets.</p>\n\
         <p>Add a <code>&lt;script type=\"module\" src=\"./main.js\"&gt;&lt;/script&gt;</code> tag pointing at a file in the project.</p>",
        html_escape(html_path)
    );
    document("No entry files", None, &body)
}

/// Shown for navigations while offline when no offline shell is cached.
pub fn offline_page() -> String {
    document(
        "Offline",
        None,
        "<h1>You are offline</h1>\n<p>This page has not been cached yet. Reconnect and reload.</p>",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLIENT: &str = "/_dev_/client.js";

    #[test]
    fn test_html_escape_ampersand() {
        assert_eq!(html_escape("a & b"), "a &amp; b");
    }

    #[test]
    fn test_html_escape_angle_brackets() {
        assert_eq!(html_escape("<script>"), "&lt;script&gt;");
    }

    #[test]
    fn test_html_escape_quotes() {
        assert_eq!(html_escape(r#"He said "hello""#), "He said &quot;hello&quot;");
        assert_eq!(html_escape("It's working"), "It&#x27;s working");
    }

    #[test]
    fn build_failure_lists_each_diagnostic() {
        let err = Error::BuildFailed(vec![
            Diagnostic {
                message: "Unexpected token".into(),
                file: Some("src/main.ts".into()),
                line: Some(2),
                column: Some(5),
                snippet: Some("1 | let a = 1\n2 | let b = <".into()),
            },
            Diagnostic::new("Second <problem>"),
        ]);
        let html = render_error_page(&ErrorReport::from_error(&err), CLIENT);

        assert!(html.contains("Build failed"));
        assert!(html.contains("Error code 6"));
        assert!(html.contains("src/main.ts:2:5"));
        assert!(html.contains("2 | let b = &lt;"));
        assert!(html.contains("Second &lt;problem&gt;"));
        assert_eq!(html.matches("class=\"diagnostic\"").count(), 2);
    }

    #[test]
    fn permission_error_renders_interstitial() {
        let err = Error::RequirePermission("my-site".into());
        let html = render_error_page(&ErrorReport::from_error(&err), CLIENT);
        assert!(html.contains("Grant access"));
        assert!(html.contains("my-site"));
        assert!(html.contains("tarn.requestPermission()"));
        assert!(html.contains(r#"src="/_dev_/client.js""#));
    }

    #[test]
    fn generic_errors_show_title_and_code() {
        let err = Error::InvalidConfig {
            file: "tsconfig.json".into(),
            message: "expected value at line 1".into(),
        };
        let html = render_error_page(&ErrorReport::from_error(&err), CLIENT);
        assert!(html.contains("Invalid build configuration"));
        assert!(html.contains("Error code 4"));
        assert!(html.contains("data-error-code=\"4\""));
    }

    #[test]
    fn malformed_reports_never_fail() {
        let reports = [
            ErrorReport::default(),
            ErrorReport {
                code: Some(12345),
                ..Default::default()
            },
            ErrorReport {
                code: Some(3),
                directory: None,
                ..Default::default()
            },
            ErrorReport {
                diagnostics: vec![
                    Diagnostic::default(),
                    Diagnostic {
                        line: Some(u32::MAX),
                        column: None,
                        file: None,
                        snippet: Some(String::new()),
                        message: "\u{0}<>".into(),
                    },
                ],
                ..Default::default()
            },
        ];
        for report in &reports {
            let html = render_error_page(report, "");
            assert!(html.contains("<html"));
        }
    }

    #[test]
    fn arbitrary_json_deserializes_into_report() {
        let report: ErrorReport =
            serde_json::from_str(r#"{"diagnostics":[{"line":3}],"unexpected":true}"#).unwrap();
        let html = render_error_page(&report, CLIENT);
        assert!(html.contains("(no message)"));
        assert!(html.contains("Error code 99"));
    }

    #[test]
    fn not_found_and_missing_entries() {
        assert!(not_found_page("/<x>").contains("/&lt;x&gt;"));
        assert!(missing_entries_page("pages/about.html").contains("pages/about.html"));
        assert!(offline_page().contains("offline"));
    }
}
