//! Miette report conversion for CLI errors.

use crate::error::CliError;
use miette::Report;

/// Convert a [`CliError`] into a miette report.
///
/// Build failures list every diagnostic with its location.
pub fn cli_error_to_miette(err: CliError) -> Report {
    match err {
        CliError::Config(e) => miette::miette!("Configuration error: {}", e),
        CliError::Worker(tarn::Error::BuildFailed(diagnostics)) if !diagnostics.is_empty() => {
            let lines = diagnostics
                .iter()
                .map(|diagnostic| format!("  {diagnostic}"))
                .collect::<Vec<_>>()
                .join("\n");
            miette::miette!("Build failed:\n{}", lines)
        }
        CliError::Worker(e) => {
            miette::miette!("{} (error code {})", e, e.code().as_i32())
        }
        _ => miette::miette!("{}", err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tarn::Diagnostic;

    #[test]
    fn build_failures_list_locations() {
        let err = CliError::Worker(tarn::Error::BuildFailed(vec![
            Diagnostic::new("Unexpected token").at("src/main.ts", Some(3), Some(1)),
        ]));
        let report = format!("{}", cli_error_to_miette(err));
        assert!(report.contains("src/main.ts:3:1: Unexpected token"));
    }

    #[test]
    fn worker_errors_show_code() {
        let err = CliError::Worker(tarn::Error::generic("boom"));
        let report = format!("{}", cli_error_to_miette(err));
        assert!(report.contains("error code 99"));
    }
}
