//! Status lines for the terminal.
//!
//! Printed to stderr so stdout stays clean for piping.

use owo_colors::OwoColorize;
use std::fmt::Display;
use std::path::Path;

/// The server is up.
pub fn serving(project: &Path, url: impl Display) {
    eprintln!(
        "{} Serving {} at {}",
        "✓".green().bold(),
        project.display(),
        url.to_string().cyan().underline()
    );
}

/// Print an info message.
pub fn info(message: &str) {
    eprintln!("{} {}", "ℹ".blue().bold(), message);
}

/// Print a warning message.
pub fn warning(message: &str) {
    eprintln!("{} {}", "⚠".yellow().bold(), message.yellow());
}

/// Caches left over from an older worker version were dropped.
///
/// Only shown when `RUST_LOG` is set.
pub fn removed_caches(names: &[String]) {
    if names.is_empty() || std::env::var_os("RUST_LOG").is_none() {
        return;
    }
    eprintln!(
        "{} Removed old caches: {}",
        "◆".dimmed(),
        names.join(", ").dimmed()
    );
}

/// Whether color output should be enabled.
///
/// `NO_COLOR` wins over `FORCE_COLOR`; otherwise color follows whether
/// stderr is a terminal.
pub fn should_use_color() -> bool {
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }
    std::env::var_os("FORCE_COLOR").is_some() || console::user_attended_stderr()
}

pub fn init_colors() {
    console::set_colors_enabled_stderr(should_use_color());
}
