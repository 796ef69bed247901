//! Logging setup for the tarn CLI.
//!
//! The worker emits `tracing` events; this module installs the subscriber
//! that prints them.
//!
//! - `--verbose` shows debug events from tarn crates
//! - `--quiet` shows errors only
//! - otherwise `RUST_LOG` is honored, falling back to info level

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const VERBOSE_FILTER: &str = "tarn=debug,tarn_cli=debug";
const QUIET_FILTER: &str = "tarn=error,tarn_cli=error";
const DEFAULT_FILTER: &str = "tarn=info,tarn_cli=info";

/// Filter for the given verbosity flags.
///
/// `verbose` wins over `quiet`; neither means `RUST_LOG` or the default.
pub fn filter_for(verbose: bool, quiet: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new(VERBOSE_FILTER)
    } else if quiet {
        EnvFilter::new(QUIET_FILTER)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    }
}

/// Initialize the tracing subscriber. Call once, before any logging occurs.
pub fn init_logger(verbose: bool, quiet: bool, no_color: bool) {
    init_logger_with_filter(filter_for(verbose, quiet), no_color);
}

/// Initialize the subscriber with an explicit filter.
pub fn init_logger_with_filter(filter: EnvFilter, no_color: bool) {
    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_level(true)
        .with_ansi(!no_color && should_use_colors())
        .compact();

    // A second initialization (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}

/// Whether log output should be colored.
///
/// `NO_COLOR` disables colors, `FORCE_COLOR` forces them; otherwise the
/// terminal decides.
pub fn should_use_colors() -> bool {
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }
    if std::env::var_os("FORCE_COLOR").is_some() {
        return true;
    }
    console::Term::stderr().features().colors_supported()
}
