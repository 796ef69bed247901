//! Command-line interface definition for tarn.
//!
//! - `tarn serve <DIR>` - Serve a project folder through the worker

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Tarn - on-demand bundling dev server
#[derive(Parser, Debug)]
#[command(
    name = "tarn",
    version,
    about = "Serve a web project with on-demand bundling",
    long_about = "Tarn serves a project folder without a build step.\n\
                  Pages are bundled the first time they are requested, bare imports\n\
                  are rewritten to a CDN, and build errors are rendered in the browser."
)]
pub struct Cli {
    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve a project folder
    ///
    /// Registers the folder as the project, warms the tooling caches and
    /// answers every request through the worker until interrupted.
    Serve(ServeArgs),
}

/// Arguments for the serve command
///
/// Every option left unset falls back to `tarn.config.json`, then to the
/// `TARN_*` environment, then to built-in defaults.
#[derive(Args, Debug, Clone, Default)]
pub struct ServeArgs {
    /// Project folder to serve
    #[arg(value_name = "DIR", default_value = ".")]
    pub dir: PathBuf,

    /// Port to listen on [default: 3000]
    #[arg(short, long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Interface to bind [default: 127.0.0.1]
    #[arg(long, value_name = "HOST")]
    pub host: Option<String>,

    /// Router to save into package.json before serving
    ///
    /// An HTML file (e.g. `public/index.html`) serves every path with that
    /// page. A directory (e.g. `pages/`) maps paths to HTML files inside it.
    #[arg(long, value_name = "ROUTER")]
    pub router: Option<String>,

    /// Separate folder static assets are served from
    #[arg(long, value_name = "DIR")]
    pub static_dir: Option<PathBuf>,

    /// Host bare imports are rewritten to
    #[arg(long, value_name = "HOST")]
    pub cdn_host: Option<String>,

    /// Path to the esbuild binary
    #[arg(long, value_name = "PATH")]
    pub esbuild: Option<String>,

    /// Configuration file [default: <DIR>/tarn.config.json]
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}
