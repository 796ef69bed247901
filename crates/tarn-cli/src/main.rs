//! Tarn CLI - serve a project folder through the tarn worker.
//!
//! This is the main entry point for the `tarn` binary. It handles command-line
//! argument parsing, logging initialization, and command dispatch.

use clap::Parser;
use miette::Result;
use tarn_cli::{cli, commands, error, logger, ui};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    logger::init_logger(args.verbose, args.quiet, args.no_color);
    ui::init_colors();

    let result = match args.command {
        cli::Command::Serve(serve_args) => commands::serve_execute(serve_args).await,
    };

    result.map_err(error::cli_error_to_miette)
}
