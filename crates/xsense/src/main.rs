//! `xsense`: inspect and control X-Sense sensors from the terminal.

mod cli;
mod commands;
mod config;
mod error;
mod output;

use std::io::IsTerminal;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, ColorMode, GlobalOpts};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.global);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

/// Logs go to stderr so `-o json` output stays machine-readable.
/// `RUST_LOG` wins over `-v`/`-q`.
fn init_tracing(global: &GlobalOpts) {
    let level = match (global.quiet, global.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "xsense=info,xsense_core=info,xsense_api=info",
        (false, 2) => "xsense=debug,xsense_core=debug,xsense_api=debug",
        (false, _) => "trace",
    };
    let ansi = match global.color {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => std::io::stderr().is_terminal(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_target(global.verbose > 1)
        .with_ansi(ansi)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = config::build_client_config(&cli.global)?;
    tracing::debug!(command = ?cli.command, profile = ?cli.global.profile, "dispatching");
    commands::dispatch(cli.command, config, &cli.global).await
}
