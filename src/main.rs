//! XR Player - command-line front end.
//!
//! Runs scripted sessions of the player engine on simulated media and prints
//! the configuration in effect.

use clap::{CommandFactory, Parser};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use xr_player::cli;

fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(EnvFilter::from_default_env().add_directive("xr_player=info".parse()?))
        .init();

    if !cli::run_command(&args)? {
        // No command given
        cli::Cli::command().print_help()?;
        println!();
    }
    Ok(())
}
