//! CLI command definitions and dispatch.
//!
//! This module provides the command-line interface for xr-player.
//! Each subcommand is implemented in its own submodule:
//! - `simulate`: Scripted session on simulated media
//! - `config`: Effective configuration

mod config;
mod simulate;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::runtime::{Builder, Runtime};

pub use config::cmd_config;
pub use simulate::{SimulateOptions, cmd_simulate};

/// XR Player CLI
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Run a scripted player session on simulated media and print the final state
    Simulate {
        /// Track as a CMS JSON payload file
        #[arg(long, conflicts_with = "query")]
        track: Option<PathBuf>,
        /// Track as a CMS query string (e.g. "trackName=Dawn&audio_src=a.mp3")
        #[arg(long)]
        query: Option<String>,
        /// Make the first video load fail (the shadow element recovers it)
        #[arg(long)]
        fail_video: bool,
        /// Make the shadow element fail too (requires --fail-video)
        #[arg(long, requires = "fail_video")]
        fail_shadow: bool,
        /// Video never reports any progress (resolves at the timeout)
        #[arg(long, conflicts_with = "fail_video")]
        silent_video: bool,
        /// Refuse video autoplay until a user gesture
        #[arg(long)]
        block_autoplay: bool,
        /// Config file (defaults to the user config)
        #[arg(long, env = "XR_PLAYER_CONFIG")]
        config: Option<PathBuf>,
    },
    /// Print the effective configuration
    Config {
        /// Config file (defaults to the user config)
        #[arg(long, env = "XR_PLAYER_CONFIG")]
        path: Option<PathBuf>,
    },
}

/// Run the specified CLI command.
///
/// Returns `Ok(true)` if a command was run, `Ok(false)` if no command was
/// specified.
pub fn run_command(cli: &Cli) -> anyhow::Result<bool> {
    match &cli.command {
        Some(Commands::Simulate {
            track,
            query,
            fail_video,
            fail_shadow,
            silent_video,
            block_autoplay,
            config,
        }) => {
            let options = SimulateOptions {
                track: track.clone(),
                query: query.clone(),
                fail_video: *fail_video,
                fail_shadow: *fail_shadow,
                silent_video: *silent_video,
                block_autoplay: *block_autoplay,
                config: config.clone(),
            };
            cmd_simulate(&runtime()?, &options)?;
            Ok(true)
        }
        Some(Commands::Config { path }) => {
            cmd_config(path.as_deref())?;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Single-threaded runtime: the player is a cooperative event loop.
fn runtime() -> anyhow::Result<Runtime> {
    Ok(Builder::new_current_thread().enable_all().build()?)
}
