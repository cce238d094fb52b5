//! Command-line interface for xr-player.
//!
//! The player engine is a library; the CLI drives it against simulated media
//! so that the preload and XR behavior can be observed without a browser.

mod commands;

pub use commands::{Cli, Commands, run_command};
