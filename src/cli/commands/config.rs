//! Configuration display.

use std::path::Path;

use crate::config;

/// Print the effective configuration as TOML
pub fn cmd_config(path: Option<&Path>) -> anyhow::Result<()> {
    let config = match path {
        Some(path) => config::load_from(path)?,
        None => config::load(),
    };

    match path.map(Path::to_path_buf).or_else(config::config_path) {
        Some(source) => println!("# {}", source.display()),
        None => println!("# (defaults)"),
    }
    print!("{}", config.to_toml()?);
    Ok(())
}
