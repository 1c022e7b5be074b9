//! Subcommand handlers.

pub mod config_cmd;
pub mod evaluate;
pub mod publish;
pub mod run;
pub mod thresholds;

use std::path::PathBuf;

use fleetwatch_config::Config;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Config file selected by `--config`, or the platform default.
pub fn config_path(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(fleetwatch_config::config_path)
}

/// Load the layered config for this invocation.
pub fn load_config(global: &GlobalOpts) -> Result<Config, CliError> {
    let path = config_path(global);
    tracing::debug!(path = %path.display(), "loading config");
    Ok(fleetwatch_config::load_config(Some(&path))?)
}
