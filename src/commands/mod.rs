//! CLI command implementations.

pub mod check;
pub mod pending;
pub mod run;
pub mod scan;

use anyhow::{Context, Result};
use std::path::Path;

use crate::config::Config;

/// Load the config file plus its drop-ins.
pub(crate) fn load_config(config_path: &Path, dropin_dir: &Path) -> Result<Config> {
    Config::load_with_dropins(config_path, Some(dropin_dir))
        .with_context(|| format!("Failed to load config from {:?}", config_path))
}
