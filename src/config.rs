// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use anyhow::{Result, bail};

pub const DATA_DIR_ENV: &str = "FACEREG_DATA_DIR";
pub const ENGINE_ENV: &str = "FACEREG_ENGINE";

/// Validates the data directory given on the command line or through the environment.
///
/// # Errors
///
/// Returns an error if no directory was given or it does not exist.
pub fn resolve_data_dir(data: Option<PathBuf>) -> Result<PathBuf> {
    let Some(dir) = data else {
        bail!("no data directory given; pass --data or set {DATA_DIR_ENV}");
    };
    if !dir.is_dir() {
        bail!(
            "data directory {} does not exist (from --data or {DATA_DIR_ENV})",
            dir.display()
        );
    }
    Ok(dir)
}

/// # Errors
///
/// Returns an error if no engine program was given.
pub fn resolve_engine(engine: Option<PathBuf>) -> Result<PathBuf> {
    match engine {
        Some(program) => Ok(program),
        None => bail!("no analysis engine given; pass --engine or set {ENGINE_ENV}"),
    }
}
