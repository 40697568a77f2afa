//! Platforms without an emWave build.

use super::SupervisorError;
use std::path::{Path, PathBuf};

pub fn default_app_path() -> Result<PathBuf, SupervisorError> {
    Err(SupervisorError::UnsupportedPlatform(
        std::env::consts::OS.to_string(),
    ))
}

pub fn hide_window(_pid: u32, _script: Option<&Path>) -> Result<(), SupervisorError> {
    Ok(())
}
