//! macOS location of emWave Pro.

use super::SupervisorError;
use std::path::{Path, PathBuf};

const APP_PATH: &str = "/Applications/emWave Pro.app/Contents/MacOS/emWaveMac";

pub fn default_app_path() -> Result<PathBuf, SupervisorError> {
    Ok(PathBuf::from(APP_PATH))
}

/// emWave on macOS does not need hiding.
pub fn hide_window(_pid: u32, _script: Option<&Path>) -> Result<(), SupervisorError> {
    Ok(())
}
