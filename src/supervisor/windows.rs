//! Windows location of emWave and window hiding via PowerShell.

use super::{spawn_detached, SupervisorError};
use std::path::{Path, PathBuf};

const APP_PATH: &str = r"C:\Program Files\HeartMath\emWave\emWavePC.exe";
const POWERSHELL: &str = r"C:\Windows\System32\WindowsPowerShell\v1.0\powershell.exe";
const HIDE_SCRIPT: &str = "hide-emwave.ps1";

pub fn default_app_path() -> Result<PathBuf, SupervisorError> {
    Ok(PathBuf::from(APP_PATH))
}

/// Run the hide script against `pid`.
///
/// Without an explicit script path, `hide-emwave.ps1` next to the agent
/// executable is used.
pub fn hide_window(pid: u32, script: Option<&Path>) -> Result<(), SupervisorError> {
    let script = match script {
        Some(path) => path.to_path_buf(),
        None => std::env::current_exe()
            .map_err(|e| SupervisorError::HideFailed(e.to_string()))?
            .parent()
            .map(|dir| dir.join(HIDE_SCRIPT))
            .ok_or_else(|| SupervisorError::HideFailed("executable has no parent".to_string()))?,
    };

    let script = script.to_string_lossy().into_owned();
    let pid = pid.to_string();
    // Fire and forget; the script exits on its own
    spawn_detached(Path::new(POWERSHELL), &[script.as_str(), pid.as_str()])
        .map(|_| ())
        .map_err(|e| SupervisorError::HideFailed(e.to_string()))
}
