//! Lifecycle of the vendor emWave application.
//!
//! The telemetry core only needs the [`SensorProcess`] interface; the
//! platform modules know where the vendor binary lives and how to hide its
//! window.

use crate::config::Config;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "macos")]
use macos as platform;

#[cfg(target_os = "windows")]
mod windows;
#[cfg(target_os = "windows")]
use windows as platform;

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
mod unsupported;
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
use unsupported as platform;

/// Errors from launching or controlling the sensor application.
#[derive(Debug)]
pub enum SupervisorError {
    /// The vendor application only exists for macOS and Windows
    UnsupportedPlatform(String),
    SpawnFailed { path: PathBuf, error: String },
    HideFailed(String),
}

impl std::fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SupervisorError::UnsupportedPlatform(os) => write!(
                f,
                "The '{os}' operating system is not supported. Please use either macOS or Windows."
            ),
            SupervisorError::SpawnFailed { path, error } => {
                write!(f, "Failed to start sensor application {path:?}: {error}")
            }
            SupervisorError::HideFailed(e) => write!(f, "Failed to hide sensor application: {e}"),
        }
    }
}

impl std::error::Error for SupervisorError {}

/// A running sensor application.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
}

impl ProcessHandle {
    pub fn from_child(child: Child) -> Self {
        Self { child }
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }
}

/// Starts and stops the external sensor process.
pub trait SensorProcess {
    fn start(&mut self) -> Result<ProcessHandle, SupervisorError>;

    /// Move the vendor window out of the participant's way.
    fn hide(&self, handle: &ProcessHandle) -> Result<(), SupervisorError>;

    /// Kill the process; false if it could not be terminated.
    fn terminate(&mut self, handle: ProcessHandle) -> bool;
}

/// Supervisor for the HeartMath emWave application.
#[derive(Debug, Clone)]
pub struct EmWaveSupervisor {
    app_path: PathBuf,
    hide_script: Option<PathBuf>,
}

impl EmWaveSupervisor {
    /// Fails on platforms the vendor application does not support.
    pub fn new(config: &Config) -> Result<Self, SupervisorError> {
        let default_path = platform::default_app_path()?;
        Ok(Self {
            app_path: config.sensor_app_path.clone().unwrap_or(default_path),
            hide_script: config.hide_script_path.clone(),
        })
    }

    pub fn app_path(&self) -> &Path {
        &self.app_path
    }
}

impl SensorProcess for EmWaveSupervisor {
    fn start(&mut self) -> Result<ProcessHandle, SupervisorError> {
        spawn_detached(&self.app_path, &[])
    }

    fn hide(&self, handle: &ProcessHandle) -> Result<(), SupervisorError> {
        platform::hide_window(handle.pid(), self.hide_script.as_deref())
    }

    fn terminate(&mut self, handle: ProcessHandle) -> bool {
        terminate_child(handle)
    }
}

/// Spawn with all stdio discarded.
///
/// The vendor app stalls once an unread stdout pipe fills up, so output is
/// never piped.
pub(crate) fn spawn_detached(path: &Path, args: &[&str]) -> Result<ProcessHandle, SupervisorError> {
    Command::new(path)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map(ProcessHandle::from_child)
        .map_err(|e| SupervisorError::SpawnFailed {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
}

fn terminate_child(mut handle: ProcessHandle) -> bool {
    let pid = handle.pid();
    if let Err(e) = handle.child.kill() {
        tracing::warn!(pid, error = %e, "killing sensor application failed");
        return false;
    }
    // Reap so the process does not linger as a zombie
    if let Err(e) = handle.child.wait() {
        tracing::warn!(pid, error = %e, "waiting for sensor application failed");
    }
    true
}
