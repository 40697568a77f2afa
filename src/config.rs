//! Configuration for the emWave agent.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::core::artifacts::{DEFAULT_LIMIT, DEFAULT_WINDOW};
use crate::core::coherence::DEFAULT_MIN_SAMPLES;

/// Port the emWave application listens on.
pub const DEFAULT_PORT: u16 = 20480;

/// Main configuration for the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Sensor process host (loopback only in practice)
    pub host: String,

    /// Sensor process TCP port
    pub port: u16,

    /// Reconnection policy
    pub retry: RetryConfig,

    /// Time after a segment starts before samples are aggregated
    #[serde(with = "duration_serde")]
    pub grace_period: Duration,

    /// Number of artifact flags tracked
    pub artifact_window: usize,

    /// Artifact count above which a sensor error is reported
    pub artifact_limit: usize,

    /// Minimum coherence values before a regime average is reported
    pub min_coherence_samples: usize,

    /// Override for the vendor application executable
    pub sensor_app_path: Option<PathBuf>,

    /// PowerShell script used to hide the vendor window (Windows only)
    pub hide_script_path: Option<PathBuf>,

    /// Path for persisting diagnostics
    pub data_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("emwave-agent");

        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            retry: RetryConfig::default(),
            grace_period: Duration::from_secs(30),
            artifact_window: DEFAULT_WINDOW,
            artifact_limit: DEFAULT_LIMIT,
            min_coherence_samples: DEFAULT_MIN_SAMPLES,
            sensor_app_path: None,
            hide_script_path: None,
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(&config_path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("emwave-agent")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// `host:port` of the sensor process.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Bounded linear backoff for connecting to the sensor process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total connection attempts, including the first
    pub max_attempts: u32,

    /// Delay before retry `n` is `n * backoff_step`
    #[serde(with = "duration_serde")]
    pub backoff_step: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 7,
            backoff_step: Duration::from_secs(10),
        }
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration, as whole seconds.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
