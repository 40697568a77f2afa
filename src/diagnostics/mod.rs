//! Diagnostics for the telemetry pipeline.
//!
//! Tracks how many frames, samples and regimes the agent handled so a
//! research assistant can check a session after the fact.

pub mod log;

// Re-export commonly used types
pub use log::{
    create_shared_log, create_shared_log_with_persistence, DiagnosticsLog, DiagnosticsStats,
    SharedDiagnosticsLog,
};
