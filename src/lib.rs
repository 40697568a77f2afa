//! emWave Agent - heart-rate telemetry for paced-breathing studies.
//!
//! This library connects to the HeartMath emWave application over its local
//! TCP interface, decodes inter-beat interval data in real time, watches for
//! sensor noise, and reports average coherence for each pacing regime of a
//! session.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          emWave Agent                            │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌────────────┐   ┌────────────┐   ┌────────────┐                │
//! │  │ Supervisor │──▶│ Connection │──▶│  Protocol  │                │
//! │  │  (emWave)  │   │ (TCP/retry)│   │  Decoder   │                │
//! │  └────────────┘   └────────────┘   └─────┬──────┘                │
//! │                                          ▼                       │
//! │  ┌────────────┐   ┌──────────────────────────────┐   ┌────────┐  │
//! │  │  Control   │──▶│ Session (artifacts/coherence)│──▶│ Events │  │
//! │  │  (host)    │   │      regime controller       │   │ (host) │  │
//! │  └────────────┘   └──────────────────────────────┘   └────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use emwave_agent::{diagnostics, Config, ConnectionManager};
//!
//! # async fn demo() {
//! let config = Config::default();
//! let (manager, handle, events) =
//!     ConnectionManager::new(&config, diagnostics::create_shared_log());
//!
//! let link = tokio::spawn(manager.run());
//! handle.regime_changed(0, serde_json::json!({"pace": 6}));
//! handle.start_collection();
//!
//! while let Ok(event) = events.try_recv() {
//!     println!("{event:?}");
//! }
//!
//! handle.stop_collection();
//! handle.shutdown();
//! let _ = link.await;
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod control;
pub mod core;
pub mod diagnostics;
pub mod protocol;
pub mod session;
pub mod supervisor;

// Re-export key types at crate root for convenience
pub use config::{Config, RetryConfig};
pub use connection::{ConnectionManager, ConnectionState, SessionHandle};
pub use control::{ControlCommand, ControlError, EventPrinter};
pub use crate::core::{ArtifactWindow, CoherenceAccumulator, FinalizeOutcome, Regime, RegimeCoherence};
pub use diagnostics::{DiagnosticsLog, DiagnosticsStats, SharedDiagnosticsLog};
pub use protocol::{decode_frame, DecodedEvent, Decoder, IbiKind, IbiSample, SensorCommand};
pub use session::{AgentEvent, ConnectionStatus, StageError, TelemetrySession};
pub use supervisor::{EmWaveSupervisor, ProcessHandle, SensorProcess, SupervisorError};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
