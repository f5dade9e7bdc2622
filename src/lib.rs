//! SHELFWATCH - Heated shelf telemetry monitor
//!
//! Ingests temperature telemetry for a small set of independently heated
//! shelves, either generated locally (DEMO) or read from a controller over a
//! serial link (LIVE), and turns it into a de-duplicated, acknowledgeable
//! alarm set plus run-hour accounting for wear components.
//!
//! # Feature Flags
//!
//! - `serial` (default): [`transport::SerialLink`] over `tokio-serial`
//! - `metrics`: engine counters and gauges through the `metrics` facade
//!
//! # Examples
//!
//! ```rust,no_run
//! use shelfwatch::{Config, Engine, MemoryLink, OperatorCommand};
//!
//! # async fn demo() -> shelfwatch::Result<()> {
//! shelfwatch::init()?;
//!
//! let config = Config::default();
//! let mut engine = Engine::new(config, Box::new(MemoryLink::new("bench")))?;
//! let handle = engine.handle();
//!
//! handle.submit(OperatorCommand::AcknowledgeAll)?;
//! engine.tick().await?;
//! println!("{}", serde_json::to_string_pretty(&handle.snapshot())?);
//! # Ok(())
//! # }
//! ```

// ============================================================================
// CORE MODULES
// ============================================================================

/// Error type shared by every module
pub mod error;

/// YAML configuration with per-field defaults
pub mod config;

/// Bounded operator log
pub mod event_log;

/// Alarm registry keyed by severity, shelf and name
pub mod alarms;

pub mod shelf;

pub mod maintenance;

// ============================================================================
// TELEMETRY PIPELINE
// ============================================================================

/// Controller wire messages
pub mod telemetry;

pub mod state;

/// Apply decoded telemetry to the monitor state
pub mod reconciler;

/// Synthetic telemetry for DEMO mode
pub mod demo;

/// Links to the shelf controller
pub mod transport;

/// Tick engine and operator command queue
pub mod engine;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use alarms::{Alarm, AlarmRegistry, Severity};
pub use config::Config;
pub use engine::{Engine, EngineHandle, EngineStats, OperatorCommand};
pub use error::{MonitorError, Result};
pub use event_log::EventLog;
pub use maintenance::MaintenanceRecord;
pub use shelf::{Shelf, ShelfDefaults, ShelfStore};
pub use state::{Mode, MonitorState, SharedState, StatusSnapshot};
pub use telemetry::{Command, TelemetryMessage};
pub use transport::{MemoryLink, ReadOutcome, Transport};

#[cfg(feature = "serial")]
pub use transport::SerialLink;

// ============================================================================
// VERSION INFORMATION
// ============================================================================

/// SHELFWATCH version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// INITIALIZATION
// ============================================================================

/// Install the tracing subscriber
///
/// `RUST_LOG` wins when set; otherwise `shelfwatch=info`. Calling this more
/// than once is harmless.
pub fn init() -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("shelfwatch=info"));

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false));

    if subscriber.try_init().is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn init_is_idempotent() {
        assert!(init().is_ok());
        assert!(init().is_ok());
    }
}
