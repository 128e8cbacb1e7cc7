//! RMA Monitor
//!
//! Runs the RMA engine as a local service:
//! - Loads configuration from TOML with environment overrides
//! - Persists cases to a JSON file
//! - Delivers messages to an outbox directory
//! - Runs the SLA breach scan daily and on demand

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod app;
pub mod config;
pub mod error;
pub mod file_store;
pub mod logging;
pub mod outbox;
pub mod scheduler;

pub use app::Monitor;
pub use config::{ConfigError, MonitorConfig};
pub use error::MonitorError;
pub use file_store::JsonFileStore;
pub use outbox::{OutboxEntry, OutboxNotifier};
pub use scheduler::{DailySchedule, SlaScheduler, TriggerHandle};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
