//! # CrossControl Core Library
//!
//! Device connectivity core with support for:
//! - HTTP requests
//! - TCP and UDP, as client or listener
//! - Serial ports (RS-232, USB-Serial adapters)
//!
//! ## Features
//!
//! - Named, protocol-specific action templates with schema migration
//! - Device inventory with CSV, NDJSON and SQLite import/export
//! - Listen mode with per-connection sessions and an event stream
//! - Bounded-concurrency reachability testing
//! - CLI with exit codes
//!
//! ## Example
//!
//! ```rust,no_run
//! use crosscontrol_core::{ConnectorTable, Monitor, MonitorConfig, MonitorEvent, ProtocolKind};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let monitor = Monitor::new(ConnectorTable::standard(), MonitorConfig::default());
//!     let mut rx = monitor.subscribe();
//!     monitor.start_listen(ProtocolKind::Tcp, 9000).await?;
//!
//!     while let Ok(event) = rx.recv().await {
//!         if let MonitorEvent::Data { peer, bytes, .. } = event {
//!             println!("{peer:?}: {bytes:?}");
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod storage;
pub mod utils;

// Re-exports for convenience
pub use crate::cli::{exit_code_for, CliResult, ExitCodes};
pub use crate::config::AppConfig;
pub use crate::core::action::{Action, ActionRecord, ActionStore, MigrationChain};
pub use crate::core::device::{Device, DeviceRegistry, ImportOptions, ImportReport, InterchangeFormat};
pub use crate::core::gateway::Gateway;
pub use crate::core::monitor::{Monitor, MonitorConfig, MonitorEvent, SendTarget};
pub use crate::core::probe::{ProbeConfig, ProbeSummary, Prober, TestResult};
pub use crate::core::session::{SessionId, SessionInfo, SessionRole, SessionState};
pub use crate::core::transport::{
    ConnectionHandle, ConnectorError, ConnectorErrorKind, ConnectorTable, Endpoint, OpenOptions,
    ProtocolKind,
};
pub use crate::error::{Error, Result};
pub use crate::storage::Store;
pub use crate::utils::autoconnect::{AutoConnect, AutoConnectConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
