//! Core module containing the main functionality of CrossControl
//!
//! This module provides:
//! - Connector layer for HTTP, TCP, UDP and serial links (MQTT reserved)
//! - Action store for reusable request templates
//! - Device registry with CSV, NDJSON and SQLite interchange
//! - Monitor for listeners and live sessions
//! - Reachability prober
//! - Gateway facade tying them together

pub mod action;
pub mod device;
pub mod gateway;
pub mod monitor;
pub mod probe;
pub mod session;
pub mod transport;
