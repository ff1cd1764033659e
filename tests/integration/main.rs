//! End-to-end tests over a real database file and loopback sockets

mod actions;
mod devices;
mod sessions;

use crosscontrol_core::{ConnectorTable, Gateway, MonitorConfig, ProbeConfig, Store};
use std::path::Path;
use std::time::Duration;

/// Gateway over a file-backed store in `dir`, with short timeouts
pub fn gateway_in(dir: &Path) -> Gateway {
    let store = Store::open(dir.join("crosscontrol.db")).unwrap();
    Gateway::new(
        store,
        ConnectorTable::standard(),
        MonitorConfig {
            poll_interval: Duration::from_millis(20),
            connect_timeout: Duration::from_secs(1),
            ..MonitorConfig::default()
        },
        ProbeConfig {
            timeout: Duration::from_millis(500),
            ..ProbeConfig::default()
        },
    )
    .reply_timeout(Duration::from_millis(200))
}
