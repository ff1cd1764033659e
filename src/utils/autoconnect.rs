//! Best-effort auto-connect for imported devices
//!
//! Opens a monitor session for every device that has an endpoint, retrying
//! a bounded number of times. Failures are collected per device and never
//! stop the batch.

use crate::core::device::{Device, DeviceRegistry, ImportReport, RecordError};
use crate::core::monitor::Monitor;
use crate::core::session::SessionId;
use crate::Result;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Auto-connect configuration
#[derive(Debug, Clone)]
pub struct AutoConnectConfig {
    /// Delay between attempts
    pub delay: Duration,
    /// Attempts per device, at least one
    pub max_attempts: u32,
}

impl Default for AutoConnectConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(500),
            max_attempts: 1,
        }
    }
}

/// Auto-connect events
#[derive(Debug, Clone, PartialEq)]
pub enum AutoConnectEvent {
    /// Attempting to connect
    Connecting {
        /// Device
        device_id: String,
        /// 1-based attempt
        attempt: u32,
        /// Attempt limit
        max: u32,
    },
    /// Session opened
    Connected {
        /// Device
        device_id: String,
        /// New session
        session: SessionId,
    },
    /// One attempt failed
    Failed {
        /// Device
        device_id: String,
        /// Error text
        error: String,
    },
    /// Max attempts reached, giving up
    GaveUp {
        /// Device
        device_id: String,
    },
}

/// Auto-connect driver over a monitor
pub struct AutoConnect {
    config: AutoConnectConfig,
    monitor: Monitor,
    event_tx: Option<mpsc::Sender<AutoConnectEvent>>,
}

impl AutoConnect {
    /// Create a new auto-connect driver
    pub fn new(config: AutoConnectConfig, monitor: Monitor) -> Self {
        Self {
            config,
            monitor,
            event_tx: None,
        }
    }

    /// Report progress on `event_tx`
    #[must_use]
    pub fn with_events(mut self, event_tx: mpsc::Sender<AutoConnectEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    async fn notify(&self, event: AutoConnectEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event).await;
        }
    }

    /// Connect one device, retrying up to the configured limit
    ///
    /// # Errors
    ///
    /// The error of the last attempt
    pub async fn connect(&self, device: &Device) -> Result<SessionId> {
        let max = self.config.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.notify(AutoConnectEvent::Connecting {
                device_id: device.id.clone(),
                attempt,
                max,
            })
            .await;

            match self.monitor.open_for_device(device).await {
                Ok(session) => {
                    info!(device_id = %device.id, %session, attempt, "auto-connect succeeded");
                    self.notify(AutoConnectEvent::Connected {
                        device_id: device.id.clone(),
                        session,
                    })
                    .await;
                    return Ok(session);
                }
                Err(e) => {
                    warn!(device_id = %device.id, attempt, error = %e, "auto-connect attempt failed");
                    self.notify(AutoConnectEvent::Failed {
                        device_id: device.id.clone(),
                        error: e.to_string(),
                    })
                    .await;
                    if attempt >= max {
                        self.notify(AutoConnectEvent::GaveUp {
                            device_id: device.id.clone(),
                        })
                        .await;
                        return Err(e);
                    }
                }
            }
            tokio::time::sleep(self.config.delay).await;
        }
    }

    /// Connect every device imported in `report` that has an endpoint,
    /// appending failures to `report.connect_errors`
    ///
    /// Returns the sessions opened.
    pub async fn connect_imported(
        &self,
        registry: &DeviceRegistry,
        report: &mut ImportReport,
    ) -> Vec<SessionId> {
        let mut sessions = Vec::new();
        for (index, id) in report.imported_ids.iter().enumerate() {
            let device = match registry.get(id) {
                Ok(device) => device,
                Err(e) => {
                    report.connect_errors.push(RecordError {
                        record: index + 1,
                        device_id: Some(id.clone()),
                        message: e.detail(),
                    });
                    continue;
                }
            };
            if !device.has_endpoint() {
                continue;
            }
            match self.connect(&device).await {
                Ok(session) => sessions.push(session),
                Err(e) => report.connect_errors.push(RecordError {
                    record: index + 1,
                    device_id: Some(device.id.clone()),
                    message: e.detail(),
                }),
            }
        }
        info!(
            opened = sessions.len(),
            failed = report.connect_errors.len(),
            "auto-connect finished"
        );
        sessions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::monitor::MonitorConfig;
    use crate::core::transport::{ConnectorTable, ProtocolKind};

    fn driver(max_attempts: u32) -> AutoConnect {
        let monitor = Monitor::new(ConnectorTable::standard(), MonitorConfig::default());
        AutoConnect::new(
            AutoConnectConfig {
                delay: Duration::from_millis(1),
                max_attempts,
            },
            monitor,
        )
    }

    #[tokio::test]
    async fn test_retries_then_gives_up() {
        let (tx, mut rx) = mpsc::channel(16);
        let auto = driver(2).with_events(tx);
        let device = Device::new("m1", "Broker", ProtocolKind::Mqtt).endpoint("broker.local:1883");

        assert!(auto.connect(&device).await.is_err());
        drop(auto);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        let attempts = events
            .iter()
            .filter(|e| matches!(e, AutoConnectEvent::Connecting { .. }))
            .count();
        assert_eq!(attempts, 2);
        assert_eq!(
            events.last(),
            Some(&AutoConnectEvent::GaveUp {
                device_id: "m1".into()
            })
        );
    }

    #[tokio::test]
    async fn test_connect_imported_skips_empty_endpoints() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let registry = DeviceRegistry::new(crate::storage::Store::open_memory().unwrap());
        registry
            .add(&Device::new("up", "Up", ProtocolKind::Tcp).endpoint(addr.to_string()))
            .unwrap();
        registry.add(&Device::new("blank", "Blank", ProtocolKind::Tcp)).unwrap();
        registry
            .add(&Device::new("mq", "Broker", ProtocolKind::Mqtt).endpoint("broker.local:1883"))
            .unwrap();

        let mut report = ImportReport {
            imported_ids: vec!["up".into(), "blank".into(), "mq".into()],
            imported_count: 3,
            ..ImportReport::default()
        };
        let auto = driver(1);
        let sessions = auto.connect_imported(&registry, &mut report).await;

        assert_eq!(sessions.len(), 1);
        assert_eq!(report.connect_errors.len(), 1);
        assert_eq!(report.connect_errors[0].device_id.as_deref(), Some("mq"));
        assert_eq!(report.connect_errors[0].record, 3);
    }
}
