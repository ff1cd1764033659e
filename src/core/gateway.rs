//! Programmatic facade over the registry, action store, monitor and prober
//!
//! This is the surface a control-plane server drives: device lookup, sends,
//! reachability tests and one-shot action execution.

use super::action::{ActionRequest, ActionStore};
use super::device::{Device, DeviceRegistry, ImportOptions, ImportReport, InterchangeFormat};
use super::monitor::{Monitor, MonitorConfig, SendTarget};
use super::probe::{ProbeConfig, ProbeSummary, Prober, TestResult};
use super::transport::{ConnectorError, ConnectorErrorKind, ConnectorTable, ProtocolKind, SendReport};
use crate::config::AppConfig;
use crate::storage::Store;
use crate::utils::autoconnect::{AutoConnect, AutoConnectConfig};
use crate::{Error, Result};
use std::path::Path;
use std::time::Duration;

/// Device gateway
#[derive(Debug, Clone)]
pub struct Gateway {
    devices: DeviceRegistry,
    actions: ActionStore,
    monitor: Monitor,
    prober: Prober,
    reply_timeout: Duration,
    autoconnect: AutoConnectConfig,
}

impl Gateway {
    /// Assemble a gateway over one store and connector table
    pub fn new(
        store: Store,
        table: ConnectorTable,
        monitor: MonitorConfig,
        probe: ProbeConfig,
    ) -> Self {
        Self {
            devices: DeviceRegistry::new(store.clone()),
            actions: ActionStore::new(store),
            monitor: Monitor::new(table.clone(), monitor),
            prober: Prober::new(table, probe),
            reply_timeout: Duration::from_secs(1),
            autoconnect: AutoConnectConfig::default(),
        }
    }

    /// Build from application config, opening the configured database
    ///
    /// # Errors
    ///
    /// `Config` without a database path, storage errors when it cannot be
    /// opened
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let store = Store::open(config.db_path()?)?;
        let mut gateway = Self::new(
            store,
            ConnectorTable::standard(),
            MonitorConfig::from(config),
            ProbeConfig::from(&config.probe),
        );
        gateway.reply_timeout = config.connector.reply_timeout();
        gateway.autoconnect = AutoConnectConfig::from(&config.autoconnect);
        Ok(gateway)
    }

    /// How long `execute_action` waits for a reply on stream protocols;
    /// zero disables the wait
    #[must_use]
    pub fn reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Device registry
    pub fn devices(&self) -> &DeviceRegistry {
        &self.devices
    }

    /// Action store
    pub fn actions(&self) -> &ActionStore {
        &self.actions
    }

    /// Session monitor
    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    /// Reachability prober
    pub fn prober(&self) -> &Prober {
        &self.prober
    }

    /// All devices
    ///
    /// # Errors
    ///
    /// Storage errors
    pub fn list_devices(&self) -> Result<Vec<Device>> {
        self.devices.list()
    }

    /// One device
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown ids
    pub fn get_device(&self, id: &str) -> Result<Device> {
        self.devices.get(id)
    }

    /// Send bytes to a device over its open session, opening one first when
    /// needed
    ///
    /// # Errors
    ///
    /// `NotFound`, `EndpointEmpty` or the connector error of the open/send
    pub async fn send_to_device(&self, id: &str, data: &[u8]) -> Result<usize> {
        let device = self.devices.get(id)?;
        let existing = self.monitor.sessions_for_device(id).into_iter().next();
        let session = match existing {
            Some(session) => session,
            None => self.monitor.open_for_device(&device).await?,
        };
        self.monitor.send_to(&SendTarget::Session(session), data).await
    }

    /// Test one device and record the outcome
    ///
    /// # Errors
    ///
    /// `NotFound`, or storage errors while recording
    pub async fn test_device(&self, id: &str) -> Result<TestResult> {
        let device = self.devices.get(id)?;
        let result = self.prober.test_one(&device).await;
        self.devices.record_test(&result)?;
        Ok(result)
    }

    /// Test every device and record each outcome
    ///
    /// # Errors
    ///
    /// Storage errors while listing; recording failures are only logged
    pub async fn test_all_devices(&self) -> Result<ProbeSummary> {
        let devices = self.devices.list()?;
        let summary = self.prober.test_all(&devices).await;
        for result in &summary.results {
            if let Err(e) = self.devices.record_test(result) {
                tracing::warn!(device_id = %result.device_id, error = %e, "test result not recorded");
            }
        }
        Ok(summary)
    }

    /// Close a device's sessions and delete it
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown ids
    pub async fn remove_device(&self, id: &str) -> Result<()> {
        self.devices.get(id)?;
        for session in self.monitor.sessions_for_device(id) {
            match self.monitor.close(session).await {
                Ok(()) | Err(Error::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        self.devices.delete(id)
    }

    /// Run a stored action as a one-shot exchange and return the reply
    ///
    /// # Errors
    ///
    /// `NotFound`, `Validation` for a malformed payload, connector errors
    pub async fn execute_action(&self, id: &str) -> Result<SendReport> {
        let action = self.actions.get(id)?;
        let request = ActionRequest::from_payload(action.protocol_kind, &action.payload)?;
        tracing::info!(action = %action.name, kind = %request.kind, endpoint = %request.endpoint, "executing action");

        if request.kind == ProtocolKind::Http {
            return self
                .monitor
                .http_once(&request.endpoint, request.options.http, &request.body)
                .await;
        }

        let options = request
            .options
            .connect_timeout(self.monitor.config().connect_timeout);
        let handle = self
            .monitor
            .table()
            .open(request.kind, &request.endpoint, &options)
            .await?;

        let outcome = async {
            let mut report = handle.send(&request.body).await?;
            if report.reply.is_none() && !self.reply_timeout.is_zero() {
                match handle.receive(self.reply_timeout).await {
                    Ok(inbound) => report.reply = Some(inbound.data),
                    Err(e) if e.kind == ConnectorErrorKind::Timeout => {}
                    Err(e) => return Err(e),
                }
            }
            Ok::<_, ConnectorError>(report)
        }
        .await;
        handle.close().await;
        Ok(outcome?)
    }

    /// Import devices, then auto-connect them when asked
    ///
    /// # Errors
    ///
    /// As [`DeviceRegistry::import`]; connect failures land in the report
    pub async fn import_devices(
        &self,
        source: &Path,
        format: InterchangeFormat,
        options: &ImportOptions,
    ) -> Result<ImportReport> {
        let mut report = self.devices.import(source, format, options)?;
        if options.auto_connect {
            AutoConnect::new(self.autoconnect.clone(), self.monitor.clone())
                .connect_imported(&self.devices, &mut report)
                .await;
        }
        Ok(report)
    }

    /// Close every session
    pub async fn shutdown(&self) {
        self.monitor.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::device::Reachability;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn gateway() -> Gateway {
        Gateway::new(
            Store::open_memory().unwrap(),
            ConnectorTable::standard(),
            MonitorConfig {
                poll_interval: Duration::from_millis(20),
                ..MonitorConfig::default()
            },
            ProbeConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_execute_tcp_action_collects_reply() {
        let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = server.accept().await.unwrap();
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"PING");
            stream.write_all(b"PONG").await.unwrap();
        });

        let gw = gateway();
        let id = gw
            .actions()
            .save(
                "ping",
                ProtocolKind::Tcp,
                &json!({"host": "127.0.0.1", "port": port, "body": "PING"}),
            )
            .unwrap();

        let report = gw.execute_action(&id).await.unwrap();
        assert_eq!(report.written, 4);
        assert_eq!(report.reply.as_deref(), Some(&b"PONG"[..]));
    }

    #[tokio::test]
    async fn test_execute_without_reply_times_out_quietly() {
        let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = server.accept().await.unwrap();
            let mut sink = Vec::new();
            let _ = stream.read_to_end(&mut sink).await;
        });

        let gw = gateway().reply_timeout(Duration::from_millis(50));
        let id = gw
            .actions()
            .save("fire", ProtocolKind::Tcp, &json!({"host": "127.0.0.1", "port": port, "body": "X"}))
            .unwrap();
        let report = gw.execute_action(&id).await.unwrap();
        assert!(report.reply.is_none());
    }

    #[tokio::test]
    async fn test_test_device_records_outcome() {
        let gw = gateway();
        gw.devices().add(&Device::new("d1", "Blank", ProtocolKind::Tcp)).unwrap();

        let result = gw.test_device("d1").await.unwrap();
        assert_eq!(result.error_kind(), Some(ConnectorErrorKind::EndpointEmpty));
        assert_eq!(gw.get_device("d1").unwrap().reachability, Reachability::Fail);

        assert!(matches!(gw.test_device("nope").await, Err(Error::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_send_reuses_session_and_remove_closes_it() {
        let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = server.accept().await.unwrap();
            let mut sink = Vec::new();
            let _ = stream.read_to_end(&mut sink).await;
        });

        let gw = gateway();
        gw.devices()
            .add(&Device::new("d1", "Lamp", ProtocolKind::Tcp).endpoint(addr.to_string()))
            .unwrap();

        assert_eq!(gw.send_to_device("d1", b"on").await.unwrap(), 2);
        assert_eq!(gw.send_to_device("d1", b"off").await.unwrap(), 3);
        assert_eq!(gw.monitor().sessions_for_device("d1").len(), 1);

        gw.remove_device("d1").await.unwrap();
        assert!(gw.monitor().sessions().is_empty());
        assert!(matches!(gw.get_device("d1"), Err(Error::NotFound { .. })));
    }
}
