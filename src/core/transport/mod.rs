//! Connector layer for the supported wire protocols
//!
//! Supports:
//! - HTTP one-shot requests (with auto-bearer token handling)
//! - Raw TCP client connections
//! - UDP bind (receive) and send modes
//! - Serial ports (RS-232, USB-Serial)
//! - MQTT (reserved, no connector yet)
//!
//! Every protocol implements the same [`Connector`] contract and is looked up
//! through a [`ConnectorTable`] keyed by [`ProtocolKind`].

mod endpoint;
mod handle;
mod http;
mod mqtt;
mod serial;
mod tcp;
mod udp;

pub use endpoint::{Endpoint, SerialLine, SerialParity};
pub use handle::{ConnectionHandle, LinkStats};
pub use http::{HttpConnector, HttpMethod, HttpOptions};
pub use mqtt::MqttConnector;
pub use serial::{list_ports, PortInfo, SerialConnector};
pub use tcp::{TcpConnector, TcpLink};
pub use udp::{UdpConnector, MAX_DATAGRAM};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Wire-protocol family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    /// HTTP request/response
    Http,
    /// Raw TCP
    Tcp,
    /// UDP datagrams
    Udp,
    /// Serial port
    Serial,
    /// MQTT (reserved)
    Mqtt,
}

impl ProtocolKind {
    /// All protocol kinds
    pub const ALL: [ProtocolKind; 5] = [
        ProtocolKind::Http,
        ProtocolKind::Tcp,
        ProtocolKind::Udp,
        ProtocolKind::Serial,
        ProtocolKind::Mqtt,
    ];

    /// Lowercase identifier used in storage and interchange files
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Serial => "serial",
            Self::Mqtt => "mqtt",
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => write!(f, "HTTP"),
            Self::Tcp => write!(f, "TCP"),
            Self::Udp => write!(f, "UDP"),
            Self::Serial => write!(f, "Serial"),
            Self::Mqtt => write!(f, "MQTT"),
        }
    }
}

impl FromStr for ProtocolKind {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "http" | "https" => Ok(Self::Http),
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            "serial" | "uart" => Ok(Self::Serial),
            "mqtt" => Ok(Self::Mqtt),
            other => Err(ConnectorError::new(
                ConnectorErrorKind::NoConnector,
                format!("unknown protocol kind '{other}'"),
            )),
        }
    }
}

/// Category of a connector failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectorErrorKind {
    /// Could not connect or open the device
    Connection,
    /// Could not bind a local port
    Bind,
    /// Read/write failure, or I/O on a closed handle
    Io,
    /// A time bound elapsed
    Timeout,
    /// The handle was closed while an operation was pending
    Cancelled,
    /// No connector exists for the protocol kind
    NoConnector,
    /// The endpoint is empty
    EndpointEmpty,
    /// The endpoint does not match the protocol's addressing scheme
    InvalidEndpoint,
    /// Access to the device or port was denied
    PermissionDenied,
}

impl fmt::Display for ConnectorErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connection => "connection error",
            Self::Bind => "bind error",
            Self::Io => "I/O error",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::NoConnector => "no connector",
            Self::EndpointEmpty => "endpoint empty",
            Self::InvalidEndpoint => "invalid endpoint",
            Self::PermissionDenied => "permission denied",
        };
        f.write_str(s)
    }
}

/// Uniform connector error carrying kind, message and the low-level cause
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ConnectorError {
    /// Failure category
    pub kind: ConnectorErrorKind,
    /// Human-readable message
    pub message: String,
    /// Underlying error, if any
    #[source]
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ConnectorError {
    /// Create an error without a cause
    pub fn new(kind: ConnectorErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    /// Attach the low-level cause
    #[must_use]
    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Connection failure
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ConnectorErrorKind::Connection, message)
    }

    /// I/O failure
    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ConnectorErrorKind::Io, message)
    }

    /// Timeout after the given bound
    pub fn timeout(bound: Duration) -> Self {
        Self::new(
            ConnectorErrorKind::Timeout,
            format!("no data within {} ms", bound.as_millis()),
        )
    }

    /// Operation cancelled by close
    pub fn cancelled() -> Self {
        Self::new(ConnectorErrorKind::Cancelled, "handle closed")
    }

    /// No connector for the protocol kind
    pub fn no_connector(kind: ProtocolKind) -> Self {
        Self::new(
            ConnectorErrorKind::NoConnector,
            format!("no connector available for {kind}"),
        )
    }

    /// Endpoint empty
    pub fn endpoint_empty() -> Self {
        Self::new(ConnectorErrorKind::EndpointEmpty, "endpoint is empty")
    }

    /// Endpoint does not parse for the protocol
    pub fn invalid_endpoint(message: impl Into<String>) -> Self {
        Self::new(ConnectorErrorKind::InvalidEndpoint, message)
    }

    /// Map a connect/open I/O error onto a connector error kind
    pub fn from_open_io(target: &str, err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::PermissionDenied => ConnectorErrorKind::PermissionDenied,
            std::io::ErrorKind::TimedOut => ConnectorErrorKind::Timeout,
            _ => ConnectorErrorKind::Connection,
        };
        Self::new(kind, format!("failed to open {target}")).with_cause(err)
    }

    /// Map a bind I/O error
    pub fn from_bind_io(addr: &str, err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::PermissionDenied => ConnectorErrorKind::PermissionDenied,
            _ => ConnectorErrorKind::Bind,
        };
        Self::new(kind, format!("failed to bind {addr}")).with_cause(err)
    }

    /// Map a read/write I/O error
    pub fn from_io(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::TimedOut => ConnectorErrorKind::Timeout,
            _ => ConnectorErrorKind::Io,
        };
        Self::new(kind, err.to_string()).with_cause(err)
    }
}

/// Options applied when opening a link
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// Connect/open timeout
    pub connect_timeout: Duration,
    /// Append a trailing newline to every send (TCP, Serial)
    pub append_newline: bool,
    /// Serial line settings, overriding the endpoint's defaults
    pub serial: Option<SerialLine>,
    /// HTTP request template
    pub http: HttpOptions,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
            append_newline: false,
            serial: None,
            http: HttpOptions::default(),
        }
    }
}

impl OpenOptions {
    /// Set connect timeout
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Enable trailing-newline framing
    #[must_use]
    pub fn append_newline(mut self, enable: bool) -> Self {
        self.append_newline = enable;
        self
    }

    /// Set serial line settings
    #[must_use]
    pub fn serial(mut self, line: SerialLine) -> Self {
        self.serial = Some(line);
        self
    }

    /// Set HTTP request template
    #[must_use]
    pub fn http(mut self, http: HttpOptions) -> Self {
        self.http = http;
        self
    }
}

/// Result of a send
#[derive(Debug, Clone, Default)]
pub struct SendReport {
    /// Bytes written to the wire (request body for HTTP)
    pub written: usize,
    /// Immediate reply, for request/response protocols
    pub reply: Option<Bytes>,
    /// HTTP status code
    pub status: Option<u16>,
}

/// Data read from a link
#[derive(Debug, Clone)]
pub struct Inbound {
    /// Payload bytes, uninterpreted
    pub data: Bytes,
    /// Sender address when the protocol provides one
    pub peer: Option<String>,
}

/// An open link to a remote endpoint
///
/// `receive` must be cancel safe: dropping its future may not lose data that
/// was already read from the OS.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Link: Send {
    /// Write data to the link
    async fn send(&mut self, data: &[u8]) -> Result<SendReport, ConnectorError>;

    /// Wait for the next chunk of data
    async fn receive(&mut self) -> Result<Inbound, ConnectorError>;

    /// Release the underlying resource
    async fn close(&mut self);

    /// Remote address or device description
    fn remote(&self) -> String;
}

/// Per-protocol factory for links
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    /// Protocol handled by this connector
    fn kind(&self) -> ProtocolKind;

    /// Open a link to the endpoint
    async fn open(
        &self,
        endpoint: &Endpoint,
        options: &OpenOptions,
    ) -> Result<Box<dyn Link>, ConnectorError>;
}

/// Dispatch table from protocol kind to connector implementation
#[derive(Clone)]
pub struct ConnectorTable {
    connectors: HashMap<ProtocolKind, Arc<dyn Connector>>,
}

impl Default for ConnectorTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl fmt::Debug for ConnectorTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.connectors.keys().collect();
        kinds.sort();
        f.debug_struct("ConnectorTable").field("kinds", &kinds).finish()
    }
}

impl ConnectorTable {
    /// Empty table; every lookup fails with `NoConnector`
    pub fn empty() -> Self {
        Self {
            connectors: HashMap::new(),
        }
    }

    /// Table with the built-in connectors
    pub fn standard() -> Self {
        Self::empty()
            .with(Arc::new(HttpConnector::new()))
            .with(Arc::new(TcpConnector))
            .with(Arc::new(UdpConnector))
            .with(Arc::new(SerialConnector))
            .with(Arc::new(MqttConnector))
    }

    /// Register (or replace) the connector for its kind
    #[must_use]
    pub fn with(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connectors.insert(connector.kind(), connector);
        self
    }

    /// Look up the connector for a kind
    pub fn get(&self, kind: ProtocolKind) -> Result<Arc<dyn Connector>, ConnectorError> {
        self.connectors
            .get(&kind)
            .cloned()
            .ok_or_else(|| ConnectorError::no_connector(kind))
    }

    /// Parse an endpoint string and open a handle for it
    pub async fn open(
        &self,
        kind: ProtocolKind,
        endpoint: &str,
        options: &OpenOptions,
    ) -> Result<ConnectionHandle, ConnectorError> {
        let endpoint = Endpoint::parse(kind, endpoint)?;
        self.open_endpoint(&endpoint, options).await
    }

    /// Open a handle for an already parsed endpoint
    pub async fn open_endpoint(
        &self,
        endpoint: &Endpoint,
        options: &OpenOptions,
    ) -> Result<ConnectionHandle, ConnectorError> {
        let kind = endpoint.kind();
        let connector = self.get(kind)?;

        let link = tokio::time::timeout(options.connect_timeout, connector.open(endpoint, options))
            .await
            .map_err(|_| {
                ConnectorError::new(
                    ConnectorErrorKind::Timeout,
                    format!(
                        "open {} timed out after {} ms",
                        endpoint,
                        options.connect_timeout.as_millis()
                    ),
                )
            })??;

        tracing::debug!(%kind, remote = %link.remote(), "link opened");
        Ok(ConnectionHandle::new(kind, link))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_kind_parse() {
        assert_eq!("TCP".parse::<ProtocolKind>().unwrap(), ProtocolKind::Tcp);
        assert_eq!(" serial ".parse::<ProtocolKind>().unwrap(), ProtocolKind::Serial);
        assert_eq!("https".parse::<ProtocolKind>().unwrap(), ProtocolKind::Http);

        let err = "zigbee".parse::<ProtocolKind>().unwrap_err();
        assert_eq!(err.kind, ConnectorErrorKind::NoConnector);
    }

    #[test]
    fn test_protocol_kind_serde() {
        let json = serde_json::to_string(&ProtocolKind::Udp).unwrap();
        assert_eq!(json, "\"udp\"");
        let kind: ProtocolKind = serde_json::from_str("\"mqtt\"").unwrap();
        assert_eq!(kind, ProtocolKind::Mqtt);
    }

    #[test]
    fn test_open_io_mapping() {
        let err = ConnectorError::from_open_io(
            "/dev/ttyS9",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.kind, ConnectorErrorKind::PermissionDenied);
        assert!(std::error::Error::source(&err).is_some());

        let err = ConnectorError::from_bind_io(
            "0.0.0.0:80",
            std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        );
        assert_eq!(err.kind, ConnectorErrorKind::Bind);
    }

    #[tokio::test]
    async fn test_empty_table_has_no_connector() {
        let table = ConnectorTable::empty();
        let err = table
            .open(ProtocolKind::Tcp, "127.0.0.1:1", &OpenOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ConnectorErrorKind::NoConnector);
    }

    #[tokio::test]
    async fn test_mqtt_is_reserved() {
        let table = ConnectorTable::standard();
        let err = table
            .open(ProtocolKind::Mqtt, "broker.local:1883", &OpenOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ConnectorErrorKind::NoConnector);
    }

    #[tokio::test]
    async fn test_mock_connector_dispatch() {
        let mut connector = MockConnector::new();
        connector.expect_kind().return_const(ProtocolKind::Tcp);
        connector.expect_open().returning(|_, _| {
            let mut link = MockLink::new();
            link.expect_remote().return_const("mock:1".to_string());
            Ok(Box::new(link))
        });

        let table = ConnectorTable::empty().with(Arc::new(connector));
        let handle = table
            .open(ProtocolKind::Tcp, "mock:1", &OpenOptions::default())
            .await
            .unwrap();
        assert_eq!(handle.kind(), ProtocolKind::Tcp);
        assert_eq!(handle.remote(), "mock:1");
    }
}
