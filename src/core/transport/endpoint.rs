//! Endpoint addressing for each protocol kind

use super::{ConnectorError, ProtocolKind};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Serial port parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialParity {
    /// No parity
    #[default]
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

impl std::str::FromStr for SerialParity {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" | "n" | "" => Ok(Self::None),
            "odd" | "o" => Ok(Self::Odd),
            "even" | "e" => Ok(Self::Even),
            other => Err(ConnectorError::invalid_endpoint(format!(
                "unknown parity '{other}'"
            ))),
        }
    }
}

/// Serial line settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialLine {
    /// Baud rate
    pub baud: u32,
    /// Data bits (5, 6, 7, 8)
    pub data_bits: u8,
    /// Parity
    pub parity: SerialParity,
    /// Stop bits (1, 2)
    pub stop_bits: u8,
}

impl Default for SerialLine {
    fn default() -> Self {
        Self {
            baud: 115_200,
            data_bits: 8,
            parity: SerialParity::None,
            stop_bits: 1,
        }
    }
}

impl SerialLine {
    /// Check value ranges
    pub fn validate(&self) -> Result<(), String> {
        if self.baud == 0 {
            return Err("baud rate must be positive".to_string());
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(format!("data bits must be 5-8, got {}", self.data_bits));
        }
        if !matches!(self.stop_bits, 1 | 2) {
            return Err(format!("stop bits must be 1 or 2, got {}", self.stop_bits));
        }
        Ok(())
    }
}

impl fmt::Display for SerialLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parity = match self.parity {
            SerialParity::None => "N",
            SerialParity::Odd => "O",
            SerialParity::Even => "E",
        };
        write!(f, "{} baud {}{}{}", self.baud, self.data_bits, parity, self.stop_bits)
    }
}

/// A parsed, protocol-specific endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `scheme://host[:port]/path`
    Http {
        /// Full request URL
        url: String,
    },
    /// `host:port`; an empty, `*` or `0.0.0.0` host means bind locally
    Socket {
        /// TCP or UDP
        kind: ProtocolKind,
        /// Host name or address
        host: String,
        /// Port number
        port: u16,
    },
    /// Platform device path plus line settings
    Serial {
        /// Device path (`COM3`, `/dev/ttyUSB0`)
        path: String,
        /// Line settings
        line: SerialLine,
    },
    /// `host:port` or `mqtt://host:port`
    Mqtt {
        /// Broker address
        address: String,
    },
}

fn host_port_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<host>\[[0-9A-Fa-f:.]+\]|[A-Za-z0-9_.\-*]*):(?P<port>\d{1,5})(?:/.*)?$")
            .expect("static regex")
    })
}

impl Endpoint {
    /// Parse an endpoint string according to the protocol's addressing scheme
    pub fn parse(kind: ProtocolKind, text: &str) -> Result<Self, ConnectorError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ConnectorError::endpoint_empty());
        }

        match kind {
            ProtocolKind::Http => {
                let url = reqwest::Url::parse(text).map_err(|e| {
                    ConnectorError::invalid_endpoint(format!("invalid URL '{text}'")).with_cause(e)
                })?;
                if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
                    return Err(ConnectorError::invalid_endpoint(format!(
                        "expected http(s)://host[:port]/path, got '{text}'"
                    )));
                }
                Ok(Self::Http {
                    url: text.to_string(),
                })
            }
            ProtocolKind::Tcp | ProtocolKind::Udp => {
                let (host, port) = parse_host_port(kind, text)?;
                Ok(Self::Socket { kind, host, port })
            }
            ProtocolKind::Serial => {
                let text = text.strip_prefix("serial://").unwrap_or(text);
                let mut line = SerialLine::default();
                let path = match text.rsplit_once(':') {
                    Some((path, baud))
                        if !path.is_empty()
                            && !baud.is_empty()
                            && baud.chars().all(|c| c.is_ascii_digit()) =>
                    {
                        line.baud = baud.parse().map_err(|_| {
                            ConnectorError::invalid_endpoint(format!("invalid baud rate '{baud}'"))
                        })?;
                        path
                    }
                    _ => text,
                };
                if path.contains("://") || path.chars().any(char::is_whitespace) {
                    return Err(ConnectorError::invalid_endpoint(format!(
                        "'{text}' is not a serial device path"
                    )));
                }
                Ok(Self::Serial {
                    path: path.to_string(),
                    line,
                })
            }
            ProtocolKind::Mqtt => {
                let address = text.strip_prefix("mqtt://").unwrap_or(text);
                parse_host_port(kind, address)?;
                Ok(Self::Mqtt {
                    address: address.to_string(),
                })
            }
        }
    }

    /// Protocol this endpoint addresses
    pub fn kind(&self) -> ProtocolKind {
        match self {
            Self::Http { .. } => ProtocolKind::Http,
            Self::Socket { kind, .. } => *kind,
            Self::Serial { .. } => ProtocolKind::Serial,
            Self::Mqtt { .. } => ProtocolKind::Mqtt,
        }
    }

    /// Whether a socket endpoint asks for a local bind
    pub fn is_bind(&self) -> bool {
        match self {
            Self::Socket { host, .. } => {
                host.is_empty() || host == "*" || host == "0.0.0.0" || host == "[::]"
            }
            _ => false,
        }
    }

    /// Replace serial line settings
    #[must_use]
    pub fn with_serial_line(self, line: SerialLine) -> Self {
        match self {
            Self::Serial { path, .. } => Self::Serial { path, line },
            other => other,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http { url } => write!(f, "{url}"),
            Self::Socket { host, port, .. } => write!(f, "{host}:{port}"),
            Self::Serial { path, line } => write!(f, "{path} @ {line}"),
            Self::Mqtt { address } => write!(f, "mqtt://{address}"),
        }
    }
}

fn parse_host_port(kind: ProtocolKind, text: &str) -> Result<(String, u16), ConnectorError> {
    let prefix = format!("{}://", kind.as_str());
    let text = text.strip_prefix(prefix.as_str()).unwrap_or(text);

    let caps = host_port_re().captures(text).ok_or_else(|| {
        ConnectorError::invalid_endpoint(format!("expected host:port, got '{text}'"))
    })?;

    let host = caps["host"].trim_start_matches('[').trim_end_matches(']').to_string();
    let port: u16 = caps["port"]
        .parse()
        .map_err(|_| ConnectorError::invalid_endpoint(format!("port out of range in '{text}'")))?;
    if port == 0 {
        return Err(ConnectorError::invalid_endpoint(format!(
            "port must be non-zero in '{text}'"
        )));
    }
    Ok((host, port))
}
