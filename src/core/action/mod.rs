//! Reusable, named request templates
//!
//! An [`Action`] stores a protocol-specific JSON payload under a name that is
//! unique within its protocol kind. Payloads are kept verbatim (unknown fields
//! included) and validated through the typed views in this module.

mod migration;
mod store;

pub use migration::{MigrationChain, MigrationReport, MigrationStep};
pub use store::ActionStore;

use crate::core::transport::{
    Endpoint, HttpMethod, HttpOptions, OpenOptions, ProtocolKind, SerialLine, SerialParity,
};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Current payload schema version
pub const ACTION_SCHEMA_VERSION: u32 = 2;

/// A stored action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    /// Unique identifier
    pub id: String,
    /// Display name, unique per protocol kind
    pub name: String,
    /// Protocol the payload targets
    pub protocol_kind: ProtocolKind,
    /// Protocol-specific payload
    pub payload: Value,
    /// Payload schema version
    pub schema_version: u32,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last rename or payload update
    pub updated_at: Option<DateTime<Utc>>,
}

/// Portable action file contents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRecord {
    /// Action name
    pub name: String,
    /// Protocol kind
    pub protocol_kind: ProtocolKind,
    /// Payload
    pub payload: Value,
    /// Payload schema version
    #[serde(default = "legacy_version")]
    pub schema_version: u32,
}

fn legacy_version() -> u32 {
    1
}

/// Message body shared by the socket and serial payloads
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Body {
    /// No body
    #[default]
    Empty,
    /// Text (or hex text)
    Text(String),
    /// Structured JSON, sent serialized
    Json(Value),
}

impl Body {
    /// Encode the body for the wire
    pub fn to_bytes(&self, hex_encoded: bool) -> Result<Vec<u8>> {
        match self {
            Self::Empty => Ok(Vec::new()),
            Self::Text(text) if hex_encoded => {
                let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
                hex::decode(compact).map_err(|e| Error::validation(format!("invalid hex body: {e}")))
            }
            Self::Text(text) => Ok(text.as_bytes().to_vec()),
            Self::Json(Value::Null) => Ok(Vec::new()),
            Self::Json(value) => Ok(serde_json::to_vec(value)?),
        }
    }
}

/// Typed view of an HTTP payload
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HttpPayload {
    /// Request method, GET when absent
    pub method: Option<String>,
    /// Request URL
    pub url: String,
    /// Extra headers
    pub headers: BTreeMap<String, String>,
    /// Request body
    pub body: Body,
    /// Authorization token
    pub token: Option<String>,
    /// Add the `Bearer ` prefix
    pub auto_bearer: bool,
    /// Explicit content type
    pub content_type: Option<String>,
    /// Force JSON content type
    pub send_as_json: bool,
}

impl HttpPayload {
    /// Parsed method
    pub fn method(&self) -> Result<HttpMethod> {
        match self.method.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
            Some(m) => m.parse().map_err(Error::Validation),
            None => Ok(HttpMethod::Get),
        }
    }

    /// Request template for the HTTP connector
    pub fn options(&self) -> Result<HttpOptions> {
        Ok(HttpOptions {
            method: self.method()?,
            headers: self.headers.clone(),
            token: self.token.clone(),
            auto_bearer: self.auto_bearer,
            content_type: self.content_type.clone(),
            send_as_json: self.send_as_json,
            basic_auth: None,
        })
    }
}

/// Typed view of a TCP or UDP payload
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SocketPayload {
    /// Remote host
    pub host: String,
    /// Remote port
    pub port: u32,
    /// Message body
    pub body: Body,
    /// Body is hex encoded
    pub hex: bool,
    /// Append a trailing newline
    pub append_newline: bool,
}

/// Typed view of a serial payload
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SerialPayload {
    /// Device path; may be empty until bound to a port
    pub port: String,
    /// Baud rate
    pub baud: Option<u32>,
    /// Data bits
    pub data_bits: Option<u8>,
    /// Parity name
    pub parity: Option<String>,
    /// Stop bits
    pub stop_bits: Option<u8>,
    /// Message body
    pub body: Body,
    /// Body is hex encoded
    pub hex: bool,
    /// Append a trailing newline
    pub append_newline: bool,
}

impl SerialPayload {
    /// Line settings with defaults filled in
    pub fn line(&self) -> Result<SerialLine> {
        let defaults = SerialLine::default();
        let parity = match self.parity.as_deref() {
            Some(p) => p
                .parse::<SerialParity>()
                .map_err(|e| Error::Validation(e.message))?,
            None => defaults.parity,
        };
        let line = SerialLine {
            baud: self.baud.unwrap_or(defaults.baud),
            data_bits: self.data_bits.unwrap_or(defaults.data_bits),
            parity,
            stop_bits: self.stop_bits.unwrap_or(defaults.stop_bits),
        };
        line.validate().map_err(Error::Validation)?;
        Ok(line)
    }
}

fn typed<T: serde::de::DeserializeOwned>(kind: ProtocolKind, payload: &Value) -> Result<T> {
    serde_json::from_value(payload.clone())
        .map_err(|e| Error::validation(format!("invalid {kind} payload: {e}")))
}

/// Check a payload against its protocol's schema
///
/// # Errors
///
/// Returns `Validation` describing the first problem found
pub fn validate_payload(kind: ProtocolKind, payload: &Value) -> Result<()> {
    if !payload.is_object() {
        return Err(Error::validation(format!(
            "{kind} payload must be a JSON object"
        )));
    }

    match kind {
        ProtocolKind::Http => {
            let http: HttpPayload = typed(kind, payload)?;
            http.method()?;
            if http.url.trim().is_empty() {
                return Err(Error::validation("HTTP payload requires a url"));
            }
            Endpoint::parse(ProtocolKind::Http, &http.url)
                .map_err(|e| Error::Validation(e.message))?;
        }
        ProtocolKind::Tcp | ProtocolKind::Udp => {
            let socket: SocketPayload = typed(kind, payload)?;
            if socket.host.trim().is_empty() {
                return Err(Error::validation(format!("{kind} payload requires a host")));
            }
            if !(1..=65_535).contains(&socket.port) {
                return Err(Error::validation(format!(
                    "{kind} port must be 1-65535, got {}",
                    socket.port
                )));
            }
            socket.body.to_bytes(socket.hex)?;
        }
        ProtocolKind::Serial => {
            let serial: SerialPayload = typed(kind, payload)?;
            serial.line()?;
            serial.body.to_bytes(serial.hex)?;
        }
        ProtocolKind::Mqtt => {}
    }
    Ok(())
}

/// A one-shot exchange derived from an action payload
#[derive(Debug, Clone)]
pub struct ActionRequest {
    /// Protocol kind
    pub kind: ProtocolKind,
    /// Endpoint text for the connector table
    pub endpoint: String,
    /// Open options
    pub options: OpenOptions,
    /// Bytes to send
    pub body: Vec<u8>,
}

impl ActionRequest {
    /// Build the request for a validated payload
    ///
    /// # Errors
    ///
    /// Returns `Validation` for malformed payloads
    pub fn from_payload(kind: ProtocolKind, payload: &Value) -> Result<Self> {
        validate_payload(kind, payload)?;

        let request = match kind {
            ProtocolKind::Http => {
                let http: HttpPayload = typed(kind, payload)?;
                Self {
                    kind,
                    endpoint: http.url.clone(),
                    options: OpenOptions::default().http(http.options()?),
                    body: http.body.to_bytes(false)?,
                }
            }
            ProtocolKind::Tcp | ProtocolKind::Udp => {
                let socket: SocketPayload = typed(kind, payload)?;
                Self {
                    kind,
                    endpoint: format!("{}:{}", socket.host.trim(), socket.port),
                    options: OpenOptions::default().append_newline(socket.append_newline),
                    body: socket.body.to_bytes(socket.hex)?,
                }
            }
            ProtocolKind::Serial => {
                let serial: SerialPayload = typed(kind, payload)?;
                Self {
                    kind,
                    endpoint: serial.port.trim().to_string(),
                    options: OpenOptions::default()
                        .append_newline(serial.append_newline)
                        .serial(serial.line()?),
                    body: serial.body.to_bytes(serial.hex)?,
                }
            }
            ProtocolKind::Mqtt => Self {
                kind,
                endpoint: payload
                    .get("broker")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                options: OpenOptions::default(),
                body: Vec::new(),
            },
        };
        Ok(request)
    }
}

/// Validate and normalise an action name
pub(crate) fn clean_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::validation("action name must not be empty"));
    }
    Ok(name.to_string())
}
