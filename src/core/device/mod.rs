//! Device inventory
//!
//! A [`Device`] is a named, addressable endpoint with ownership and hardware
//! metadata. Devices are persisted by the [`DeviceRegistry`] and exchanged as
//! CSV, NDJSON or SQLite files through the [`interchange`] module.

pub mod interchange;
mod registry;

pub use interchange::InterchangeFormat;
pub use registry::{ConflictPolicy, DeviceRegistry, ImportOptions, ImportReport, RecordError};

use crate::core::transport::{
    Endpoint, HttpOptions, OpenOptions, ProtocolKind, SerialLine, SerialParity,
};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Outcome of the latest reachability test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reachability {
    /// Never tested
    #[default]
    Untested,
    /// Last test succeeded
    Success,
    /// Last test failed
    Fail,
}

impl Reachability {
    /// Storage identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Untested => "untested",
            Self::Success => "success",
            Self::Fail => "fail",
        }
    }
}

impl fmt::Display for Reachability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Reachability {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "untested" => Ok(Self::Untested),
            "success" | "ok" => Ok(Self::Success),
            "fail" | "failed" => Ok(Self::Fail),
            other => Err(Error::validation(format!("unknown reachability '{other}'"))),
        }
    }
}

/// An addressable device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Unique identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Protocol-specific endpoint; may be empty
    #[serde(default)]
    pub endpoint: String,
    /// Protocol used to reach the device
    pub protocol_kind: ProtocolKind,
    /// Owner
    #[serde(default)]
    pub owner: String,
    /// Group
    #[serde(default)]
    pub group: String,
    /// Hardware description
    #[serde(default)]
    pub hw_info: String,
    /// Firmware version
    #[serde(default)]
    pub firmware: String,
    /// Auth user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_user: Option<String>,
    /// Auth password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_password: Option<String>,
    /// Auth token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    /// Free-form JSON object
    #[serde(default = "empty_object")]
    pub metadata_json: String,
    /// Last successful contact
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
    /// Latest test outcome
    #[serde(default)]
    pub reachability: Reachability,
}

fn empty_object() -> String {
    "{}".to_string()
}

impl Device {
    /// Create a device with the mandatory fields
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: ProtocolKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            endpoint: String::new(),
            protocol_kind: kind,
            owner: String::new(),
            group: String::new(),
            hw_info: String::new(),
            firmware: String::new(),
            auth_user: None,
            auth_password: None,
            auth_token: None,
            metadata_json: empty_object(),
            last_seen: None,
            reachability: Reachability::Untested,
        }
    }

    /// Set endpoint
    #[must_use]
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set owner and group
    #[must_use]
    pub fn owned_by(mut self, owner: impl Into<String>, group: impl Into<String>) -> Self {
        self.owner = owner.into();
        self.group = group.into();
        self
    }

    /// Set metadata object
    #[must_use]
    pub fn metadata(mut self, metadata: &Value) -> Self {
        self.metadata_json = metadata.to_string();
        self
    }

    /// Check mandatory fields, endpoint syntax and metadata
    ///
    /// # Errors
    ///
    /// `Validation` describing the first problem found
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::validation("device id must not be empty"));
        }
        if self.name.trim().is_empty() {
            return Err(Error::validation("device name must not be empty"));
        }
        if !self.endpoint.trim().is_empty() {
            Endpoint::parse(self.protocol_kind, &self.endpoint).map_err(|e| {
                Error::validation(format!(
                    "endpoint '{}' is not a valid {} address: {}",
                    self.endpoint, self.protocol_kind, e.message
                ))
            })?;
        }
        self.metadata_map()?;
        if self.protocol_kind == ProtocolKind::Serial {
            self.serial_line()?;
        }
        Ok(())
    }

    /// Whether the endpoint is empty
    pub fn has_endpoint(&self) -> bool {
        !self.endpoint.trim().is_empty()
    }

    /// Parsed metadata object
    ///
    /// # Errors
    ///
    /// `Validation` when the metadata is not a JSON object
    pub fn metadata_map(&self) -> Result<Map<String, Value>> {
        if self.metadata_json.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&self.metadata_json) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(Error::validation("metadataJson must be a JSON object")),
            Err(e) => Err(Error::validation(format!("metadataJson is not valid JSON: {e}"))),
        }
    }

    /// Serial line settings, from the endpoint baud and the metadata keys
    /// `baud`, `dataBits`, `parity` and `stopBits`
    ///
    /// # Errors
    ///
    /// `Validation` for out-of-range settings
    pub fn serial_line(&self) -> Result<SerialLine> {
        let mut line = match Endpoint::parse(ProtocolKind::Serial, &self.endpoint) {
            Ok(Endpoint::Serial { line, .. }) => line,
            _ => SerialLine::default(),
        };
        let meta = self.metadata_map()?;

        if let Some(baud) = meta_u64(&meta, "baud") {
            line.baud = u32::try_from(baud).map_err(|_| Error::validation("baud out of range"))?;
        }
        if let Some(bits) = meta_u64(&meta, "dataBits") {
            line.data_bits = u8::try_from(bits).unwrap_or(u8::MAX);
        }
        if let Some(bits) = meta_u64(&meta, "stopBits") {
            line.stop_bits = u8::try_from(bits).unwrap_or(u8::MAX);
        }
        if let Some(parity) = meta.get("parity").and_then(Value::as_str) {
            line.parity = parity
                .parse::<SerialParity>()
                .map_err(|e| Error::Validation(e.message))?;
        }
        line.validate().map_err(Error::Validation)?;
        Ok(line)
    }

    /// Open options carrying this device's credentials and line settings
    ///
    /// # Errors
    ///
    /// `Validation` for bad serial settings
    pub fn open_options(&self) -> Result<OpenOptions> {
        let mut options = OpenOptions::default();
        match self.protocol_kind {
            ProtocolKind::Serial => options = options.serial(self.serial_line()?),
            ProtocolKind::Http => {
                let mut http = HttpOptions::default();
                if let Some(token) = self.auth_token.as_deref().filter(|t| !t.trim().is_empty()) {
                    http = http.token(token, true);
                } else if let Some(user) = self.auth_user.as_deref().filter(|u| !u.is_empty()) {
                    http = http.basic_auth(user, self.auth_password.clone().unwrap_or_default());
                }
                options = options.http(http);
            }
            _ => {}
        }
        Ok(options)
    }
}

fn meta_u64(meta: &Map<String, Value>, key: &str) -> Option<u64> {
    match meta.get(key)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
