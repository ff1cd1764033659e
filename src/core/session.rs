//! Session bookkeeping types
//!
//! A session is one open link (client), one listening socket (server) or
//! one connection accepted by a listener (child). The [`Monitor`] owns the
//! live sessions; this module only describes them.
//!
//! [`Monitor`]: crate::core::monitor::Monitor

use super::transport::ProtocolKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Which side opened the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionRole {
    /// We connected out
    Client,
    /// We are listening, or the connection was accepted by our listener
    Server,
}

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Not connected
    Disconnected,
    /// Bound and waiting for peers
    Listening,
    /// Connected and active
    Connected,
    /// Connection error occurred
    Error,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Listening => "listening",
            Self::Connected => "connected",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Snapshot of one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Session id
    pub id: SessionId,
    /// Protocol
    pub kind: ProtocolKind,
    /// Client or server side
    pub role: SessionRole,
    /// Local bind address, for listeners
    pub local: Option<String>,
    /// Remote address; for UDP listeners the last sender
    pub remote: Option<String>,
    /// Current state
    pub state: SessionState,
    /// Listener that accepted this session
    pub parent: Option<SessionId>,
    /// Device the session was opened for
    pub device_id: Option<String>,
    /// When the session was created
    pub opened_at: DateTime<Utc>,
}

impl SessionInfo {
    pub(crate) fn new(kind: ProtocolKind, role: SessionRole, state: SessionState) -> Self {
        Self {
            id: SessionId::new(),
            kind,
            role,
            local: None,
            remote: None,
            state,
            parent: None,
            device_id: None,
            opened_at: Utc::now(),
        }
    }

    /// Whether this session accepts peers
    pub fn is_listener(&self) -> bool {
        self.role == SessionRole::Server && self.parent.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_parse() {
        let id = SessionId::new();
        let parsed: SessionId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<SessionId>().is_err());
    }

    #[test]
    fn test_listener_flag() {
        let listener = SessionInfo::new(ProtocolKind::Tcp, SessionRole::Server, SessionState::Listening);
        assert!(listener.is_listener());

        let mut child = SessionInfo::new(ProtocolKind::Tcp, SessionRole::Server, SessionState::Connected);
        child.parent = Some(listener.id);
        assert!(!child.is_listener());

        let client = SessionInfo::new(ProtocolKind::Udp, SessionRole::Client, SessionState::Connected);
        assert!(!client.is_listener());
    }
}
