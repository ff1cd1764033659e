//! Error types for CrossControl

use crate::core::transport::{ConnectorError, ConnectorErrorKind, ProtocolKind};
use thiserror::Error;

/// Result type alias for CrossControl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in CrossControl
#[derive(Debug, Error)]
pub enum Error {
    /// Connector failure (open/send/receive)
    #[error(transparent)]
    Connector(#[from] ConnectorError),

    /// Input failed validation
    #[error("validation error: {0}")]
    Validation(String),

    /// An action with this name already exists for the protocol kind
    #[error("an action named '{name}' already exists for {kind}")]
    DuplicateName {
        /// Protocol kind
        kind: ProtocolKind,
        /// Conflicting name
        name: String,
    },

    /// A device with this id already exists
    #[error("device id '{0}' already exists")]
    DuplicateId(String),

    /// Entity not found
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity type ("action", "device", "session")
        entity: &'static str,
        /// Identifier that was looked up
        id: String,
    },

    /// Persistent storage could not be opened
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error
    #[error("database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a not-found error
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Connector error kind, if this is a connector failure
    pub fn connector_kind(&self) -> Option<ConnectorErrorKind> {
        match self {
            Self::Connector(e) => Some(e.kind),
            _ => None,
        }
    }

    /// Short user-facing title
    pub fn title(&self) -> &'static str {
        match self {
            Self::Connector(e) => match e.kind {
                ConnectorErrorKind::Connection => "Connection Failed",
                ConnectorErrorKind::Bind => "Bind Failed",
                ConnectorErrorKind::Io => "I/O Error",
                ConnectorErrorKind::Timeout => "Timed Out",
                ConnectorErrorKind::Cancelled => "Cancelled",
                ConnectorErrorKind::NoConnector => "No Connector",
                ConnectorErrorKind::EndpointEmpty => "Endpoint Empty",
                ConnectorErrorKind::InvalidEndpoint => "Invalid Endpoint",
                ConnectorErrorKind::PermissionDenied => "Permission Denied",
            },
            Self::Validation(_) => "Invalid Input",
            Self::DuplicateName { .. } => "Duplicate Name",
            Self::DuplicateId(_) => "Duplicate Id",
            Self::NotFound { .. } => "Not Found",
            Self::StorageUnavailable(_) | Self::Pool(_) => "Storage Unavailable",
            Self::Sqlite(_) => "Storage Error",
            Self::Io(_) => "I/O Error",
            Self::Serialization(_) => "Invalid Data",
            Self::Config(_) => "Configuration Error",
        }
    }

    /// Detail line, including the low-level cause when present
    pub fn detail(&self) -> String {
        match self {
            Self::Connector(e) => match std::error::Error::source(e) {
                Some(cause) => format!("{}: {cause}", e.message),
                None => e.message.clone(),
            },
            other => other.to_string(),
        }
    }

    /// Whether the error comes from storage or internals rather than input
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            Self::StorageUnavailable(_) | Self::Sqlite(_) | Self::Pool(_) | Self::Io(_)
        )
    }
}
