//! CLI Exit Codes
//!
//! Standard exit codes for CLI operations and automation.

use crate::core::transport::ConnectorErrorKind;
use crate::Error;
use std::process::ExitCode;

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Success
    pub const SUCCESS: u8 = 0;

    /// General error
    pub const ERROR: u8 = 1;

    /// Invalid arguments
    pub const INVALID_ARGS: u8 = 2;

    /// Connection failed
    pub const CONNECTION_FAILED: u8 = 3;

    /// Connection timeout
    pub const TIMEOUT: u8 = 4;

    /// File not found
    pub const FILE_NOT_FOUND: u8 = 6;

    /// Permission denied
    pub const PERMISSION_DENIED: u8 = 7;

    /// Configuration error
    pub const CONFIG_ERROR: u8 = 8;

    /// No connector for the protocol
    pub const NO_CONNECTOR: u8 = 9;

    /// Port could not be bound
    pub const BIND_FAILED: u8 = 10;

    /// User cancelled
    pub const CANCELLED: u8 = 11;

    /// Device, action or session not found
    pub const NOT_FOUND: u8 = 12;

    /// Name or id already in use
    pub const CONFLICT: u8 = 13;

    /// Endpoint empty or malformed
    pub const BAD_ENDPOINT: u8 = 14;

    /// Storage unavailable or failing
    pub const STORAGE_ERROR: u8 = 15;

    /// Some items of a batch failed
    pub const PARTIAL_FAILURE: u8 = 16;

    /// Data validation failed
    pub const VALIDATION_FAILED: u8 = 17;

    /// Internal error
    pub const INTERNAL_ERROR: u8 = 127;
}

/// CLI operation result
#[derive(Debug)]
pub enum CliResult {
    /// Success with optional message
    Success(Option<String>),

    /// Error with code and message
    Error(u8, String),
}

impl CliResult {
    /// Plain success
    pub fn success() -> Self {
        Self::Success(None)
    }

    /// Success with a message
    pub fn success_with_message(msg: impl Into<String>) -> Self {
        Self::Success(Some(msg.into()))
    }

    /// Failure with an explicit code
    pub fn error(code: u8, msg: impl Into<String>) -> Self {
        Self::Error(code, msg.into())
    }

    /// Get exit code
    pub fn code(&self) -> u8 {
        match self {
            Self::Success(_) => ExitCodes::SUCCESS,
            Self::Error(code, _) => *code,
        }
    }

    /// Get message
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success(Some(msg)) | Self::Error(_, msg) => Some(msg),
            Self::Success(None) => None,
        }
    }

    /// Convert to `ExitCode`
    pub fn to_exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    /// Is success?
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl From<&Error> for CliResult {
    fn from(err: &Error) -> Self {
        Self::Error(exit_code_for(err), format!("{}: {}", err.title(), err.detail()))
    }
}

impl From<std::io::Error> for CliResult {
    fn from(err: std::io::Error) -> Self {
        Self::Error(io_exit_code(&err), err.to_string())
    }
}

fn io_exit_code(err: &std::io::Error) -> u8 {
    use std::io::ErrorKind;

    match err.kind() {
        ErrorKind::NotFound => ExitCodes::FILE_NOT_FOUND,
        ErrorKind::PermissionDenied => ExitCodes::PERMISSION_DENIED,
        ErrorKind::ConnectionRefused => ExitCodes::CONNECTION_FAILED,
        ErrorKind::TimedOut => ExitCodes::TIMEOUT,
        _ => ExitCodes::ERROR,
    }
}

/// Exit code for a library error
pub fn exit_code_for(err: &Error) -> u8 {
    match err {
        Error::Connector(e) => match e.kind {
            ConnectorErrorKind::Connection | ConnectorErrorKind::Io => ExitCodes::CONNECTION_FAILED,
            ConnectorErrorKind::Timeout => ExitCodes::TIMEOUT,
            ConnectorErrorKind::Bind => ExitCodes::BIND_FAILED,
            ConnectorErrorKind::Cancelled => ExitCodes::CANCELLED,
            ConnectorErrorKind::NoConnector => ExitCodes::NO_CONNECTOR,
            ConnectorErrorKind::EndpointEmpty | ConnectorErrorKind::InvalidEndpoint => {
                ExitCodes::BAD_ENDPOINT
            }
            ConnectorErrorKind::PermissionDenied => ExitCodes::PERMISSION_DENIED,
        },
        Error::Validation(_) | Error::Serialization(_) => ExitCodes::VALIDATION_FAILED,
        Error::DuplicateName { .. } | Error::DuplicateId(_) => ExitCodes::CONFLICT,
        Error::NotFound { .. } => ExitCodes::NOT_FOUND,
        Error::StorageUnavailable(_) | Error::Sqlite(_) | Error::Pool(_) => ExitCodes::STORAGE_ERROR,
        Error::Io(e) => io_exit_code(e),
        Error::Config(_) => ExitCodes::CONFIG_ERROR,
    }
}

/// Exit code description
pub fn exit_code_description(code: u8) -> &'static str {
    match code {
        0 => "Success",
        1 => "General error",
        2 => "Invalid arguments",
        3 => "Connection failed",
        4 => "Connection timeout",
        6 => "File not found",
        7 => "Permission denied",
        8 => "Configuration error",
        9 => "No connector for protocol",
        10 => "Bind failed",
        11 => "Operation cancelled",
        12 => "Not found",
        13 => "Name or id conflict",
        14 => "Endpoint empty or invalid",
        15 => "Storage error",
        16 => "Partial failure",
        17 => "Validation failed",
        127 => "Internal error",
        _ => "Unknown error",
    }
}

/// Print exit code table
pub fn print_exit_codes() {
    println!("Exit Codes:");
    for code in [0, 1, 2, 3, 4, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 127] {
        println!("  {:>3}  {}", code, exit_code_description(code));
    }
}
