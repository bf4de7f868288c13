//! Error types for wwanctl

use std::io;
use thiserror::Error;

/// How a caller should treat a failed operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Stop the current operation (and the process, for one-shot entry points)
    Fatal,
    /// Retry within a bound or escalate
    Recoverable,
    /// Log and carry on
    Warning,
}

#[derive(Debug, Error)]
pub enum WwanError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// External command exited non-zero or could not be spawned
    #[error("Command '{cmd}' failed{}: {stderr}", exit_suffix(.code))]
    CommandFailed {
        cmd: String,
        code: Option<i32>,
        stderr: String,
    },

    /// External command did not finish within its invocation timeout
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Modem manager lists no modems
    #[error("No modem found")]
    NoModemFound,

    /// Modem manager itself cannot be reached
    #[error("Modem manager unavailable: {0}")]
    ModemManagerUnavailable(String),

    /// Bearer reports connected but addressing is not (yet) complete
    #[error("Incomplete IP configuration: {0}")]
    IncompleteConfig(String),

    /// Network interface does not exist
    #[error("Interface not found: {0}")]
    LinkNotFound(String),

    /// Address could not be assigned
    #[error("Address conflict on {interface}: {reason}")]
    AddressConflict { interface: String, reason: String },

    /// Route could not be installed
    #[error("Route apply failed on {interface}: {reason}")]
    RouteApplyFailed { interface: String, reason: String },

    /// Bearer creation was rejected or returned no bearer path
    #[error("Bearer creation failed: {0}")]
    BearerCreateFailed(String),

    /// Bearer connect did not succeed
    #[error("Bearer connect failed: {0}")]
    BearerConnectFailed(String),

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Unparseable external output
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

fn exit_suffix(code: &Option<i32>) -> String {
    code.map(|c| format!(" with code {}", c)).unwrap_or_default()
}

impl WwanError {
    /// Classify this error for the caller's continue/abort decision
    pub fn severity(&self) -> Severity {
        match self {
            WwanError::NoModemFound
            | WwanError::ModemManagerUnavailable(_)
            | WwanError::LinkNotFound(_)
            | WwanError::BearerCreateFailed(_)
            | WwanError::InvalidParameter(_)
            | WwanError::ConfigError(_) => Severity::Fatal,
            WwanError::BearerConnectFailed(_)
            | WwanError::IncompleteConfig(_)
            | WwanError::Timeout(_)
            | WwanError::CommandFailed { .. }
            | WwanError::ParseError(_)
            | WwanError::Io(_) => Severity::Recoverable,
            WwanError::AddressConflict { .. } | WwanError::RouteApplyFailed { .. } => {
                Severity::Warning
            }
        }
    }
}

impl From<serde_json::Error> for WwanError {
    fn from(error: serde_json::Error) -> Self {
        WwanError::ParseError(error.to_string())
    }
}

pub type WwanResult<T> = Result<T, WwanError>;
