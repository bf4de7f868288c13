//! Modem-manager integration
//!
//! - `report`: parser for mmcli's sectioned text output
//! - `mmcli`: [`ModemManager`] implementation on top of the `mmcli` tool
//! - `status`: [`ModemStatusReader`], the typed view the rest of the crate uses

pub mod mmcli;
pub mod report;
pub mod status;

pub use mmcli::Mmcli;
pub use report::StatusReport;
pub use status::{BearerStatus, ModemStatusReader, ModemSummary};

use crate::error::WwanResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Modem object id as listed by the modem manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModemHandle(pub u32);

/// Bearer object id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BearerHandle(pub u32);

impl BearerHandle {
    /// Id a freshly created bearer usually gets on a single-modem host.
    ///
    /// Only valid as a guess before any bearer is known to exist.
    pub fn guess_for(modem: ModemHandle) -> Self {
        BearerHandle(modem.0.wrapping_add(1))
    }
}

impl fmt::Display for ModemHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for BearerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Modem state as reported under `Status | state:`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModemState {
    Failed,
    Locked,
    Disabled,
    Disabling,
    Enabling,
    Enabled,
    Searching,
    Registered,
    Connecting,
    Disconnecting,
    Connected,
    /// Network rejected registration
    Denied,
    Unknown,
}

impl ModemState {
    pub fn from_report(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "failed" => ModemState::Failed,
            "locked" => ModemState::Locked,
            "disabled" => ModemState::Disabled,
            "disabling" => ModemState::Disabling,
            "enabling" => ModemState::Enabling,
            "enabled" => ModemState::Enabled,
            "searching" => ModemState::Searching,
            "registered" => ModemState::Registered,
            "connecting" => ModemState::Connecting,
            "disconnecting" => ModemState::Disconnecting,
            "connected" => ModemState::Connected,
            "denied" => ModemState::Denied,
            _ => ModemState::Unknown,
        }
    }

    /// Registration confirmed
    pub fn is_registered(&self) -> bool {
        matches!(self, ModemState::Registered | ModemState::Connected)
    }

    /// Enable request not needed
    pub fn is_enabled(&self) -> bool {
        matches!(
            self,
            ModemState::Enabled
                | ModemState::Searching
                | ModemState::Registered
                | ModemState::Connecting
                | ModemState::Disconnecting
                | ModemState::Connected
                | ModemState::Denied
        )
    }
}

impl fmt::Display for ModemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModemState::Failed => "failed",
            ModemState::Locked => "locked",
            ModemState::Disabled => "disabled",
            ModemState::Disabling => "disabling",
            ModemState::Enabling => "enabling",
            ModemState::Enabled => "enabled",
            ModemState::Searching => "searching",
            ModemState::Registered => "registered",
            ModemState::Connecting => "connecting",
            ModemState::Disconnecting => "disconnecting",
            ModemState::Connected => "connected",
            ModemState::Denied => "denied",
            ModemState::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Bearer IP family requested at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpType {
    Ipv4,
    Ipv6,
    Ipv4v6,
}

impl fmt::Display for IpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IpType::Ipv4 => "ipv4",
            IpType::Ipv6 => "ipv6",
            IpType::Ipv4v6 => "ipv4v6",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for IpType {
    type Err = crate::error::WwanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ipv4" => Ok(IpType::Ipv4),
            "ipv6" => Ok(IpType::Ipv6),
            "ipv4v6" => Ok(IpType::Ipv4v6),
            other => Err(crate::error::WwanError::InvalidParameter(format!(
                "Unknown IP type '{}' (expected ipv4, ipv6 or ipv4v6)",
                other
            ))),
        }
    }
}

/// Narrow interface to the modem-management subsystem.
///
/// Reports come back as raw text; only [`ModemStatusReader`] interprets them.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModemManager: Send + Sync {
    /// Modem enumeration text
    async fn list_modems(&self) -> WwanResult<String>;

    /// Full modem report
    async fn modem_report(&self, modem: ModemHandle) -> WwanResult<String>;

    /// Enable the modem; already-enabled is success
    async fn enable_modem(&self, modem: ModemHandle) -> WwanResult<()>;

    /// Create a bearer and return the raw creation response
    async fn create_bearer(&self, modem: ModemHandle, apn: &str, ip_type: IpType)
        -> WwanResult<String>;

    async fn connect_bearer(&self, bearer: BearerHandle) -> WwanResult<()>;

    async fn disconnect_bearer(&self, bearer: BearerHandle) -> WwanResult<()>;

    /// Full bearer report, `None` when the bearer does not exist
    async fn bearer_report(&self, bearer: BearerHandle) -> WwanResult<Option<String>>;
}
