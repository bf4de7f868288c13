//! Configuration management for wwanctl
//!
//! One TOML file, every field defaulted. Command-line flags override file
//! values; the result is validated once and then treated as immutable.

use crate::error::{WwanError, WwanResult};
use crate::modem::status::ModemSelection;
use crate::modem::IpType;
use crate::orchestrator::{BearerSettings, ConnectTimings};
use crate::plan::{DnsPolicy, DEFAULT_MTU, FALLBACK_DNS_V4, FALLBACK_DNS_V6};
use crate::reconcile::ReconcileSettings;
use crate::retry::RetryPolicy;
use crate::state::ProbeTargets;
use crate::validation;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/wwanctl/wwanctl.toml";

/// Main wwanctl configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WwanConfig {
    #[serde(default)]
    pub modem: ModemConfig,
    #[serde(default)]
    pub interface: InterfaceConfig,
    #[serde(default)]
    pub dns: DnsConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub daemon: DaemonSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModemConfig {
    /// Access point name requested for the bearer
    #[serde(default = "default_apn")]
    pub apn: String,
    #[serde(default = "default_ip_type")]
    pub ip_type: IpType,
    /// Which modem to manage when several are present
    #[serde(default)]
    pub selection: ModemSelection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceConfig {
    #[serde(default = "default_interface")]
    pub name: String,
    /// Fixed MTU, applied regardless of what the carrier reports
    #[serde(default = "default_mtu")]
    pub mtu: u32,
    /// Metric for routes installed on the interface
    #[serde(default)]
    pub route_metric: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DnsConfig {
    #[serde(default = "default_ipv4_fallback")]
    pub ipv4_fallback: Vec<Ipv4Addr>,
    #[serde(default = "default_ipv6_fallback")]
    pub ipv6_fallback: Ipv6Addr,
    /// Written when systemd-resolved is not available
    #[serde(default = "default_resolv_conf")]
    pub resolv_conf: PathBuf,
}

/// Settle delays, retry budgets and timeouts, in seconds unless noted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Polls for a listed modem during one-shot bring-up
    #[serde(default = "default_detection_attempts")]
    pub detection_attempts: u32,
    #[serde(default = "default_detection_delay")]
    pub detection_delay_secs: u64,
    #[serde(default = "default_enable_settle")]
    pub enable_settle_secs: u64,
    #[serde(default = "default_registration_attempts")]
    pub registration_attempts: u32,
    #[serde(default = "default_registration_delay")]
    pub registration_delay_secs: u64,
    #[serde(default = "default_bearer_settle")]
    pub bearer_settle_secs: u64,
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    #[serde(default = "default_connect_delay")]
    pub connect_delay_secs: u64,
    #[serde(default = "default_connect_settle")]
    pub connect_settle_secs: u64,
    #[serde(default = "default_ip_config_settle")]
    pub ip_config_settle_secs: u64,
    /// Random extra delay added to each retry wait (milliseconds)
    #[serde(default)]
    pub retry_jitter_ms: u64,
    /// Hard limit on any external command
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    /// Reply deadline of ping and name lookups
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
    /// Minimum spacing of DNS refreshes on resolution failure
    #[serde(default = "default_dns_repair_interval")]
    pub dns_repair_interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "default_ping_target")]
    pub ping_target: String,
    #[serde(default = "default_dns_probe_host")]
    pub dns_probe_host: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonSection {
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    /// Log directory; `WWANCTL_LOG_DIR` takes precedence
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

/// Resolved daemon settings, fixed for the process lifetime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    pub check_interval: Duration,
    pub apn: String,
    pub ip_type: IpType,
    pub log_sink: Option<PathBuf>,
}

fn default_apn() -> String {
    "internet".to_string()
}

fn default_ip_type() -> IpType {
    IpType::Ipv4v6
}

fn default_interface() -> String {
    "wwan0".to_string()
}

fn default_mtu() -> u32 {
    DEFAULT_MTU
}

fn default_ipv4_fallback() -> Vec<Ipv4Addr> {
    vec![FALLBACK_DNS_V4]
}

fn default_ipv6_fallback() -> Ipv6Addr {
    FALLBACK_DNS_V6
}

fn default_resolv_conf() -> PathBuf {
    PathBuf::from(crate::dns::RESOLV_CONF)
}

fn default_detection_attempts() -> u32 {
    10
}

fn default_detection_delay() -> u64 {
    2
}

fn default_enable_settle() -> u64 {
    3
}

fn default_registration_attempts() -> u32 {
    30
}

fn default_registration_delay() -> u64 {
    1
}

fn default_bearer_settle() -> u64 {
    2
}

fn default_connect_attempts() -> u32 {
    3
}

fn default_connect_delay() -> u64 {
    5
}

fn default_connect_settle() -> u64 {
    3
}

fn default_ip_config_settle() -> u64 {
    3
}

fn default_command_timeout() -> u64 {
    30
}

fn default_probe_timeout() -> u64 {
    5
}

fn default_dns_repair_interval() -> u64 {
    120
}

fn default_ping_target() -> String {
    "8.8.8.8".to_string()
}

fn default_dns_probe_host() -> String {
    "google.com".to_string()
}

fn default_check_interval() -> u64 {
    30
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            apn: default_apn(),
            ip_type: default_ip_type(),
            selection: ModemSelection::default(),
        }
    }
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self {
            name: default_interface(),
            mtu: default_mtu(),
            route_metric: None,
        }
    }
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            ipv4_fallback: default_ipv4_fallback(),
            ipv6_fallback: default_ipv6_fallback(),
            resolv_conf: default_resolv_conf(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            detection_attempts: default_detection_attempts(),
            detection_delay_secs: default_detection_delay(),
            enable_settle_secs: default_enable_settle(),
            registration_attempts: default_registration_attempts(),
            registration_delay_secs: default_registration_delay(),
            bearer_settle_secs: default_bearer_settle(),
            connect_attempts: default_connect_attempts(),
            connect_delay_secs: default_connect_delay(),
            connect_settle_secs: default_connect_settle(),
            ip_config_settle_secs: default_ip_config_settle(),
            retry_jitter_ms: 0,
            command_timeout_secs: default_command_timeout(),
            probe_timeout_secs: default_probe_timeout(),
            dns_repair_interval_secs: default_dns_repair_interval(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            ping_target: default_ping_target(),
            dns_probe_host: default_dns_probe_host(),
        }
    }
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
            log_dir: None,
        }
    }
}

impl WwanConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> WwanResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            WwanError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;

        toml::from_str(&content).map_err(|e| {
            WwanError::ConfigError(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    /// Explicit path must exist; without one the default path is optional
    pub fn load_or_default(path: Option<&Path>) -> WwanResult<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Self::load_if_present(Path::new(DEFAULT_CONFIG_PATH)),
        }
    }

    fn load_if_present(path: &Path) -> WwanResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Check every value that ends up on a command line
    pub fn validate(&self) -> WwanResult<()> {
        validation::validate_apn(&self.modem.apn)?;
        validation::validate_interface_name(&self.interface.name)?;
        validation::validate_mtu(self.interface.mtu)?;
        validation::validate_hostname(&self.probe.ping_target)?;
        validation::validate_hostname(&self.probe.dns_probe_host)?;

        if self.dns.ipv4_fallback.is_empty() {
            return Err(WwanError::ConfigError(
                "dns.ipv4_fallback needs at least one server".to_string(),
            ));
        }
        if self.daemon.check_interval_secs == 0 {
            return Err(WwanError::ConfigError(
                "daemon.check_interval_secs must be positive".to_string(),
            ));
        }
        if self.timing.command_timeout_secs == 0 || self.timing.probe_timeout_secs == 0 {
            return Err(WwanError::ConfigError(
                "timeouts must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn bearer_settings(&self) -> BearerSettings {
        BearerSettings {
            apn: self.modem.apn.clone(),
            ip_type: self.modem.ip_type,
        }
    }

    pub fn connect_timings(&self) -> ConnectTimings {
        let t = &self.timing;
        let jitter = Duration::from_millis(t.retry_jitter_ms);
        ConnectTimings {
            detection: RetryPolicy::new(t.detection_attempts, secs(t.detection_delay_secs))
                .with_jitter(jitter),
            enable_settle: secs(t.enable_settle_secs),
            registration: RetryPolicy::new(t.registration_attempts, secs(t.registration_delay_secs))
                .with_jitter(jitter),
            bearer_settle: secs(t.bearer_settle_secs),
            connect: RetryPolicy::new(t.connect_attempts, secs(t.connect_delay_secs))
                .with_jitter(jitter),
            connect_settle: secs(t.connect_settle_secs),
            ip_config_settle: secs(t.ip_config_settle_secs),
        }
    }

    pub fn dns_policy(&self) -> DnsPolicy {
        DnsPolicy {
            ipv4_fallback: self.dns.ipv4_fallback.clone(),
            ipv6_fallback: self.dns.ipv6_fallback,
        }
    }

    pub fn probe_targets(&self) -> ProbeTargets {
        ProbeTargets {
            ping_target: self.probe.ping_target.clone(),
            dns_probe_host: self.probe.dns_probe_host.clone(),
        }
    }

    pub fn reconcile_settings(&self) -> ReconcileSettings {
        ReconcileSettings {
            interface: self.interface.name.clone(),
            check_interval: secs(self.daemon.check_interval_secs),
            dns_repair_interval: secs(self.timing.dns_repair_interval_secs),
        }
    }

    pub fn command_timeout(&self) -> Duration {
        secs(self.timing.command_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        secs(self.timing.probe_timeout_secs)
    }

    pub fn daemon_config(&self) -> DaemonConfig {
        DaemonConfig {
            check_interval: secs(self.daemon.check_interval_secs),
            apn: self.modem.apn.clone(),
            ip_type: self.modem.ip_type,
            log_sink: self.daemon.log_dir.clone(),
        }
    }
}

fn secs(value: u64) -> Duration {
    Duration::from_secs(value)
}
