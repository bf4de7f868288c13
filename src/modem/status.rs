//! Typed, read-mostly view of modem and bearer state
//!
//! All mmcli text is interpreted here. Handles are re-resolved on every call
//! to [`ModemStatusReader::resolve_handles`]; nothing is cached, because ids
//! change across ModemManager restarts and USB re-enumeration.

use super::report::{self, StatusReport};
use super::{BearerHandle, IpType, ModemHandle, ModemManager, ModemState};
use crate::error::{WwanError, WwanResult};
use crate::plan::{AddressPlan, Ipv6Info, DEFAULT_MTU};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use tracing::{debug, warn};

const SECTION_STATUS: &str = "Status";
const SECTION_BEARER: &str = "Bearer";
const SECTION_3GPP: &str = "3GPP";
const SECTION_IPV4: &str = "IPv4 configuration";
const SECTION_IPV6: &str = "IPv6 configuration";

/// Which modem to manage when several are listed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModemSelection {
    /// First listed modem
    #[default]
    First,
    /// N-th listed modem (0-based)
    Index(usize),
    /// Modem with this object id
    Id(u32),
}

/// Existence and connection flag of a bearer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct BearerStatus {
    pub exists: bool,
    pub connected: bool,
}

/// Operator-facing modem details
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModemSummary {
    pub modem: ModemHandle,
    pub state: ModemState,
    pub signal_quality: Option<u8>,
    pub access_tech: Option<String>,
    pub operator: Option<String>,
    pub registration: Option<String>,
}

pub struct ModemStatusReader {
    manager: Arc<dyn ModemManager>,
    selection: ModemSelection,
}

impl ModemStatusReader {
    pub fn new(manager: Arc<dyn ModemManager>, selection: ModemSelection) -> Self {
        Self { manager, selection }
    }

    /// Underlying modem manager, for state-changing requests
    pub fn manager(&self) -> &Arc<dyn ModemManager> {
        &self.manager
    }

    /// All modems in listed order, `NoModemFound` if none
    pub async fn list_modems(&self) -> WwanResult<Vec<ModemHandle>> {
        let text = self.manager.list_modems().await?;
        let modems = report::parse_modem_list(&text);
        if modems.is_empty() {
            return Err(WwanError::NoModemFound);
        }
        Ok(modems)
    }

    /// Apply the configured selection policy to the modem listing
    pub async fn select_modem(&self) -> WwanResult<ModemHandle> {
        let modems = self.list_modems().await?;
        let chosen = match self.selection {
            ModemSelection::First => {
                if modems.len() > 1 {
                    warn!(
                        "{} modems present, managing first listed (modem {})",
                        modems.len(),
                        modems[0]
                    );
                }
                Some(modems[0])
            }
            ModemSelection::Index(i) => modems.get(i).copied(),
            ModemSelection::Id(id) => modems.iter().copied().find(|m| m.0 == id),
        };
        chosen.ok_or(WwanError::NoModemFound)
    }

    async fn modem(&self, modem: ModemHandle) -> WwanResult<StatusReport> {
        Ok(StatusReport::parse(&self.manager.modem_report(modem).await?))
    }

    pub async fn modem_state(&self, modem: ModemHandle) -> WwanResult<ModemState> {
        let report = self.modem(modem).await?;
        Ok(state_from(&report))
    }

    pub async fn modem_summary(&self, modem: ModemHandle) -> WwanResult<ModemSummary> {
        let report = self.modem(modem).await?;
        Ok(ModemSummary {
            modem,
            state: state_from(&report),
            signal_quality: report
                .get(SECTION_STATUS, "signal quality")
                .and_then(parse_percent),
            access_tech: report.get(SECTION_STATUS, "access tech").map(String::from),
            operator: report.get(SECTION_3GPP, "operator name").map(String::from),
            registration: report.get(SECTION_3GPP, "registration").map(String::from),
        })
    }

    /// Signal quality percentage, if reported
    pub async fn signal_quality(&self, modem: ModemHandle) -> WwanResult<Option<u8>> {
        let report = self.modem(modem).await?;
        Ok(report
            .get(SECTION_STATUS, "signal quality")
            .and_then(parse_percent))
    }

    /// Bearers attached to the modem
    pub async fn modem_bearers(&self, modem: ModemHandle) -> WwanResult<Vec<BearerHandle>> {
        let report = self.modem(modem).await?;
        let paths = report.get_all(SECTION_BEARER, "paths").join("\n");
        Ok(report::parse_bearer_paths(&paths))
    }

    pub async fn bearer_status(&self, bearer: BearerHandle) -> WwanResult<BearerStatus> {
        let Some(text) = self.manager.bearer_report(bearer).await? else {
            return Ok(BearerStatus::default());
        };
        let report = StatusReport::parse(&text);
        Ok(BearerStatus {
            exists: true,
            connected: report.get(SECTION_STATUS, "connected") == Some("yes"),
        })
    }

    /// Carrier-assigned addressing of a connected bearer.
    ///
    /// The result is the raw carrier view; run it through the planner before
    /// applying it.
    pub async fn ip_config(&self, bearer: BearerHandle) -> WwanResult<AddressPlan> {
        let Some(text) = self.manager.bearer_report(bearer).await? else {
            return Err(WwanError::IncompleteConfig(format!(
                "bearer {} does not exist",
                bearer
            )));
        };
        parse_ip_config(&StatusReport::parse(&text))
    }

    /// Create a bearer and return the id the modem manager assigned to it
    pub async fn create_bearer(
        &self,
        modem: ModemHandle,
        apn: &str,
        ip_type: IpType,
    ) -> WwanResult<BearerHandle> {
        let response = self.manager.create_bearer(modem, apn, ip_type).await?;
        report::parse_created_bearer(&response).ok_or_else(|| {
            WwanError::BearerCreateFailed(format!(
                "no bearer path in response: {}",
                response.trim()
            ))
        })
    }

    /// Current modem and its active bearer, if any.
    ///
    /// Prefers the first connected bearer, else the first listed one.
    pub async fn resolve_handles(&self) -> WwanResult<(ModemHandle, Option<BearerHandle>)> {
        let modem = self.select_modem().await?;
        let bearers = self.modem_bearers(modem).await?;

        for bearer in &bearers {
            match self.bearer_status(*bearer).await {
                Ok(status) if status.connected => return Ok((modem, Some(*bearer))),
                Ok(_) => {}
                Err(e) => debug!(bearer = %bearer, "Bearer status unavailable: {}", e),
            }
        }

        Ok((modem, bearers.first().copied()))
    }
}

fn state_from(report: &StatusReport) -> ModemState {
    if report
        .get(SECTION_3GPP, "registration")
        .is_some_and(|r| r.eq_ignore_ascii_case("denied"))
    {
        return ModemState::Denied;
    }
    report
        .get(SECTION_STATUS, "state")
        .map(ModemState::from_report)
        .unwrap_or(ModemState::Unknown)
}

fn parse_percent(value: &str) -> Option<u8> {
    let digits: String = value.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

fn split_list(values: Vec<&str>) -> impl Iterator<Item = &str> {
    values
        .into_iter()
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn required<'a>(report: &'a StatusReport, key: &str) -> WwanResult<&'a str> {
    report.get(SECTION_IPV4, key).ok_or_else(|| {
        WwanError::IncompleteConfig(format!("IPv4 configuration has no {}", key))
    })
}

fn parse_ip_config(report: &StatusReport) -> WwanResult<AddressPlan> {
    if report.get(SECTION_STATUS, "connected") != Some("yes") {
        return Err(WwanError::IncompleteConfig("bearer not connected".to_string()));
    }
    if report.section(SECTION_IPV4).is_none() {
        return Err(WwanError::IncompleteConfig(
            "no IPv4 configuration section".to_string(),
        ));
    }

    let address: Ipv4Addr = required(report, "address")?.parse().map_err(|_| {
        WwanError::IncompleteConfig("IPv4 address is not a valid address".to_string())
    })?;
    let prefix: u8 = required(report, "prefix")?
        .parse()
        .ok()
        .filter(|p| *p <= 32)
        .ok_or_else(|| WwanError::IncompleteConfig("IPv4 prefix out of range".to_string()))?;
    let gateway: Ipv4Addr = required(report, "gateway")?.parse().map_err(|_| {
        WwanError::IncompleteConfig("IPv4 gateway is not a valid address".to_string())
    })?;

    let ipv4_dns: Vec<Ipv4Addr> = split_list(report.get_all(SECTION_IPV4, "dns"))
        .filter_map(|v| v.parse().ok())
        .collect();
    let mtu = report
        .get(SECTION_IPV4, "mtu")
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_MTU);

    let ipv6 = match (
        report.get(SECTION_IPV6, "address").and_then(|v| v.parse::<Ipv6Addr>().ok()),
        report.get(SECTION_IPV6, "prefix").and_then(|v| v.parse::<u8>().ok()),
    ) {
        (Some(address), Some(prefix_len)) if prefix_len <= 128 => Some(Ipv6Info {
            address,
            prefix_len,
        }),
        _ => None,
    };
    let ipv6_dns: Vec<Ipv6Addr> = split_list(report.get_all(SECTION_IPV6, "dns"))
        .filter_map(|v| v.parse().ok())
        .collect();

    Ok(AddressPlan {
        ipv4_address: address,
        ipv4_prefix_len: prefix,
        gateway,
        ipv4_dns,
        ipv6,
        ipv6_dns,
        mtu,
    })
}
