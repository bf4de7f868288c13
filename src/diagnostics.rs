//! Read-only status checks and host environment warnings

use crate::command::{args, CommandRunner};
use crate::modem::{ModemStatusReader, ModemSummary};
use crate::state::{ConnectionState, StateObserver};
use crate::apply::InterfaceApplier;
use serde::Serialize;
use tracing::debug;

/// Services that also manage interfaces and may fight over wwan0
const COMPETING_SERVICES: &[&str] = &["NetworkManager", "systemd-networkd", "connman"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Check {
    pub name: &'static str,
    pub ok: bool,
    pub detail: String,
}

impl Check {
    fn new(name: &'static str, ok: bool, detail: impl Into<String>) -> Self {
        Self {
            name,
            ok,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Diagnosis {
    pub interface: String,
    pub state: ConnectionState,
    pub modem: Option<ModemSummary>,
    pub checks: Vec<Check>,
}

impl Diagnosis {
    /// Address, default route and DNS configured
    pub fn invariants_hold(&self) -> bool {
        self.state.invariants_hold()
    }
}

/// Gather every status check without changing anything
pub async fn diagnose(
    observer: &StateObserver,
    reader: &ModemStatusReader,
    applier: &InterfaceApplier,
) -> Diagnosis {
    let iface = observer.interface().to_string();
    let mut checks = Vec::new();

    let (state, interface, modem, ping, resolve_error) = match observer.observe().await {
        Ok(snapshot) => {
            let summary = match reader.modem_summary(snapshot.modem).await {
                Ok(summary) => Some(summary),
                Err(e) => {
                    debug!("Modem summary unavailable: {}", e);
                    None
                }
            };
            (
                snapshot.state,
                snapshot.interface,
                Ok((summary, snapshot.bearer)),
                snapshot.ping,
                snapshot.resolve_error,
            )
        }
        Err(e) => {
            let interface = applier.observe(&iface).await.unwrap_or_default();
            let state = ConnectionState {
                interface_has_ip: interface.has_ip(),
                default_route_present: interface.default_route.is_some(),
                dns_configured: !interface.dns_servers.is_empty(),
                ..Default::default()
            };
            (state, interface, Err(e), None, None)
        }
    };

    let link = if !interface.link_present {
        "not found"
    } else if interface.link_up {
        "UP"
    } else {
        "DOWN"
    };
    checks.push(Check::new("Interface", interface.link_present && interface.link_up, link));

    let addrs: Vec<String> = interface
        .addresses
        .iter()
        .map(|a| format!("{}/{}", a.address, a.prefix_len))
        .collect();
    checks.push(Check::new(
        "IP Config",
        state.interface_has_ip,
        if addrs.is_empty() {
            "no address assigned".to_string()
        } else {
            addrs.join(", ")
        },
    ));

    let dns: Vec<String> = interface.dns_servers.iter().map(|d| d.to_string()).collect();
    checks.push(Check::new(
        "DNS",
        state.dns_configured,
        if dns.is_empty() {
            "no nameservers".to_string()
        } else {
            dns.join(", ")
        },
    ));

    let routes = match &interface.default_route {
        Some(route) => format!("{}, {} route(s) on {}", route, interface.route_count, iface),
        None => format!("no default route, {} route(s) on {}", interface.route_count, iface),
    };
    checks.push(Check::new("Routes", state.default_route_present, routes));

    let summary = match modem {
        Ok((summary, bearer)) => {
            let detail = match &summary {
                Some(s) => format!(
                    "modem {}: {}, signal {}",
                    s.modem,
                    s.state,
                    s.signal_quality
                        .map(|q| format!("{}%", q))
                        .unwrap_or_else(|| "unknown".to_string())
                ),
                None => "present, details unavailable".to_string(),
            };
            checks.push(Check::new("Modem", true, detail));
            let bearer_detail = match bearer {
                Some(b) if state.bearer_connected => format!("bearer {} connected", b),
                Some(b) => format!("bearer {} not connected", b),
                None => "no bearer".to_string(),
            };
            checks.push(Check::new("Bearer", state.bearer_connected, bearer_detail));
            summary
        }
        Err(e) => {
            checks.push(Check::new("Modem", false, e.to_string()));
            checks.push(Check::new("Bearer", false, "unknown"));
            None
        }
    };

    if let Some(ping) = ping {
        let detail = match (ping.rtt_ms, &ping.error) {
            (Some(rtt), _) => format!("{:.1}ms", rtt),
            (None, Some(e)) => e.clone(),
            (None, None) => "no reply".to_string(),
        };
        checks.push(Check::new("Ping", ping.success, detail));
        checks.push(Check::new(
            "DNS Lookup",
            state.dns_resolves,
            resolve_error.unwrap_or_else(|| "resolves".to_string()),
        ));
    }

    Diagnosis {
        interface: iface,
        state,
        modem: summary,
        checks,
    }
}

/// Other network managers active on the host, with what they are doing.
///
/// systemd-networkd only counts when it actually manages `iface`.
pub async fn competing_managers(runner: &dyn CommandRunner, iface: &str) -> Vec<String> {
    let mut found = Vec::new();
    for service in COMPETING_SERVICES {
        let active = match runner
            .run("systemctl", &args(&["is-active", "--quiet", service]))
            .await
        {
            Ok(output) => output.success(),
            Err(e) => {
                debug!("Cannot query {}: {}", service, e);
                false
            }
        };
        if !active {
            continue;
        }

        if *service == "systemd-networkd" {
            let setup = match runner.run("networkctl", &args(&["list", "--no-legend"])).await {
                Ok(output) if output.success() => networkctl_setup_state(&output.stdout, iface),
                _ => None,
            };
            match setup.as_deref() {
                None | Some("unmanaged") => continue,
                Some(state) => found.push(format!("{} ({} is {})", service, iface, state)),
            }
        } else {
            found.push(service.to_string());
        }
    }
    found
}

/// SETUP column of `networkctl list --no-legend` for `iface`
pub fn networkctl_setup_state(output: &str, iface: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            [_, link, _, _, setup, ..] if *link == iface => Some(setup.to_string()),
            _ => None,
        }
    })
}
