//! Observed connection state
//!
//! Recomputed from scratch on every tick and by `wwanctl status`; never stored.

use crate::apply::{InterfaceApplier, InterfaceObservation};
use crate::error::WwanResult;
use crate::modem::{BearerHandle, ModemHandle, ModemStatusReader};
use crate::probe::{PingOutcome, Prober};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionState {
    pub bearer_connected: bool,
    pub interface_has_ip: bool,
    pub default_route_present: bool,
    pub dns_configured: bool,
    pub icmp_reachable: bool,
    pub dns_resolves: bool,
}

impl ConnectionState {
    /// Bearer up and address on the interface
    pub fn is_up(&self) -> bool {
        self.bearer_connected && self.interface_has_ip
    }

    /// Address, default route and resolver configuration all present
    pub fn invariants_hold(&self) -> bool {
        self.interface_has_ip && self.default_route_present && self.dns_configured
    }

    pub fn is_healthy(&self) -> bool {
        self.is_up() && self.invariants_hold() && self.icmp_reachable && self.dns_resolves
    }
}

/// Hosts used by the reachability probes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTargets {
    pub ping_target: String,
    pub dns_probe_host: String,
}

impl Default for ProbeTargets {
    fn default() -> Self {
        Self {
            ping_target: "8.8.8.8".to_string(),
            dns_probe_host: "google.com".to_string(),
        }
    }
}

/// Everything observed in one pass
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub modem: ModemHandle,
    pub bearer: Option<BearerHandle>,
    pub state: ConnectionState,
    pub interface: InterfaceObservation,
    /// Present only when the link was up enough to probe
    pub ping: Option<PingOutcome>,
    pub resolve_error: Option<String>,
}

pub struct StateObserver {
    reader: Arc<ModemStatusReader>,
    applier: Arc<InterfaceApplier>,
    prober: Arc<dyn Prober>,
    interface: String,
    targets: ProbeTargets,
}

impl StateObserver {
    pub fn new(
        reader: Arc<ModemStatusReader>,
        applier: Arc<InterfaceApplier>,
        prober: Arc<dyn Prober>,
        interface: impl Into<String>,
        targets: ProbeTargets,
    ) -> Self {
        Self {
            reader,
            applier,
            prober,
            interface: interface.into(),
            targets,
        }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// A single extra echo request, used to confirm a repair
    pub async fn ping(&self) -> PingOutcome {
        self.prober
            .ping(&self.interface, &self.targets.ping_target)
            .await
    }

    /// Re-resolve handles and sample the interface.
    ///
    /// Only modem discovery errors are returned. Probes run only when the
    /// bearer is connected and the interface has an address.
    pub async fn observe(&self) -> WwanResult<Snapshot> {
        let (modem, bearer) = self.reader.resolve_handles().await?;

        let bearer_connected = match bearer {
            Some(b) => match self.reader.bearer_status(b).await {
                Ok(status) => status.connected,
                Err(e) => {
                    warn!(bearer = %b, "Bearer status unavailable: {}", e);
                    false
                }
            },
            None => false,
        };

        let interface = match self.applier.observe(&self.interface).await {
            Ok(obs) => obs,
            Err(e) => {
                warn!(interface = %self.interface, "Cannot observe interface: {}", e);
                InterfaceObservation::default()
            }
        };

        let mut state = ConnectionState {
            bearer_connected,
            interface_has_ip: interface.has_ip(),
            default_route_present: interface.default_route.is_some(),
            dns_configured: !interface.dns_servers.is_empty(),
            ..Default::default()
        };

        let mut ping = None;
        let mut resolve_error = None;
        if state.is_up() {
            let outcome = self
                .prober
                .ping(&self.interface, &self.targets.ping_target)
                .await;
            state.icmp_reachable = outcome.success;
            ping = Some(outcome);

            match self.prober.resolve(&self.targets.dns_probe_host).await {
                Ok(addrs) if !addrs.is_empty() => state.dns_resolves = true,
                Ok(_) => resolve_error = Some("no addresses returned".to_string()),
                Err(e) => resolve_error = Some(e.to_string()),
            }
        }

        debug!(modem = %modem, "Observed {:?}", state);
        Ok(Snapshot {
            modem,
            bearer,
            state,
            interface,
            ping,
            resolve_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invariants() {
        let mut state = ConnectionState {
            bearer_connected: true,
            interface_has_ip: true,
            default_route_present: true,
            dns_configured: true,
            ..Default::default()
        };
        assert!(state.is_up());
        assert!(state.invariants_hold());
        assert!(!state.is_healthy());

        state.icmp_reachable = true;
        state.dns_resolves = true;
        assert!(state.is_healthy());

        state.default_route_present = false;
        assert!(!state.invariants_hold());
        assert!(state.is_up());
    }

    #[test]
    fn test_serializes_flat() {
        let json = serde_json::to_value(ConnectionState::default()).unwrap();
        assert_eq!(json["bearer_connected"], false);
        assert_eq!(json["dns_resolves"], false);
    }
}
