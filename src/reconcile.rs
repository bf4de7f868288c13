//! Reconciliation loop
//!
//! Each tick re-resolves the modem and bearer, observes the connection and
//! corrects drift:
//!
//! - bearer up with an address: targeted repairs (default route, resolver
//!   config, reconfigure and reconnect on ping loss, rate-limited DNS refresh)
//! - otherwise: reconnect, then recreate, then apply the fresh plan
//!
//! Ticks never overlap. The loop sleeps the full interval after each body and
//! checks for shutdown only between ticks.

use crate::apply::{InterfaceApplier, StepOutcome};
use crate::error::{Severity, WwanError, WwanResult};
use crate::modem::{BearerHandle, ModemHandle, ModemStatusReader};
use crate::orchestrator::{ConnectionOrchestrator, RecoveryAction};
use crate::plan::{AddressPlan, AddressPlanner};
use crate::probe::PingOutcome;
use crate::state::{Snapshot, StateObserver};
use crate::stats::{ConnectivityStats, PingTransition};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

/// Minimum spacing of DNS refreshes triggered by resolution failures
pub const DNS_REPAIR_INTERVAL: Duration = Duration::from_secs(120);

/// Running statistics are logged every this many pings
const STATS_EVERY: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileSettings {
    pub interface: String,
    pub check_interval: Duration,
    pub dns_repair_interval: Duration,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            interface: "wwan0".to_string(),
            check_interval: Duration::from_secs(30),
            dns_repair_interval: DNS_REPAIR_INTERVAL,
        }
    }
}

/// Targeted fix performed on a connected bearer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Repair {
    /// Default route was missing and was put back
    DefaultRoute,
    /// Resolver rewritten because its configuration was empty or the default route was missing
    Dns,
    /// Full plan re-applied after ping loss
    Reconfigured,
    /// Bearer reconnected after ping loss persisted
    Reconnected,
    /// Resolver rewritten because name resolution failed
    DnsRefresh,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// No modem listed, nothing to do this tick
    NoModem,
    /// All checks passed
    Healthy,
    /// Probes failing but no fix due yet
    Degraded,
    Repaired(Vec<Repair>),
    /// Bearer restored by the given action and the plan applied
    Recovered(RecoveryAction),
    /// Bearer has no usable addressing yet; retried next tick
    IncompleteConfig(String),
    /// Reconnect and recreate both failed
    RecoveryFailed,
    /// The tick could not finish; the next tick starts over
    Error { severity: Severity, message: String },
}

impl From<WwanError> for TickOutcome {
    fn from(error: WwanError) -> Self {
        TickOutcome::Error {
            severity: error.severity(),
            message: error.to_string(),
        }
    }
}

impl fmt::Display for TickOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TickOutcome::NoModem => write!(f, "no modem present"),
            TickOutcome::Healthy => write!(f, "healthy"),
            TickOutcome::Degraded => write!(f, "degraded, no repair due"),
            TickOutcome::Repaired(repairs) => write!(f, "repaired {:?}", repairs),
            TickOutcome::Recovered(action) => write!(f, "recovered by {}", action),
            TickOutcome::IncompleteConfig(reason) => write!(f, "incomplete IP config: {}", reason),
            TickOutcome::RecoveryFailed => write!(f, "recovery failed"),
            TickOutcome::Error { message, .. } => write!(f, "error: {}", message),
        }
    }
}

pub struct ReconciliationLoop {
    observer: StateObserver,
    orchestrator: Arc<ConnectionOrchestrator>,
    reader: Arc<ModemStatusReader>,
    planner: AddressPlanner,
    applier: Arc<InterfaceApplier>,
    settings: ReconcileSettings,
    stats: ConnectivityStats,
    last_dns_fix: Option<Instant>,
}

impl ReconciliationLoop {
    pub fn new(
        observer: StateObserver,
        orchestrator: Arc<ConnectionOrchestrator>,
        reader: Arc<ModemStatusReader>,
        planner: AddressPlanner,
        applier: Arc<InterfaceApplier>,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            observer,
            orchestrator,
            reader,
            planner,
            applier,
            settings,
            stats: ConnectivityStats::new(),
            last_dns_fix: None,
        }
    }

    pub fn stats(&self) -> &ConnectivityStats {
        &self.stats
    }

    /// Run ticks until `shutdown` turns true or its sender is dropped
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interface = %self.settings.interface,
            "Reconciliation loop started, checking every {}s",
            self.settings.check_interval.as_secs()
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let outcome = self.tick().await;
            log_outcome(&outcome);

            tokio::select! {
                _ = sleep(self.settings.check_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Reconciliation loop stopping");
        self.stats.log_final();
    }

    /// One observe-and-correct pass
    pub async fn tick(&mut self) -> TickOutcome {
        let snapshot = match self.observer.observe().await {
            Ok(snapshot) => snapshot,
            Err(WwanError::NoModemFound) => return TickOutcome::NoModem,
            Err(e) => return TickOutcome::from(e),
        };

        if let Some(ping) = &snapshot.ping {
            self.record_ping(snapshot.modem, ping).await;
        }

        match snapshot.bearer {
            Some(bearer) if snapshot.state.is_up() => self.repair(&snapshot, bearer).await,
            _ => self.recover(&snapshot).await,
        }
    }

    async fn repair(&mut self, snapshot: &Snapshot, bearer: BearerHandle) -> TickOutcome {
        let state = snapshot.state;
        if state.is_healthy() {
            return TickOutcome::Healthy;
        }

        let dns_fix_due = !state.dns_resolves && self.dns_fix_due();
        let needs_plan = !state.default_route_present
            || !state.dns_configured
            || !state.icmp_reachable
            || dns_fix_due;
        if !needs_plan {
            debug!("Name resolution failing, last DNS fix too recent");
            return TickOutcome::Degraded;
        }

        let plan = match self.current_plan(bearer).await {
            Ok(plan) => plan,
            Err(WwanError::IncompleteConfig(reason)) => return TickOutcome::IncompleteConfig(reason),
            Err(e) => return TickOutcome::from(e),
        };
        let iface = self.settings.interface.clone();
        let mut repairs = Vec::new();

        if !state.default_route_present {
            warn!(interface = %iface, "Default route missing, restoring");
            if !self.applier.ensure_default_route(&iface, &plan).await.is_failed() {
                repairs.push(Repair::DefaultRoute);
            }
            // resolver state is rewritten with the route, outside the refresh rate limit
            if !self.applier.ensure_dns(&iface, &plan, true).await.is_failed() {
                repairs.push(Repair::Dns);
            }
        }

        if !state.dns_configured && !repairs.contains(&Repair::Dns) {
            warn!(interface = %iface, "Resolver configuration empty, restoring");
            if self.applier.ensure_dns(&iface, &plan, false).await == StepOutcome::Applied {
                repairs.push(Repair::Dns);
            }
        }

        if !state.icmp_reachable {
            self.repair_reachability(snapshot.modem, bearer, &plan, &mut repairs)
                .await;
        }

        if dns_fix_due && !repairs.contains(&Repair::Dns) {
            let reason = snapshot.resolve_error.as_deref().unwrap_or("unknown");
            warn!(interface = %iface, "Name resolution failing ({}), refreshing DNS", reason);
            self.last_dns_fix = Some(Instant::now());
            if !self.applier.ensure_dns(&iface, &plan, true).await.is_failed() {
                repairs.push(Repair::DnsRefresh);
            }
        }

        if repairs.is_empty() {
            TickOutcome::Degraded
        } else {
            TickOutcome::Repaired(repairs)
        }
    }

    /// Ping loss: re-apply everything, re-probe, reconnect if still lost.
    ///
    /// Carriers may block ICMP, so a persisting loss is never an error.
    async fn repair_reachability(
        &mut self,
        modem: ModemHandle,
        bearer: BearerHandle,
        plan: &AddressPlan,
        repairs: &mut Vec<Repair>,
    ) {
        let iface = self.settings.interface.clone();
        warn!(interface = %iface, "Ping failing, reconfiguring interface");
        match self.applier.apply(&iface, plan).await {
            Ok(report) if !report.changed().is_empty() => repairs.push(Repair::Reconfigured),
            Ok(_) => {}
            Err(e) => warn!(interface = %iface, "Reconfiguration failed: {}", e),
        }

        let retry = self.observer.ping().await;
        self.record_ping(modem, &retry).await;
        if retry.success {
            return;
        }

        warn!(bearer = %bearer, "Still unreachable after reconfiguration, reconnecting");
        match self.orchestrator.reconnect(bearer).await {
            Ok(()) => {
                repairs.push(Repair::Reconnected);
                match self.current_plan(bearer).await {
                    Ok(fresh) => {
                        if let Err(e) = self.applier.apply(&iface, &fresh).await {
                            warn!(interface = %iface, "Apply after reconnect failed: {}", e);
                        }
                    }
                    Err(e) => warn!(bearer = %bearer, "No IP config after reconnect: {}", e),
                }
            }
            Err(e) => warn!(
                bearer = %bearer,
                "Reconnect did not help, carrier may be filtering probes: {}",
                e
            ),
        }
    }

    async fn recover(&mut self, snapshot: &Snapshot) -> TickOutcome {
        let iface = self.settings.interface.clone();
        warn!(
            modem = %snapshot.modem,
            "Connection down (bearer connected: {}, {} has IP: {}), recovering",
            snapshot.state.bearer_connected,
            iface,
            snapshot.state.interface_has_ip
        );

        let report = self.orchestrator.recover(snapshot.modem, snapshot.bearer).await;
        let (Some(action), Some(bearer)) = (report.succeeded, report.bearer) else {
            return TickOutcome::RecoveryFailed;
        };

        let raw = match self.orchestrator.fetch_ip_config(bearer).await {
            Ok(raw) => raw,
            Err(WwanError::IncompleteConfig(reason)) => return TickOutcome::IncompleteConfig(reason),
            Err(e) => return TickOutcome::from(e),
        };
        let plan = self.planner.plan(&raw);

        let applied = match action {
            RecoveryAction::Recreate => self.applier.rebuild_routes(&iface, &plan).await,
            RecoveryAction::Reconnect => self.applier.apply(&iface, &plan).await,
        };
        match applied {
            Ok(report) => {
                for warning in report.warnings() {
                    warn!(interface = %iface, "{}", warning);
                }
                TickOutcome::Recovered(action)
            }
            Err(e) => TickOutcome::from(e),
        }
    }

    async fn current_plan(&self, bearer: BearerHandle) -> WwanResult<AddressPlan> {
        let raw = self.reader.ip_config(bearer).await?;
        Ok(self.planner.plan(&raw))
    }

    fn dns_fix_due(&self) -> bool {
        self.last_dns_fix
            .map_or(true, |at| at.elapsed() > self.settings.dns_repair_interval)
    }

    async fn record_ping(&mut self, modem: ModemHandle, ping: &PingOutcome) {
        match self.stats.record(ping) {
            PingTransition::Up => {
                debug!("Ping #{}: {:.1}ms", self.stats.pings(), ping.rtt_ms.unwrap_or_default())
            }
            PingTransition::Recovered(down) => info!(
                "✓ Connectivity recovered after {:.1}s downtime",
                down.as_secs_f64()
            ),
            PingTransition::WentDown | PingTransition::StillDown(_) => {
                let signal = match self.reader.signal_quality(modem).await {
                    Ok(Some(q)) => format!("{}%", q),
                    _ => "unknown".to_string(),
                };
                warn!(
                    "✗ Ping loss #{}: {} (signal: {})",
                    self.stats.failures(),
                    ping.error.as_deref().unwrap_or("no reply"),
                    signal
                );
            }
        }
        if self.stats.pings() % STATS_EVERY == 0 {
            info!("{}", self.stats.summary_line());
        }
    }
}

fn log_outcome(outcome: &TickOutcome) {
    match outcome {
        TickOutcome::Healthy => info!("✓ Check passed: {}", outcome),
        TickOutcome::Repaired(_) | TickOutcome::Recovered(_) => info!("✓ Check: {}", outcome),
        TickOutcome::NoModem | TickOutcome::Degraded | TickOutcome::IncompleteConfig(_) => {
            warn!("Check: {}", outcome)
        }
        TickOutcome::Error {
            severity: Severity::Fatal,
            ..
        } => error!("✗ Check: {}, needs attention before the next tick can succeed", outcome),
        TickOutcome::Error { .. } => warn!("Check: {}, retrying next tick", outcome),
        TickOutcome::RecoveryFailed => error!("✗ Check: {}", outcome),
    }
}
