//! Component wiring
//!
//! Builds the reader, planner, applier, orchestrator and prober from a
//! validated configuration, either over the real system tools or over
//! caller-supplied backends.

use crate::apply::{ApplyReport, InterfaceApplier};
use crate::command::{CommandRunner, SystemCommandRunner};
use crate::config::WwanConfig;
use crate::dns::{Resolver, SystemResolver};
use crate::error::{Severity, WwanResult};
use crate::interface::{IpCommand, NetworkStack};
use crate::modem::{Mmcli, ModemManager, ModemStatusReader};
use crate::orchestrator::{Connection, ConnectionOrchestrator};
use crate::plan::{AddressPlan, AddressPlanner};
use crate::probe::{Prober, SystemProber};
use crate::reconcile::{ReconcileSettings, ReconciliationLoop};
use crate::state::{ProbeTargets, StateObserver};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Outcome of a one-shot bring-up
#[derive(Debug, Clone)]
pub struct ConnectSummary {
    pub connection: Connection,
    pub plan: AddressPlan,
    pub report: ApplyReport,
}

pub struct Services {
    pub reader: Arc<ModemStatusReader>,
    pub planner: AddressPlanner,
    pub applier: Arc<InterfaceApplier>,
    pub orchestrator: Arc<ConnectionOrchestrator>,
    pub prober: Arc<dyn Prober>,
    interface: String,
    targets: ProbeTargets,
    settings: ReconcileSettings,
}

impl Services {
    /// Real backends: mmcli, ip, systemd-resolved or the resolver file, ping
    pub fn from_config(config: &WwanConfig) -> Self {
        let runner: Arc<dyn CommandRunner> =
            Arc::new(SystemCommandRunner::new(config.command_timeout()));
        Self::with_backends(
            config,
            Arc::new(Mmcli::new(runner.clone())),
            Arc::new(IpCommand::new(runner.clone())),
            Arc::new(SystemResolver::new(runner.clone(), &config.dns.resolv_conf)),
            Arc::new(SystemProber::new(runner, config.probe_timeout())),
        )
    }

    pub fn with_backends(
        config: &WwanConfig,
        manager: Arc<dyn ModemManager>,
        stack: Arc<dyn NetworkStack>,
        resolver: Arc<dyn Resolver>,
        prober: Arc<dyn Prober>,
    ) -> Self {
        let reader = Arc::new(ModemStatusReader::new(manager, config.modem.selection));
        let applier = Arc::new(InterfaceApplier::new(
            stack,
            resolver,
            config.interface.route_metric,
        ));
        let orchestrator = Arc::new(ConnectionOrchestrator::new(
            reader.clone(),
            config.bearer_settings(),
            config.connect_timings(),
        ));

        Self {
            reader,
            planner: AddressPlanner::new(config.dns_policy(), config.interface.mtu),
            applier,
            orchestrator,
            prober,
            interface: config.interface.name.clone(),
            targets: config.probe_targets(),
            settings: config.reconcile_settings(),
        }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn observer(&self) -> StateObserver {
        StateObserver::new(
            self.reader.clone(),
            self.applier.clone(),
            self.prober.clone(),
            self.interface.clone(),
            self.targets.clone(),
        )
    }

    pub fn reconciliation_loop(&self) -> ReconciliationLoop {
        ReconciliationLoop::new(
            self.observer(),
            self.orchestrator.clone(),
            self.reader.clone(),
            self.planner.clone(),
            self.applier.clone(),
            self.settings.clone(),
        )
    }

    /// Full bring-up followed by one apply pass
    pub async fn connect(&self) -> WwanResult<ConnectSummary> {
        let connection = self.orchestrator.connect().await?;
        if !connection.registration_confirmed {
            warn!("Connected without confirmed network registration");
        }

        let plan = self.planner.plan(&connection.carrier_config);
        let report = self.applier.apply(&self.interface, &plan).await?;
        for warning in report.warnings() {
            match warning.severity() {
                Severity::Warning => warn!(interface = %self.interface, "{}", warning),
                _ => error!(interface = %self.interface, "{}", warning),
            }
        }
        info!(interface = %self.interface, "Applied {}", plan);

        Ok(ConnectSummary {
            connection,
            plan,
            report,
        })
    }
}
