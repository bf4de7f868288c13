//! Idempotent application of an address plan to the wwan interface
//!
//! Each step checks current state before mutating and a failed step does not
//! stop the ones after it: a half-applied interface is repaired by the next
//! reconciliation tick, an aborted one stays down.

use crate::dns::{Resolver, ResolverBackend};
use crate::error::{WwanError, WwanResult};
use crate::interface::{Destination, InterfaceAddress, NetworkStack, Route};
use crate::plan::AddressPlan;
use serde::Serialize;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ApplyStep {
    LinkUp,
    Mtu,
    Address,
    SubnetRoute,
    DefaultRoute,
    Dns,
}

impl fmt::Display for ApplyStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApplyStep::LinkUp => "link up",
            ApplyStep::Mtu => "mtu",
            ApplyStep::Address => "address",
            ApplyStep::SubnetRoute => "subnet route",
            ApplyStep::DefaultRoute => "default route",
            ApplyStep::Dns => "dns",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StepOutcome {
    /// Nothing to do
    AlreadySatisfied,
    /// State changed
    Applied,
    /// Step failed, later steps still ran
    Failed(String),
}

impl StepOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, StepOutcome::Failed(_))
    }
}

/// Per-step result of one apply pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub interface: String,
    pub steps: Vec<(ApplyStep, StepOutcome)>,
}

impl ApplyReport {
    fn new(iface: &str) -> Self {
        Self {
            interface: iface.to_string(),
            steps: Vec::new(),
        }
    }

    fn record(&mut self, step: ApplyStep, outcome: StepOutcome) {
        match &outcome {
            StepOutcome::AlreadySatisfied => info!("✓ {}: already in place", step),
            StepOutcome::Applied => info!("✓ {}: applied", step),
            StepOutcome::Failed(reason) => warn!("✗ {}: {}", step, reason),
        }
        self.steps.push((step, outcome));
    }

    pub fn outcome(&self, step: ApplyStep) -> Option<&StepOutcome> {
        self.steps.iter().find(|(s, _)| *s == step).map(|(_, o)| o)
    }

    /// Steps that changed something
    pub fn changed(&self) -> Vec<ApplyStep> {
        self.steps
            .iter()
            .filter(|(_, o)| *o == StepOutcome::Applied)
            .map(|(s, _)| *s)
            .collect()
    }

    /// Errors worth reporting to the caller
    pub fn warnings(&self) -> Vec<WwanError> {
        self.steps
            .iter()
            .filter_map(|(step, outcome)| match outcome {
                StepOutcome::Failed(reason) => Some(step_error(&self.interface, *step, reason)),
                _ => None,
            })
            .collect()
    }

    pub fn route_failed(&self) -> bool {
        self.steps.iter().any(|(s, o)| {
            matches!(s, ApplyStep::SubnetRoute | ApplyStep::DefaultRoute) && o.is_failed()
        })
    }

    pub fn is_complete(&self) -> bool {
        !self.steps.iter().any(|(_, o)| o.is_failed())
    }
}

fn step_error(iface: &str, step: ApplyStep, reason: &str) -> WwanError {
    let reason = reason.to_string();
    match step {
        ApplyStep::SubnetRoute | ApplyStep::DefaultRoute => WwanError::RouteApplyFailed {
            interface: iface.to_string(),
            reason,
        },
        ApplyStep::Address => WwanError::AddressConflict {
            interface: iface.to_string(),
            reason,
        },
        _ => WwanError::CommandFailed {
            cmd: step.to_string(),
            code: None,
            stderr: reason,
        },
    }
}

/// What the interface looks like right now
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InterfaceObservation {
    pub link_present: bool,
    pub link_up: bool,
    pub addresses: Vec<InterfaceAddress>,
    pub default_route: Option<Route>,
    pub route_count: usize,
    pub dns_servers: Vec<IpAddr>,
}

impl InterfaceObservation {
    pub fn has_ip(&self) -> bool {
        !self.addresses.is_empty()
    }
}

pub struct InterfaceApplier {
    stack: Arc<dyn NetworkStack>,
    resolver: Arc<dyn Resolver>,
    route_metric: Option<u32>,
}

impl InterfaceApplier {
    pub fn new(
        stack: Arc<dyn NetworkStack>,
        resolver: Arc<dyn Resolver>,
        route_metric: Option<u32>,
    ) -> Self {
        Self {
            stack,
            resolver,
            route_metric,
        }
    }

    /// Bring `iface` in line with `plan`.
    ///
    /// Only a missing interface is an error; every other failure is recorded in
    /// the report and the remaining steps still run.
    pub async fn apply(&self, iface: &str, plan: &AddressPlan) -> WwanResult<ApplyReport> {
        info!(interface = iface, "Applying {}", plan);
        let link = self
            .stack
            .link(iface)
            .await?
            .ok_or_else(|| WwanError::LinkNotFound(iface.to_string()))?;

        let mut report = ApplyReport::new(iface);

        let outcome = if link.up {
            StepOutcome::AlreadySatisfied
        } else {
            to_outcome(self.stack.set_link_up(iface).await)
        };
        report.record(ApplyStep::LinkUp, outcome);

        let outcome = if link.mtu == plan.mtu {
            StepOutcome::AlreadySatisfied
        } else {
            to_outcome(self.stack.set_mtu(iface, plan.mtu).await)
        };
        report.record(ApplyStep::Mtu, outcome);

        report.record(ApplyStep::Address, self.ensure_address(iface, plan).await);
        report.record(ApplyStep::SubnetRoute, self.ensure_subnet_route(iface, plan).await);
        report.record(ApplyStep::DefaultRoute, self.ensure_default_route(iface, plan).await);
        report.record(ApplyStep::Dns, self.ensure_dns(iface, plan, false).await);

        Ok(report)
    }

    async fn ensure_address(&self, iface: &str, plan: &AddressPlan) -> StepOutcome {
        let wanted = InterfaceAddress {
            address: plan.ipv4_address,
            prefix_len: plan.ipv4_prefix_len,
        };
        match self.stack.addresses(iface).await {
            Ok(current) if current.contains(&wanted) => return StepOutcome::AlreadySatisfied,
            Ok(current) => {
                if let Some(other) = current.iter().find(|a| a.address == wanted.address) {
                    warn!(
                        interface = iface,
                        "{} present with prefix /{}, adding /{}",
                        other.address,
                        other.prefix_len,
                        wanted.prefix_len
                    );
                }
            }
            Err(e) => return StepOutcome::Failed(format!("cannot read addresses: {}", e)),
        }
        to_outcome(self.stack.add_address(iface, wanted).await)
    }

    async fn ensure_subnet_route(&self, iface: &str, plan: &AddressPlan) -> StepOutcome {
        let subnet = plan.subnet_route();
        match self.stack.routes().await {
            Ok(routes) => {
                let present = routes.iter().any(|r| {
                    r.dev == iface && r.destination == Destination::Subnet(subnet)
                });
                if present {
                    return StepOutcome::AlreadySatisfied;
                }
            }
            Err(e) => return StepOutcome::Failed(format!("cannot read routes: {}", e)),
        }
        to_outcome(
            self.stack
                .add_route(&Route::subnet(subnet, iface, self.route_metric))
                .await,
        )
    }

    /// Default route via the plan's gateway on `iface`.
    ///
    /// A default on this interface with another gateway is replaced. Defaults
    /// through other interfaces are left alone; see [`Self::rebuild_routes`].
    pub async fn ensure_default_route(&self, iface: &str, plan: &AddressPlan) -> StepOutcome {
        let wanted = Route::default_via(plan.gateway, iface, self.route_metric);
        let routes = match self.stack.routes().await {
            Ok(routes) => routes,
            Err(e) => return StepOutcome::Failed(format!("cannot read routes: {}", e)),
        };

        let ours: Vec<&Route> = routes
            .iter()
            .filter(|r| r.is_default() && r.dev == iface)
            .collect();
        if ours.iter().any(|r| r.gateway == Some(plan.gateway)) {
            return StepOutcome::AlreadySatisfied;
        }

        let others = routes
            .iter()
            .filter(|r| r.is_default() && r.dev != iface)
            .count();
        if others > 0 {
            warn!(
                interface = iface,
                "{} default route(s) via other interfaces present, leaving them in place",
                others
            );
        }

        let result = if ours.is_empty() {
            self.stack.add_route(&wanted).await
        } else {
            info!(interface = iface, "Replacing stale default route");
            self.stack.replace_route(&wanted).await
        };
        to_outcome(result)
    }

    /// Install the plan's DNS servers; `force` rewrites even if they match
    pub async fn ensure_dns(&self, iface: &str, plan: &AddressPlan, force: bool) -> StepOutcome {
        let wanted = plan.dns_servers();
        if !force {
            match self.resolver.current_servers(iface).await {
                Ok(current) if current == wanted => return StepOutcome::AlreadySatisfied,
                Ok(_) => {}
                Err(e) => warn!(interface = iface, "Cannot read resolver state: {}", e),
            }
        }
        match self.resolver.set_servers(iface, &wanted).await {
            Ok(backend) => {
                if backend == ResolverBackend::ResolvConf {
                    info!(interface = iface, "DNS configured through resolver file");
                }
                StepOutcome::Applied
            }
            Err(e) => StepOutcome::Failed(e.to_string()),
        }
    }

    /// Flush-and-rebuild used after a bearer recreate.
    ///
    /// Removes every default route (all interfaces) and all routes and
    /// addresses of `iface`, then applies the plan from scratch.
    pub async fn rebuild_routes(&self, iface: &str, plan: &AddressPlan) -> WwanResult<ApplyReport> {
        if self.stack.link(iface).await?.is_none() {
            return Err(WwanError::LinkNotFound(iface.to_string()));
        }
        info!(interface = iface, "Flushing routes and addresses before rebuild");

        match self.stack.routes().await {
            Ok(routes) => {
                for route in routes.iter().filter(|r| r.is_default() && r.dev != iface) {
                    if let Err(e) = self.stack.delete_route(route).await {
                        warn!("Failed to remove default route {}: {}", route, e);
                    }
                }
            }
            Err(e) => warn!("Cannot read routes: {}", e),
        }
        if let Err(e) = self.stack.flush_routes(iface).await {
            warn!(interface = iface, "Route flush failed: {}", e);
        }
        if let Err(e) = self.stack.flush_addresses(iface).await {
            warn!(interface = iface, "Address flush failed: {}", e);
        }

        self.apply(iface, plan).await
    }

    /// Read-only snapshot of the interface
    pub async fn observe(&self, iface: &str) -> WwanResult<InterfaceObservation> {
        let Some(link) = self.stack.link(iface).await? else {
            return Ok(InterfaceObservation::default());
        };
        let addresses = self.stack.addresses(iface).await?;
        let routes = self.stack.routes().await?;
        let dns_servers = match self.resolver.current_servers(iface).await {
            Ok(servers) => servers,
            Err(e) => {
                warn!(interface = iface, "Cannot read resolver state: {}", e);
                Vec::new()
            }
        };

        Ok(InterfaceObservation {
            link_present: true,
            link_up: link.up,
            addresses,
            default_route: routes
                .iter()
                .find(|r| r.is_default() && r.dev == iface)
                .cloned(),
            route_count: routes.iter().filter(|r| r.dev == iface).count(),
            dns_servers,
        })
    }
}

fn to_outcome(result: WwanResult<()>) -> StepOutcome {
    match result {
        Ok(()) => StepOutcome::Applied,
        Err(e) => StepOutcome::Failed(e.to_string()),
    }
}
