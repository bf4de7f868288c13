//! wwanctl - cellular modem connection management
//!
//! Brings a ModemManager-controlled modem online and keeps it there:
//! - Modem and bearer status parsing (mmcli)
//! - Address planning (subnet route, DNS fallback policy, fixed MTU)
//! - Idempotent interface configuration (ip, systemd-resolved or resolv.conf)
//! - Bring-up state machine with reconnect and recreate recovery
//! - Reconciliation loop with targeted repairs and connectivity statistics

pub mod error;
pub mod validation;
pub mod command;
pub mod retry;
pub mod modem;
pub mod plan;
pub mod interface;
pub mod dns;
pub mod apply;
pub mod orchestrator;
pub mod probe;
pub mod stats;
pub mod state;
pub mod reconcile;
pub mod config;
pub mod logging;
pub mod diagnostics;
pub mod monitor;
pub mod services;

// Re-export commonly used types
pub use error::{Severity, WwanError, WwanResult};
pub use command::{CommandOutput, CommandRunner, SystemCommandRunner};
pub use modem::{BearerHandle, IpType, ModemHandle, ModemManager, ModemState, ModemStatusReader};
pub use plan::{AddressPlan, AddressPlanner, DnsPolicy};
pub use interface::{IpCommand, NetworkStack, Route};
pub use dns::{Resolver, SystemResolver};
pub use apply::{ApplyReport, InterfaceApplier};
pub use orchestrator::{ConnectionOrchestrator, RecoveryAction};
pub use probe::{PingOutcome, Prober, SystemProber};
pub use state::{ConnectionState, StateObserver};
pub use reconcile::{ReconciliationLoop, TickOutcome};
pub use config::{DaemonConfig, WwanConfig};
pub use services::Services;
