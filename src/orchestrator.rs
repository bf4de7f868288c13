//! Connection orchestrator
//!
//! Drives modem and bearer through the bring-up sequence
//!
//! `Idle -> Enabling -> WaitingRegistration -> CleaningBearers -> CreatingBearer -> Connecting -> Connected`
//!
//! and provides the two recovery actions used by the reconciliation loop:
//! a cheap reconnect of the existing bearer and an expensive recreate.

use crate::error::{WwanError, WwanResult};
use crate::modem::{BearerHandle, IpType, ModemHandle, ModemStatusReader};
use crate::plan::AddressPlan;
use crate::retry::{retry_until, RetryPolicy};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectPhase {
    Idle,
    Enabling,
    WaitingRegistration,
    CleaningBearers,
    CreatingBearer,
    Connecting,
    Connected,
    Failed,
}

impl fmt::Display for ConnectPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectPhase::Idle => "idle",
            ConnectPhase::Enabling => "enabling",
            ConnectPhase::WaitingRegistration => "waiting for registration",
            ConnectPhase::CleaningBearers => "cleaning bearers",
            ConnectPhase::CreatingBearer => "creating bearer",
            ConnectPhase::Connecting => "connecting",
            ConnectPhase::Connected => "connected",
            ConnectPhase::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Settle delays and retry budgets of the bring-up sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTimings {
    /// Polling for the modem to appear
    pub detection: RetryPolicy,
    /// Wait after an enable request
    pub enable_settle: Duration,
    /// Registration polling
    pub registration: RetryPolicy,
    /// Wait after disconnecting bearers
    pub bearer_settle: Duration,
    /// Bearer connect attempts
    pub connect: RetryPolicy,
    /// Wait between connect and status confirmation
    pub connect_settle: Duration,
    /// Wait before the single IP configuration re-query
    pub ip_config_settle: Duration,
}

impl Default for ConnectTimings {
    fn default() -> Self {
        Self {
            detection: RetryPolicy::new(10, Duration::from_secs(2)),
            enable_settle: Duration::from_secs(3),
            registration: RetryPolicy::new(30, Duration::from_secs(1)),
            bearer_settle: Duration::from_secs(2),
            connect: RetryPolicy::new(3, Duration::from_secs(5)),
            connect_settle: Duration::from_secs(3),
            ip_config_settle: Duration::from_secs(3),
        }
    }
}

/// Bearer parameters requested from the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerSettings {
    pub apn: String,
    pub ip_type: IpType,
}

/// Result of a successful bring-up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub modem: ModemHandle,
    pub bearer: BearerHandle,
    /// Carrier addressing as reported, before planning
    pub carrier_config: AddressPlan,
    /// False when registration polling ran out and bring-up went ahead anyway
    pub registration_confirmed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecoveryAction {
    Reconnect,
    Recreate,
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryAction::Reconnect => write!(f, "reconnect"),
            RecoveryAction::Recreate => write!(f, "recreate"),
        }
    }
}

/// What a recovery escalation tried and where it ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Actions in the order they were attempted
    pub attempted: Vec<RecoveryAction>,
    /// The action that restored the bearer, if any
    pub succeeded: Option<RecoveryAction>,
    /// Bearer in effect after recovery
    pub bearer: Option<BearerHandle>,
}

pub struct ConnectionOrchestrator {
    reader: Arc<ModemStatusReader>,
    settings: BearerSettings,
    timings: ConnectTimings,
    phase: Mutex<ConnectPhase>,
}

impl ConnectionOrchestrator {
    pub fn new(reader: Arc<ModemStatusReader>, settings: BearerSettings, timings: ConnectTimings) -> Self {
        Self {
            reader,
            settings,
            timings,
            phase: Mutex::new(ConnectPhase::Idle),
        }
    }

    /// Last phase entered
    pub fn phase(&self) -> ConnectPhase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn enter(&self, phase: ConnectPhase) {
        debug!("Bring-up phase: {}", phase);
        *self.phase.lock().unwrap_or_else(|e| e.into_inner()) = phase;
    }

    /// Full bring-up from whatever state the modem is in
    pub async fn connect(&self) -> WwanResult<Connection> {
        self.enter(ConnectPhase::Idle);
        let result = self.bring_up().await;
        if let Err(e) = &result {
            error!("✗ Bring-up failed while {}: {}", self.phase(), e);
            self.enter(ConnectPhase::Failed);
        }
        result
    }

    async fn bring_up(&self) -> WwanResult<Connection> {
        let modem = self.detect_modem().await?;
        info!(modem = %modem, "Using modem {}", modem);

        self.enter(ConnectPhase::Enabling);
        self.enable(modem).await?;

        self.enter(ConnectPhase::WaitingRegistration);
        let registration_confirmed = self.wait_registration(modem).await;

        self.enter(ConnectPhase::CleaningBearers);
        self.clean_bearers(modem).await;

        self.enter(ConnectPhase::CreatingBearer);
        let bearer = self
            .reader
            .create_bearer(modem, &self.settings.apn, self.settings.ip_type)
            .await?;
        info!(modem = %modem, bearer = %bearer, "✓ Bearer {} created", bearer);

        self.enter(ConnectPhase::Connecting);
        self.connect_bearer(bearer).await?;

        let carrier_config = self.confirm_connected(bearer).await?;
        self.enter(ConnectPhase::Connected);
        info!(bearer = %bearer, "✓ Bearer connected");

        Ok(Connection {
            modem,
            bearer,
            carrier_config,
            registration_confirmed,
        })
    }

    /// Wait for a modem to be listed; other modem manager errors end the wait
    async fn detect_modem(&self) -> WwanResult<ModemHandle> {
        let reader = &self.reader;
        let detected = retry_until(&self.timings.detection, "modem detection", |attempt| async move {
            match reader.select_modem().await {
                Ok(modem) => Some(Ok(modem)),
                Err(WwanError::NoModemFound) => {
                    debug!("Modem detection attempt {}: no modem listed", attempt);
                    None
                }
                Err(e) => Some(Err(e)),
            }
        })
        .await;
        detected.unwrap_or(Err(WwanError::NoModemFound))
    }

    async fn enable(&self, modem: ModemHandle) -> WwanResult<()> {
        match self.reader.modem_state(modem).await {
            Ok(state) if state.is_enabled() => {
                debug!(modem = %modem, "Modem already enabled ({})", state);
                return Ok(());
            }
            Ok(state) => info!(modem = %modem, "Enabling modem (state: {})", state),
            Err(e) => warn!(modem = %modem, "Cannot read modem state, enabling anyway: {}", e),
        }
        self.reader.manager().enable_modem(modem).await?;
        sleep(self.timings.enable_settle).await;
        Ok(())
    }

    async fn wait_registration(&self, modem: ModemHandle) -> bool {
        let reader = &self.reader;
        let registered = retry_until(&self.timings.registration, "registration", |attempt| async move {
            match reader.modem_state(modem).await {
                Ok(state) if state.is_registered() => Some(state),
                Ok(state) => {
                    debug!(modem = %modem, "Registration attempt {}: {}", attempt, state);
                    None
                }
                Err(e) => {
                    debug!(modem = %modem, "Registration attempt {}: {}", attempt, e);
                    None
                }
            }
        })
        .await;

        match registered {
            Some(state) => {
                info!(modem = %modem, "✓ Network registration confirmed ({})", state);
                true
            }
            None => {
                warn!(
                    modem = %modem,
                    "Registration not confirmed after {} attempts, continuing anyway",
                    self.timings.registration.max_attempts
                );
                false
            }
        }
    }

    /// Disconnect every bearer on the modem; failures are logged only
    async fn clean_bearers(&self, modem: ModemHandle) {
        let bearers = match self.reader.modem_bearers(modem).await {
            Ok(bearers) => bearers,
            Err(e) => {
                warn!(modem = %modem, "Cannot list existing bearers: {}", e);
                return;
            }
        };
        if bearers.is_empty() {
            return;
        }
        for bearer in &bearers {
            match self.reader.manager().disconnect_bearer(*bearer).await {
                Ok(()) => debug!(bearer = %bearer, "Disconnected existing bearer"),
                Err(e) => warn!(bearer = %bearer, "Disconnect of existing bearer failed: {}", e),
            }
        }
        sleep(self.timings.bearer_settle).await;
    }

    async fn connect_bearer(&self, bearer: BearerHandle) -> WwanResult<()> {
        let manager = self.reader.manager();
        let connected = retry_until(&self.timings.connect, "bearer connect", |attempt| async move {
            match manager.connect_bearer(bearer).await {
                Ok(()) => Some(()),
                Err(e) => {
                    warn!(bearer = %bearer, "Connect attempt {} failed: {}", attempt, e);
                    None
                }
            }
        })
        .await;

        if connected.is_some() {
            return Ok(());
        }

        match self.reader.bearer_status(bearer).await {
            Ok(status) => error!(
                bearer = %bearer,
                "Bearer diagnostics: exists={} connected={}",
                status.exists,
                status.connected
            ),
            Err(e) => error!(bearer = %bearer, "Bearer diagnostics unavailable: {}", e),
        }
        Err(WwanError::BearerConnectFailed(format!(
            "bearer {} did not connect after {} attempt(s)",
            bearer, self.timings.connect.max_attempts
        )))
    }

    async fn confirm_connected(&self, bearer: BearerHandle) -> WwanResult<AddressPlan> {
        sleep(self.timings.connect_settle).await;
        let status = self.reader.bearer_status(bearer).await?;
        if !status.connected {
            return Err(WwanError::BearerConnectFailed(format!(
                "bearer {} reports not connected",
                bearer
            )));
        }
        self.fetch_ip_config(bearer).await
    }

    /// Carrier addressing, with one settle-and-retry if not yet available
    pub async fn fetch_ip_config(&self, bearer: BearerHandle) -> WwanResult<AddressPlan> {
        match self.reader.ip_config(bearer).await {
            Err(WwanError::IncompleteConfig(reason)) => {
                info!(bearer = %bearer, "IP configuration not ready ({}), re-querying", reason);
                sleep(self.timings.ip_config_settle).await;
                self.reader.ip_config(bearer).await
            }
            other => other,
        }
    }

    /// Disconnect then connect the existing bearer
    pub async fn reconnect(&self, bearer: BearerHandle) -> WwanResult<()> {
        info!(bearer = %bearer, "Reconnecting bearer");
        let manager = self.reader.manager();
        if let Err(e) = manager.disconnect_bearer(bearer).await {
            debug!(bearer = %bearer, "Disconnect before reconnect failed: {}", e);
        }
        sleep(self.timings.bearer_settle).await;

        manager
            .connect_bearer(bearer)
            .await
            .map_err(|e| WwanError::BearerConnectFailed(e.to_string()))?;
        sleep(self.timings.connect_settle).await;

        let status = self.reader.bearer_status(bearer).await?;
        if !status.connected {
            return Err(WwanError::BearerConnectFailed(format!(
                "bearer {} not connected after reconnect",
                bearer
            )));
        }
        Ok(())
    }

    /// Drop all bearers, create a fresh one and connect it
    pub async fn recreate(&self, modem: ModemHandle) -> WwanResult<BearerHandle> {
        info!(modem = %modem, "Recreating bearer");
        self.enable(modem).await?;
        self.clean_bearers(modem).await;

        let bearer = self
            .reader
            .create_bearer(modem, &self.settings.apn, self.settings.ip_type)
            .await?;
        self.connect_bearer(bearer).await?;
        sleep(self.timings.connect_settle).await;

        let status = self.reader.bearer_status(bearer).await?;
        if !status.connected {
            return Err(WwanError::BearerConnectFailed(format!(
                "new bearer {} not connected",
                bearer
            )));
        }
        Ok(bearer)
    }

    /// Reconnect first, recreate only if that fails.
    ///
    /// With no known bearer the reconnect targets the conventional id
    /// ([`BearerHandle::guess_for`]).
    pub async fn recover(&self, modem: ModemHandle, bearer: Option<BearerHandle>) -> RecoveryReport {
        let target = bearer.unwrap_or_else(|| {
            let guess = BearerHandle::guess_for(modem);
            debug!(modem = %modem, "No bearer known, trying bearer {}", guess);
            guess
        });
        let mut report = RecoveryReport {
            attempted: vec![RecoveryAction::Reconnect],
            succeeded: None,
            bearer: None,
        };

        match self.reconnect(target).await {
            Ok(()) => {
                info!(bearer = %target, "✓ Reconnect succeeded");
                report.succeeded = Some(RecoveryAction::Reconnect);
                report.bearer = Some(target);
                return report;
            }
            Err(e) => warn!(bearer = %target, "Reconnect failed, escalating to recreate: {}", e),
        }

        report.attempted.push(RecoveryAction::Recreate);
        match self.recreate(modem).await {
            Ok(new_bearer) => {
                info!(bearer = %new_bearer, "✓ Recreate succeeded");
                report.succeeded = Some(RecoveryAction::Recreate);
                report.bearer = Some(new_bearer);
            }
            Err(e) => error!(modem = %modem, "✗ Recreate failed, giving up until next check: {}", e),
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modem::status::ModemSelection;
    use crate::modem::MockModemManager;
    use mockall::predicate::*;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicU32, Ordering};

    const LISTING: &str = "    /org/freedesktop/ModemManager1/Modem/0 [Quectel] EC25\n";

    const CONNECTED_V4: &str = "  Status             |          connected: yes
  --------------------------------
  IPv4 configuration |             method: static
                     |            address: 10.19.145.184
                     |             prefix: 28
                     |            gateway: 10.19.145.185
                     |                dns: 10.177.0.34
";

    const CONNECTED_NO_IP: &str = "  Status             |          connected: yes\n";

    fn modem_report(state: &str, bearers: &[u32]) -> String {
        let mut out = format!("  Status   |                  state: {}\n", state);
        for (i, id) in bearers.iter().enumerate() {
            let label = if i == 0 { "  Bearer   |                  paths: " } else { "           |                         " };
            out.push_str(&format!("{}/org/freedesktop/ModemManager1/Bearer/{}\n", label, id));
        }
        out
    }

    fn orchestrator(mm: MockModemManager) -> ConnectionOrchestrator {
        let reader = Arc::new(ModemStatusReader::new(Arc::new(mm), ModemSelection::First));
        ConnectionOrchestrator::new(
            reader,
            BearerSettings {
                apn: "internet".to_string(),
                ip_type: IpType::Ipv4v6,
            },
            ConnectTimings::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_bring_up_uses_created_bearer_id() {
        let mut mm = MockModemManager::new();
        mm.expect_list_modems().returning(|| Ok(LISTING.to_string()));
        mm.expect_modem_report()
            .returning(|_| Ok(modem_report("registered", &[])));
        mm.expect_enable_modem().times(0);
        mm.expect_create_bearer()
            .with(eq(ModemHandle(0)), eq("internet"), eq(IpType::Ipv4v6))
            .times(1)
            .returning(|_, _, _| {
                Ok("Successfully created new bearer in modem: /org/freedesktop/ModemManager1/Bearer/5\n".to_string())
            });
        mm.expect_connect_bearer()
            .with(eq(BearerHandle(5)))
            .times(1)
            .returning(|_| Ok(()));
        mm.expect_bearer_report()
            .with(eq(BearerHandle(5)))
            .returning(|_| Ok(Some(CONNECTED_V4.to_string())));

        let orch = orchestrator(mm);
        let connection = orch.connect().await.unwrap();
        assert_eq!(connection.bearer, BearerHandle(5));
        assert!(connection.registration_confirmed);
        assert_eq!(connection.carrier_config.gateway, Ipv4Addr::new(10, 19, 145, 185));
        assert_eq!(orch.phase(), ConnectPhase::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_modem_is_enabled_and_old_bearers_dropped() {
        let enabled = Arc::new(AtomicU32::new(0));
        let flag = enabled.clone();
        let mut mm = MockModemManager::new();
        mm.expect_list_modems().returning(|| Ok(LISTING.to_string()));
        mm.expect_modem_report().returning(move |_| {
            let state = if flag.load(Ordering::SeqCst) > 0 { "registered" } else { "disabled" };
            Ok(modem_report(state, &[1, 2]))
        });
        let counter = enabled.clone();
        mm.expect_enable_modem().times(1).returning(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        mm.expect_disconnect_bearer()
            .with(eq(BearerHandle(1)))
            .times(1)
            .returning(|_| Ok(()));
        mm.expect_disconnect_bearer()
            .with(eq(BearerHandle(2)))
            .times(1)
            .returning(|_| {
                Err(WwanError::CommandFailed {
                    cmd: "mmcli".to_string(),
                    code: Some(1),
                    stderr: "already disconnected".to_string(),
                })
            });
        mm.expect_create_bearer()
            .returning(|_, _, _| Ok("/org/freedesktop/ModemManager1/Bearer/3".to_string()));
        mm.expect_connect_bearer().returning(|_| Ok(()));
        mm.expect_bearer_report()
            .returning(|_| Ok(Some(CONNECTED_V4.to_string())));

        let connection = orchestrator(mm).connect().await.unwrap();
        assert_eq!(connection.bearer, BearerHandle(3));
        assert_eq!(enabled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfirmed_registration_continues() {
        let mut mm = MockModemManager::new();
        mm.expect_list_modems().returning(|| Ok(LISTING.to_string()));
        mm.expect_modem_report()
            .returning(|_| Ok(modem_report("searching", &[])));
        mm.expect_create_bearer()
            .returning(|_, _, _| Ok("/org/freedesktop/ModemManager1/Bearer/1".to_string()));
        mm.expect_connect_bearer().returning(|_| Ok(()));
        mm.expect_bearer_report()
            .returning(|_| Ok(Some(CONNECTED_V4.to_string())));

        let connection = orchestrator(mm).connect().await.unwrap();
        assert!(!connection.registration_confirmed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_attempts_exhausted() {
        let mut mm = MockModemManager::new();
        mm.expect_list_modems().returning(|| Ok(LISTING.to_string()));
        mm.expect_modem_report()
            .returning(|_| Ok(modem_report("registered", &[])));
        mm.expect_create_bearer()
            .returning(|_, _, _| Ok("/org/freedesktop/ModemManager1/Bearer/1".to_string()));
        mm.expect_connect_bearer().times(3).returning(|_| {
            Err(WwanError::CommandFailed {
                cmd: "mmcli".to_string(),
                code: Some(1),
                stderr: "Serving network unavailable".to_string(),
            })
        });
        mm.expect_bearer_report()
            .returning(|_| Ok(Some("  Status |  connected: no\n".to_string())));

        let orch = orchestrator(mm);
        let err = orch.connect().await.unwrap_err();
        assert!(matches!(err, WwanError::BearerConnectFailed(_)));
        assert_eq!(orch.phase(), ConnectPhase::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unparseable_create_response() {
        let mut mm = MockModemManager::new();
        mm.expect_list_modems().returning(|| Ok(LISTING.to_string()));
        mm.expect_modem_report()
            .returning(|_| Ok(modem_report("registered", &[])));
        mm.expect_create_bearer()
            .returning(|_, _, _| Ok("error: operation not permitted\n".to_string()));
        mm.expect_connect_bearer().times(0);

        let err = orchestrator(mm).connect().await.unwrap_err();
        assert!(matches!(err, WwanError::BearerCreateFailed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_modem_to_appear() {
        let listings = Arc::new(AtomicU32::new(0));
        let counter = listings.clone();
        let mut mm = MockModemManager::new();
        mm.expect_list_modems().returning(move || {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Ok("No modems were found\n".to_string())
            } else {
                Ok(LISTING.to_string())
            }
        });
        mm.expect_modem_report()
            .returning(|_| Ok(modem_report("registered", &[])));
        mm.expect_create_bearer()
            .returning(|_, _, _| Ok("/org/freedesktop/ModemManager1/Bearer/1".to_string()));
        mm.expect_connect_bearer().returning(|_| Ok(()));
        mm.expect_bearer_report()
            .returning(|_| Ok(Some(CONNECTED_V4.to_string())));

        let connection = orchestrator(mm).connect().await.unwrap();
        assert_eq!(connection.modem, ModemHandle(0));
        assert_eq!(listings.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_modem_after_detection_budget() {
        let mut mm = MockModemManager::new();
        mm.expect_list_modems()
            .times(10)
            .returning(|| Ok("No modems were found\n".to_string()));

        let err = orchestrator(mm).connect().await.unwrap_err();
        assert!(matches!(err, WwanError::NoModemFound));
    }

    #[tokio::test]
    async fn test_modem_manager_outage_ends_detection() {
        let mut mm = MockModemManager::new();
        mm.expect_list_modems()
            .times(1)
            .returning(|| Err(WwanError::ModemManagerUnavailable("not running".to_string())));

        let err = orchestrator(mm).connect().await.unwrap_err();
        assert!(matches!(err, WwanError::ModemManagerUnavailable(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ip_config_requeried_once() {
        let queries = Arc::new(AtomicU32::new(0));
        let counter = queries.clone();
        let mut mm = MockModemManager::new();
        mm.expect_bearer_report().returning(move |_| {
            let text = if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                CONNECTED_NO_IP
            } else {
                CONNECTED_V4
            };
            Ok(Some(text.to_string()))
        });

        let plan = orchestrator(mm).fetch_ip_config(BearerHandle(1)).await.unwrap();
        assert_eq!(plan.ipv4_prefix_len, 28);
        assert_eq!(queries.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ip_config_still_missing_after_requery() {
        let mut mm = MockModemManager::new();
        mm.expect_bearer_report()
            .times(2)
            .returning(|_| Ok(Some(CONNECTED_NO_IP.to_string())));

        let err = orchestrator(mm).fetch_ip_config(BearerHandle(1)).await.unwrap_err();
        assert!(matches!(err, WwanError::IncompleteConfig(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recover_guesses_bearer_and_reconnects() {
        let mut mm = MockModemManager::new();
        mm.expect_disconnect_bearer()
            .with(eq(BearerHandle(1)))
            .returning(|_| Ok(()));
        mm.expect_connect_bearer()
            .with(eq(BearerHandle(1)))
            .times(1)
            .returning(|_| Ok(()));
        mm.expect_bearer_report()
            .returning(|_| Ok(Some(CONNECTED_V4.to_string())));
        mm.expect_create_bearer().times(0);

        let report = orchestrator(mm).recover(ModemHandle(0), None).await;
        assert_eq!(report.attempted, vec![RecoveryAction::Reconnect]);
        assert_eq!(report.succeeded, Some(RecoveryAction::Reconnect));
        assert_eq!(report.bearer, Some(BearerHandle(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recover_escalates_to_recreate() {
        let mut mm = MockModemManager::new();
        mm.expect_modem_report()
            .returning(|_| Ok(modem_report("registered", &[4])));
        mm.expect_disconnect_bearer().returning(|_| Ok(()));
        mm.expect_connect_bearer()
            .with(eq(BearerHandle(4)))
            .times(1)
            .returning(|_| {
                Err(WwanError::CommandFailed {
                    cmd: "mmcli".to_string(),
                    code: Some(1),
                    stderr: "bearer not found".to_string(),
                })
            });
        mm.expect_create_bearer()
            .times(1)
            .returning(|_, _, _| Ok("/org/freedesktop/ModemManager1/Bearer/5".to_string()));
        mm.expect_connect_bearer()
            .with(eq(BearerHandle(5)))
            .returning(|_| Ok(()));
        mm.expect_bearer_report()
            .with(eq(BearerHandle(5)))
            .returning(|_| Ok(Some(CONNECTED_V4.to_string())));

        let report = orchestrator(mm).recover(ModemHandle(0), Some(BearerHandle(4))).await;
        assert_eq!(
            report.attempted,
            vec![RecoveryAction::Reconnect, RecoveryAction::Recreate]
        );
        assert_eq!(report.succeeded, Some(RecoveryAction::Recreate));
        assert_eq!(report.bearer, Some(BearerHandle(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recover_gives_up_when_both_fail() {
        let mut mm = MockModemManager::new();
        mm.expect_modem_report()
            .returning(|_| Ok(modem_report("registered", &[])));
        mm.expect_disconnect_bearer().returning(|_| Ok(()));
        mm.expect_connect_bearer().returning(|_| {
            Err(WwanError::CommandFailed {
                cmd: "mmcli".to_string(),
                code: Some(1),
                stderr: "no service".to_string(),
            })
        });
        mm.expect_create_bearer()
            .returning(|_, _, _| Ok("/org/freedesktop/ModemManager1/Bearer/2".to_string()));
        mm.expect_bearer_report().returning(|_| Ok(None));

        let report = orchestrator(mm).recover(ModemHandle(0), Some(BearerHandle(1))).await;
        assert_eq!(report.succeeded, None);
        assert_eq!(report.bearer, None);
    }
}
