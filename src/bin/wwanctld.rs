//! Cellular connection daemon (wwanctld)
//!
//! Keeps the modem connected and the wwan interface configured, checking
//! every INTERVAL seconds and repairing whatever drifted.
//!
//! # Usage
//!
//! ```bash
//! # Check every 30 seconds (default)
//! sudo wwanctld
//!
//! # Check every 60 seconds, log to /data/logs/wwanctld.log
//! sudo WWANCTL_LOG_DIR=/data/logs wwanctld 60
//! ```

use clap::Parser;
use libwwanctl::command::SystemCommandRunner;
use libwwanctl::config::WwanConfig;
use libwwanctl::diagnostics::competing_managers;
use libwwanctl::error::{WwanError, WwanResult};
use libwwanctl::logging::{init_logging, prepare_log_file, resolve_log_dir};
use libwwanctl::Services;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Cellular connection daemon
#[derive(Parser, Debug)]
#[command(name = "wwanctld")]
#[command(version)]
#[command(about = "Cellular connection daemon - keeps the modem online and the interface configured", long_about = None)]
struct Args {
    /// Seconds between checks (overrides daemon.check_interval_secs)
    interval: Option<u64>,

    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Shared state for signal handling
struct DaemonState {
    shutdown: watch::Sender<bool>,
}

impl DaemonState {
    fn new() -> (Self, watch::Receiver<bool>) {
        let (shutdown, rx) = watch::channel(false);
        (Self { shutdown }, rx)
    }

    fn stop(&self) {
        let _ = self.shutdown.send(true);
        info!("Daemon stop requested, finishing current check");
    }
}

#[tokio::main]
async fn main() -> WwanResult<()> {
    let args = Args::parse();

    let mut config = WwanConfig::load_or_default(args.config.as_deref())?;
    if let Some(interval) = args.interval {
        config.daemon.check_interval_secs = interval;
    }
    config.validate()?;
    let daemon = config.daemon_config();

    let log_dir = resolve_log_dir(daemon.log_sink.as_deref());
    let log_file = match prepare_log_file(&log_dir) {
        Ok(path) => Some(path),
        Err(e) => {
            eprintln!("Warning: {} - logging to console only", e);
            None
        }
    };
    let level = if args.verbose { "debug" } else { args.log_level.as_str() };
    init_logging(level, log_file.as_deref())?;

    info!("Starting cellular connection daemon (wwanctld)");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &log_file {
        info!("Logging to {}", path.display());
    }

    #[cfg(target_os = "linux")]
    {
        let uid = unsafe { libc::getuid() };
        if uid != 0 {
            warn!("⚠️  Not running as root - interface configuration will fail");
        }
    }

    let runner = SystemCommandRunner::new(config.command_timeout());
    for manager in competing_managers(&runner, &config.interface.name).await {
        warn!("⚠️  {} is active and may reconfigure {}", manager, config.interface.name);
    }

    let (state, shutdown) = DaemonState::new();
    let state = Arc::new(state);
    let state_clone = state.clone();
    tokio::spawn(async move {
        if let Err(e) = handle_signals(state_clone).await {
            error!("Signal handler error: {}", e);
        }
    });

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  Cellular connection daemon is ready");
    info!("    • Interface:      {}", config.interface.name);
    info!("    • APN:            {} ({})", daemon.apn, daemon.ip_type);
    info!("    • Check interval: {}s", daemon.check_interval.as_secs());
    info!("    • Ping target:    {}", config.probe.ping_target);
    info!("    • DNS probe:      {}", config.probe.dns_probe_host);
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let services = Services::from_config(&config);
    let mut reconciler = services.reconciliation_loop();
    reconciler.run(shutdown).await;

    info!("Cellular connection daemon stopped");
    Ok(())
}

/// Handle Unix signals (SIGTERM, SIGINT, SIGHUP)
async fn handle_signals(state: Arc<DaemonState>) -> WwanResult<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate()).map_err(|e| {
            WwanError::ConfigError(format!("Failed to register SIGTERM handler: {}", e))
        })?;
        let mut sigint = signal(SignalKind::interrupt()).map_err(|e| {
            WwanError::ConfigError(format!("Failed to register SIGINT handler: {}", e))
        })?;
        let mut sighup = signal(SignalKind::hangup()).map_err(|e| {
            WwanError::ConfigError(format!("Failed to register SIGHUP handler: {}", e))
        })?;

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                    state.stop();
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                    state.stop();
                    break;
                }
                _ = sighup.recv() => {
                    warn!("Received SIGHUP; configuration is fixed at startup, restart to change it");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C, initiating graceful shutdown");
        state.stop();
    }

    Ok(())
}
