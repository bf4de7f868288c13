//! wwanctl - cellular connection CLI
//!
//! One-shot bring-up, read-only status and a ping monitor.
//!
//! # Usage
//!
//! ```bash
//! # Bring the modem online and configure wwan0
//! sudo wwanctl connect --apn internet
//!
//! # Check the connection (exit 0 when address, route and DNS are in place)
//! wwanctl status
//! wwanctl status --json
//!
//! # Watch connectivity for 30 minutes
//! wwanctl monitor --host 8.8.8.8 --interval 10 --duration 30
//! ```

use clap::{Parser, Subcommand};
use libwwanctl::config::WwanConfig;
use libwwanctl::diagnostics;
use libwwanctl::logging::init_logging;
use libwwanctl::monitor::{MonitorSettings, PingMonitor};
use libwwanctl::{IpType, Services, Severity, WwanError, WwanResult};
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "wwanctl")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Cellular modem connection manager", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Network interface of the modem
    #[arg(short, long, global = true)]
    interface: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Enable the modem, create and connect a bearer, configure the interface
    Connect {
        /// Access point name
        #[arg(long)]
        apn: Option<String>,

        /// Bearer IP family (ipv4, ipv6, ipv4v6)
        #[arg(long)]
        ip_type: Option<IpType>,
    },

    /// Show connection state without changing anything
    Status {
        /// Print the observed state as JSON
        #[arg(long)]
        json: bool,
    },

    /// Ping a host at a fixed interval and report loss and latency
    Monitor {
        /// Remote host to ping
        #[arg(long)]
        host: Option<String>,

        /// Ping interval in seconds
        #[arg(long, default_value_t = 10)]
        interval: u64,

        /// Ping timeout in seconds
        #[arg(long, default_value_t = 5)]
        timeout: u64,

        /// Run for N minutes (0 = until interrupted)
        #[arg(long, default_value_t = 0)]
        duration: u64,
    },
}

fn is_root() -> bool {
    #[cfg(unix)]
    {
        unsafe { libc::getuid() == 0 }
    }
    #[cfg(not(unix))]
    {
        false
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { cli.log_level.as_str() };
    if let Err(e) = init_logging(level, None) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let code = match &cli.command {
        Commands::Connect { .. } => handle_connect(&config).await,
        Commands::Status { json } => handle_status(&config, *json).await,
        Commands::Monitor {
            host,
            interval,
            timeout,
            duration,
        } => handle_monitor(&config, host.as_deref(), *interval, *timeout, *duration).await,
    };

    match code {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

/// File values, then command-line overrides, then validation
fn load_config(cli: &Cli) -> WwanResult<WwanConfig> {
    let mut config = WwanConfig::load_or_default(cli.config.as_deref())?;
    if let Some(iface) = &cli.interface {
        config.interface.name = iface.clone();
    }
    if let Commands::Connect { apn, ip_type } = &cli.command {
        if let Some(apn) = apn {
            config.modem.apn = apn.clone();
        }
        if let Some(ip_type) = ip_type {
            config.modem.ip_type = *ip_type;
        }
    }
    config.validate()?;
    Ok(config)
}

async fn handle_connect(config: &WwanConfig) -> WwanResult<i32> {
    if !is_root() {
        warn!("⚠️  Not running as root - interface configuration will likely fail");
    }

    let services = Services::from_config(config);
    info!(
        "Connecting {} with APN '{}' ({})",
        services.interface(),
        config.modem.apn,
        config.modem.ip_type
    );

    let summary = match services.connect().await {
        Ok(summary) => summary,
        Err(e) => {
            match e.severity() {
                Severity::Fatal => error!("✗ Connection failed: {}", e),
                _ => error!("✗ Connection failed: {} (may be transient, run connect again)", e),
            }
            return Ok(1);
        }
    };

    let plan = &summary.plan;
    let dns: Vec<String> = plan.dns_servers().iter().map(|d| d.to_string()).collect();
    println!();
    println!(
        "✓ Connected: modem {}, bearer {}",
        summary.connection.modem, summary.connection.bearer
    );
    println!("  Interface : {}", services.interface());
    println!("  Address   : {}/{}", plan.ipv4_address, plan.ipv4_prefix_len);
    println!("  Subnet    : {}", plan.subnet_route());
    println!("  Gateway   : {}", plan.gateway);
    println!("  DNS       : {}", dns.join(", "));
    println!("  MTU       : {}", plan.mtu);
    if !summary.connection.registration_confirmed {
        println!("  ⚠️  Network registration was not confirmed");
    }
    for warning in summary.report.warnings() {
        println!("  ⚠️  {}", warning);
    }
    Ok(0)
}

async fn handle_status(config: &WwanConfig, json: bool) -> WwanResult<i32> {
    let services = Services::from_config(config);
    let observer = services.observer();
    let diagnosis = diagnostics::diagnose(&observer, &services.reader, &services.applier).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&diagnosis)?);
    } else {
        for check in &diagnosis.checks {
            let marker = if check.ok { "OK  " } else { "FAIL" };
            println!("[{}] {:<12}: {}", marker, check.name, check.detail);
        }
    }

    Ok(if diagnosis.invariants_hold() { 0 } else { 1 })
}

async fn handle_monitor(
    config: &WwanConfig,
    host: Option<&str>,
    interval: u64,
    timeout: u64,
    duration: u64,
) -> WwanResult<i32> {
    if interval == 0 || timeout == 0 {
        return Err(WwanError::InvalidParameter(
            "interval and timeout must be positive".to_string(),
        ));
    }
    let host = host.unwrap_or(&config.probe.ping_target).to_string();
    libwwanctl::validation::validate_hostname(&host)?;

    let mut probe_config = config.clone();
    probe_config.timing.probe_timeout_secs = timeout;
    let services = Services::from_config(&probe_config);

    let settings = MonitorSettings {
        interface: services.interface().to_string(),
        host,
        interval: Duration::from_secs(interval),
        duration: (duration > 0).then(|| Duration::from_secs(duration.saturating_mul(60))),
    };

    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match wait_for_termination().await {
            Ok(()) => {
                let _ = tx.send(true);
            }
            Err(e) => error!("Signal handler error: {}", e),
        }
    });

    let mut monitor = PingMonitor::new(services.prober.clone(), Some(services.reader.clone()), settings);
    monitor.run(rx).await;
    Ok(0)
}

/// Resolve on SIGINT or SIGTERM
async fn wait_for_termination() -> WwanResult<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, stopping"),
            _ = sigint.recv() => info!("Received SIGINT, stopping"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C, stopping");
    }

    Ok(())
}
