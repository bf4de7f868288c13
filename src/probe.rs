//! Connectivity probes: ICMP through the wwan interface and name resolution

use crate::command::{args, CommandRunner};
use crate::error::{WwanError, WwanResult};
use crate::validation;
use async_trait::async_trait;
use serde::Serialize;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::lookup_host;
use tokio::time::{timeout, Instant};
use tracing::debug;

/// Extra time granted to the ping process beyond its own reply deadline
const PING_GRACE: Duration = Duration::from_secs(2);

/// Result of a single echo request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PingOutcome {
    pub success: bool,
    pub rtt_ms: Option<f64>,
    pub error: Option<String>,
}

impl PingOutcome {
    pub fn reply(rtt_ms: f64) -> Self {
        Self {
            success: true,
            rtt_ms: Some(rtt_ms),
            error: None,
        }
    }

    pub fn lost(error: impl Into<String>) -> Self {
        Self {
            success: false,
            rtt_ms: None,
            error: Some(error.into()),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Prober: Send + Sync {
    /// One echo request to `host` out of `iface`. Never fails; loss is an outcome.
    async fn ping(&self, iface: &str, host: &str) -> PingOutcome;

    /// Resolve `host` through the system resolver
    async fn resolve(&self, host: &str) -> WwanResult<Vec<IpAddr>>;
}

/// `ping` binary plus the system resolver, both under a hard deadline
pub struct SystemProber {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl SystemProber {
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }

    async fn ping_target(&self, host: &str) -> Result<IpAddr, String> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(ip);
        }
        match self.resolve(host).await {
            Ok(addrs) => addrs
                .iter()
                .find(|a| a.is_ipv4())
                .or_else(|| addrs.first())
                .copied()
                .ok_or_else(|| format!("DNS resolution failed: no addresses for {}", host)),
            Err(e) => Err(format!("DNS resolution failed: {}", e)),
        }
    }
}

#[async_trait]
impl Prober for SystemProber {
    async fn ping(&self, iface: &str, host: &str) -> PingOutcome {
        if let Err(e) = validation::validate_interface_name(iface) {
            return PingOutcome::lost(e.to_string());
        }
        let target = match self.ping_target(host).await {
            Ok(ip) => ip,
            Err(e) => return PingOutcome::lost(e),
        };

        let wait = self.timeout.as_secs().max(1).to_string();
        let mut argv = args(&["-I", iface, "-c", "1", "-W", wait.as_str()]);
        argv.push(target.to_string());

        let start = Instant::now();
        let result = timeout(self.timeout + PING_GRACE, self.runner.run("ping", &argv)).await;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        match result {
            Err(_) => PingOutcome::lost("Ping timeout"),
            Ok(Err(WwanError::Timeout(_))) => PingOutcome::lost("Ping timeout"),
            Ok(Err(e)) => PingOutcome::lost(e.to_string()),
            Ok(Ok(output)) if output.success() => {
                PingOutcome::reply(parse_ping_rtt(&output.stdout).unwrap_or(elapsed_ms))
            }
            Ok(Ok(output)) => {
                let stderr = output.stderr.trim();
                if stderr.is_empty() {
                    PingOutcome::lost("Ping failed")
                } else {
                    PingOutcome::lost(stderr)
                }
            }
        }
    }

    async fn resolve(&self, host: &str) -> WwanResult<Vec<IpAddr>> {
        validation::validate_hostname(host)?;
        let lookup = timeout(self.timeout, lookup_host((host, 0)))
            .await
            .map_err(|_| WwanError::Timeout(format!("resolving {}", host)))??;
        let addrs: Vec<IpAddr> = lookup.map(|sa| sa.ip()).collect();
        debug!("{} resolved to {:?}", host, addrs);
        Ok(addrs)
    }
}

/// Round-trip time from a `time=12.3 ms` reply line
pub fn parse_ping_rtt(output: &str) -> Option<f64> {
    output.lines().find_map(|line| {
        let (_, rest) = line.split_once("time=")?;
        let value = rest.split_whitespace().next()?;
        value.trim_end_matches("ms").parse().ok()
    })
}
