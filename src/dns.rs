//! Name-resolution configuration
//!
//! systemd-resolved is preferred when it is active; otherwise the flat
//! resolver file is rewritten. Both paths keep the given server order.

use crate::command::{args, run_checked, CommandRunner};
use crate::error::{WwanError, WwanResult};
use crate::validation;
use async_trait::async_trait;
use serde::Serialize;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

/// Default flat resolver file
pub const RESOLV_CONF: &str = "/etc/resolv.conf";

/// Which mechanism holds the interface's DNS servers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResolverBackend {
    /// systemd-resolved per-link servers
    Resolved,
    /// Flat `nameserver` lines
    ResolvConf,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Servers currently in effect for `iface`, in order
    async fn current_servers(&self, iface: &str) -> WwanResult<Vec<IpAddr>>;

    /// Install `servers` for `iface`, returning the mechanism that took them
    async fn set_servers(&self, iface: &str, servers: &[IpAddr]) -> WwanResult<ResolverBackend>;
}

pub struct SystemResolver {
    runner: Arc<dyn CommandRunner>,
    resolv_conf: PathBuf,
}

impl SystemResolver {
    pub fn new(runner: Arc<dyn CommandRunner>, resolv_conf: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            resolv_conf: resolv_conf.into(),
        }
    }

    /// systemd-resolved is running
    pub async fn resolved_active(&self) -> bool {
        match self
            .runner
            .run("systemctl", &args(&["is-active", "--quiet", "systemd-resolved"]))
            .await
        {
            Ok(output) => output.success(),
            Err(e) => {
                debug!("Cannot query systemd-resolved state: {}", e);
                false
            }
        }
    }

    async fn resolved_servers(&self, iface: &str) -> WwanResult<Vec<IpAddr>> {
        let out = run_checked(self.runner.as_ref(), "resolvectl", &args(&["dns", iface])).await?;
        Ok(parse_resolvectl_dns(&out))
    }

    async fn set_resolved(&self, iface: &str, servers: &[IpAddr]) -> WwanResult<()> {
        let mut argv = args(&["dns", iface]);
        argv.extend(servers.iter().map(|s| s.to_string()));
        run_checked(self.runner.as_ref(), "resolvectl", &argv).await?;
        Ok(())
    }

    async fn write_resolv_conf(&self, servers: &[IpAddr]) -> WwanResult<()> {
        write_resolv_conf(&self.resolv_conf, servers).await
    }
}

#[async_trait]
impl Resolver for SystemResolver {
    async fn current_servers(&self, iface: &str) -> WwanResult<Vec<IpAddr>> {
        validation::validate_interface_name(iface)?;
        if self.resolved_active().await {
            match self.resolved_servers(iface).await {
                Ok(servers) => return Ok(servers),
                Err(e) => warn!("resolvectl query failed, reading {}: {}", self.resolv_conf.display(), e),
            }
        }
        read_resolv_conf(&self.resolv_conf).await
    }

    async fn set_servers(&self, iface: &str, servers: &[IpAddr]) -> WwanResult<ResolverBackend> {
        validation::validate_interface_name(iface)?;
        if servers.is_empty() {
            return Err(WwanError::InvalidParameter(
                "Refusing to install an empty DNS server list".to_string(),
            ));
        }

        if self.resolved_active().await {
            match self.set_resolved(iface, servers).await {
                Ok(()) => {
                    info!(interface = iface, "DNS set via systemd-resolved");
                    return Ok(ResolverBackend::Resolved);
                }
                Err(e) => warn!(
                    "systemd-resolved rejected DNS update, falling back to {}: {}",
                    self.resolv_conf.display(),
                    e
                ),
            }
        }

        self.write_resolv_conf(servers).await?;
        info!(interface = iface, "DNS written to {}", self.resolv_conf.display());
        Ok(ResolverBackend::ResolvConf)
    }
}

/// `Link 5 (wwan0): 10.177.0.34 8.8.8.8`
pub fn parse_resolvectl_dns(output: &str) -> Vec<IpAddr> {
    output
        .lines()
        .filter_map(|line| line.split_once("):").map(|(_, rest)| rest))
        .flat_map(|rest| rest.split_whitespace())
        .filter_map(|s| s.parse().ok())
        .collect()
}

/// `nameserver` entries of a resolver file, in order
pub fn parse_resolv_conf(content: &str) -> Vec<IpAddr> {
    content
        .lines()
        .map(str::trim)
        .filter_map(|line| line.strip_prefix("nameserver"))
        .filter_map(|rest| rest.split_whitespace().next())
        .filter_map(|s| s.parse().ok())
        .collect()
}

pub async fn read_resolv_conf(path: &Path) -> WwanResult<Vec<IpAddr>> {
    match fs::read_to_string(path).await {
        Ok(content) => Ok(parse_resolv_conf(&content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

/// Replace the resolver file atomically (write temp file, rename)
pub async fn write_resolv_conf(path: &Path, servers: &[IpAddr]) -> WwanResult<()> {
    let mut content = String::from("# Generated by wwanctl\n");
    for server in servers {
        content.push_str(&format!("nameserver {}\n", server));
    }

    let tmp = path.with_extension("wwanctl.tmp");
    fs::write(&tmp, content).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}
