//! Network interface and routing table access
//!
//! [`NetworkStack`] is the set of OS primitives the applier needs.
//! [`IpCommand`] implements it with iproute2's JSON output.

use crate::command::{args, run_checked, CommandRunner};
use crate::error::{WwanError, WwanResult};
use crate::plan::Ipv4Subnet;
use crate::validation;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;

/// Link attributes relevant to the wwan interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkInfo {
    pub name: String,
    /// Administratively up
    pub up: bool,
    pub mtu: u32,
}

/// IPv4 address assigned to an interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InterfaceAddress {
    pub address: Ipv4Addr,
    pub prefix_len: u8,
}

/// Route destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Destination {
    Default,
    Subnet(Ipv4Subnet),
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Default => write!(f, "default"),
            Destination::Subnet(s) => write!(f, "{}", s),
        }
    }
}

/// IPv4 main-table route
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Route {
    pub destination: Destination,
    pub gateway: Option<Ipv4Addr>,
    pub dev: String,
    pub metric: Option<u32>,
}

impl Route {
    pub fn default_via(gateway: Ipv4Addr, dev: &str, metric: Option<u32>) -> Self {
        Self {
            destination: Destination::Default,
            gateway: Some(gateway),
            dev: dev.to_string(),
            metric,
        }
    }

    pub fn subnet(subnet: Ipv4Subnet, dev: &str, metric: Option<u32>) -> Self {
        Self {
            destination: Destination::Subnet(subnet),
            gateway: None,
            dev: dev.to_string(),
            metric,
        }
    }

    pub fn is_default(&self) -> bool {
        self.destination == Destination::Default
    }

    /// `ip route` selector arguments for this route
    fn to_args(&self) -> Vec<String> {
        let mut out = vec![self.destination.to_string()];
        if let Some(gw) = self.gateway {
            out.push("via".to_string());
            out.push(gw.to_string());
        }
        out.push("dev".to_string());
        out.push(self.dev.clone());
        if let Some(metric) = self.metric {
            out.push("metric".to_string());
            out.push(metric.to_string());
        }
        out
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_args().join(" "))
    }
}

/// OS networking primitives, each a single imperative call
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NetworkStack: Send + Sync {
    /// Link attributes, `None` if the interface does not exist
    async fn link(&self, iface: &str) -> WwanResult<Option<LinkInfo>>;

    async fn set_link_up(&self, iface: &str) -> WwanResult<()>;

    async fn set_mtu(&self, iface: &str, mtu: u32) -> WwanResult<()>;

    /// IPv4 addresses on the interface
    async fn addresses(&self, iface: &str) -> WwanResult<Vec<InterfaceAddress>>;

    async fn add_address(&self, iface: &str, address: InterfaceAddress) -> WwanResult<()>;

    async fn flush_addresses(&self, iface: &str) -> WwanResult<()>;

    /// All IPv4 routes of the main table
    async fn routes(&self) -> WwanResult<Vec<Route>>;

    async fn add_route(&self, route: &Route) -> WwanResult<()>;

    async fn replace_route(&self, route: &Route) -> WwanResult<()>;

    async fn delete_route(&self, route: &Route) -> WwanResult<()>;

    /// Remove every route through the interface
    async fn flush_routes(&self, iface: &str) -> WwanResult<()>;
}

#[derive(Debug, Deserialize)]
struct JsonLink {
    ifname: String,
    #[serde(default)]
    flags: Vec<String>,
    #[serde(default)]
    mtu: u32,
}

#[derive(Debug, Deserialize)]
struct JsonAddrInfo {
    family: String,
    local: String,
    prefixlen: u8,
}

#[derive(Debug, Deserialize)]
struct JsonAddrIface {
    #[serde(default)]
    addr_info: Vec<JsonAddrInfo>,
}

#[derive(Debug, Deserialize)]
struct JsonRoute {
    dst: String,
    #[serde(default)]
    gateway: Option<String>,
    #[serde(default)]
    dev: Option<String>,
    #[serde(default)]
    metric: Option<u32>,
}

/// iproute2 backend
pub struct IpCommand {
    runner: Arc<dyn CommandRunner>,
}

impl IpCommand {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn run_ip(&self, argv: Vec<String>) -> WwanResult<String> {
        run_checked(self.runner.as_ref(), "ip", &argv).await
    }
}

fn already_exists(err: &WwanError) -> bool {
    matches!(err, WwanError::CommandFailed { stderr, .. } if stderr.contains("File exists"))
}

fn parse_links(json: &str) -> WwanResult<Vec<LinkInfo>> {
    let links: Vec<JsonLink> = serde_json::from_str(json)?;
    Ok(links
        .into_iter()
        .map(|l| LinkInfo {
            up: l.flags.iter().any(|f| f == "UP"),
            name: l.ifname,
            mtu: l.mtu,
        })
        .collect())
}

fn parse_addresses(json: &str) -> WwanResult<Vec<InterfaceAddress>> {
    let ifaces: Vec<JsonAddrIface> = serde_json::from_str(json)?;
    Ok(ifaces
        .into_iter()
        .flat_map(|i| i.addr_info)
        .filter(|a| a.family == "inet")
        .filter_map(|a| {
            Some(InterfaceAddress {
                address: a.local.parse().ok()?,
                prefix_len: a.prefixlen,
            })
        })
        .collect())
}

fn parse_routes(json: &str) -> WwanResult<Vec<Route>> {
    let routes: Vec<JsonRoute> = serde_json::from_str(json)?;
    Ok(routes
        .into_iter()
        .filter_map(|r| {
            let destination = if r.dst == "default" {
                Destination::Default
            } else {
                Destination::Subnet(r.dst.parse().ok()?)
            };
            Some(Route {
                destination,
                gateway: r.gateway.and_then(|g| g.parse().ok()),
                dev: r.dev.unwrap_or_default(),
                metric: r.metric,
            })
        })
        .collect())
}

#[async_trait]
impl NetworkStack for IpCommand {
    async fn link(&self, iface: &str) -> WwanResult<Option<LinkInfo>> {
        validation::validate_interface_name(iface)?;
        let output = self
            .runner
            .run("ip", &args(&["-json", "link", "show", "dev", iface]))
            .await?;
        if !output.success() {
            if output.stderr.contains("does not exist") {
                return Ok(None);
            }
            return Err(WwanError::CommandFailed {
                cmd: format!("ip -json link show dev {}", iface),
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(parse_links(&output.stdout)?.into_iter().next())
    }

    async fn set_link_up(&self, iface: &str) -> WwanResult<()> {
        validation::validate_interface_name(iface)?;
        self.run_ip(args(&["link", "set", "dev", iface, "up"])).await.map(|_| ())
    }

    async fn set_mtu(&self, iface: &str, mtu: u32) -> WwanResult<()> {
        validation::validate_interface_name(iface)?;
        validation::validate_mtu(mtu)?;
        let mtu_str = mtu.to_string();
        self.run_ip(args(&["link", "set", "dev", iface, "mtu", &mtu_str]))
            .await
            .map(|_| ())
    }

    async fn addresses(&self, iface: &str) -> WwanResult<Vec<InterfaceAddress>> {
        validation::validate_interface_name(iface)?;
        let json = self
            .run_ip(args(&["-json", "-4", "addr", "show", "dev", iface]))
            .await?;
        parse_addresses(&json)
    }

    async fn add_address(&self, iface: &str, address: InterfaceAddress) -> WwanResult<()> {
        validation::validate_interface_name(iface)?;
        validation::validate_prefix_len(address.prefix_len, false)?;
        let cidr = format!("{}/{}", address.address, address.prefix_len);
        match self.run_ip(args(&["addr", "add", &cidr, "dev", iface])).await {
            Err(e) if already_exists(&e) => Ok(()),
            other => other.map(|_| ()),
        }
    }

    async fn flush_addresses(&self, iface: &str) -> WwanResult<()> {
        validation::validate_interface_name(iface)?;
        self.run_ip(args(&["addr", "flush", "dev", iface])).await.map(|_| ())
    }

    async fn routes(&self) -> WwanResult<Vec<Route>> {
        // `dev` is omitted from the JSON when filtering by device, so list all
        let json = self.run_ip(args(&["-json", "-4", "route", "show"])).await?;
        parse_routes(&json)
    }

    async fn add_route(&self, route: &Route) -> WwanResult<()> {
        validation::validate_interface_name(&route.dev)?;
        let mut argv = args(&["route", "add"]);
        argv.extend(route.to_args());
        match self.run_ip(argv).await {
            Err(e) if already_exists(&e) => Ok(()),
            other => other.map(|_| ()),
        }
    }

    async fn replace_route(&self, route: &Route) -> WwanResult<()> {
        validation::validate_interface_name(&route.dev)?;
        let mut argv = args(&["route", "replace"]);
        argv.extend(route.to_args());
        self.run_ip(argv).await.map(|_| ())
    }

    async fn delete_route(&self, route: &Route) -> WwanResult<()> {
        validation::validate_interface_name(&route.dev)?;
        let mut argv = args(&["route", "del"]);
        argv.extend(route.to_args());
        self.run_ip(argv).await.map(|_| ())
    }

    async fn flush_routes(&self, iface: &str) -> WwanResult<()> {
        validation::validate_interface_name(iface)?;
        self.run_ip(args(&["route", "flush", "dev", iface])).await.map(|_| ())
    }
}
