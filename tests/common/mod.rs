//! In-memory fakes of the modem manager, network stack, resolver and prober
//!
//! The modem fake renders real mmcli-style text so the whole parsing path is
//! exercised. Every fake records its calls for ordering assertions.

#![allow(dead_code)]

use async_trait::async_trait;
use libwwanctl::config::WwanConfig;
use libwwanctl::dns::{Resolver, ResolverBackend};
use libwwanctl::interface::{Destination, InterfaceAddress, LinkInfo, NetworkStack, Route};
use libwwanctl::modem::{BearerHandle, IpType, ModemHandle, ModemManager};
use libwwanctl::probe::{PingOutcome, Prober};
use libwwanctl::{Services, WwanError, WwanResult};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

pub const IFACE: &str = "wwan0";

/// Carrier addressing handed to a bearer when it connects
#[derive(Debug, Clone)]
pub struct CarrierIpv4 {
    pub address: String,
    pub prefix: u8,
    pub gateway: String,
    pub dns: Vec<String>,
}

impl CarrierIpv4 {
    pub fn typical() -> Self {
        Self {
            address: "10.19.145.184".to_string(),
            prefix: 28,
            gateway: "10.19.145.185".to_string(),
            dns: vec!["10.177.0.34".to_string()],
        }
    }
}

#[derive(Debug, Clone)]
pub struct FakeBearer {
    pub id: u32,
    pub connected: bool,
    pub ipv4: Option<CarrierIpv4>,
}

#[derive(Debug)]
pub struct ModemWorld {
    pub modems: Vec<u32>,
    pub state: String,
    pub signal: u8,
    pub bearers: Vec<FakeBearer>,
    pub next_bearer: u32,
    /// Addressing a bearer receives on connect; `None` simulates a bearer
    /// that connects without an IPv4 section
    pub ip_on_connect: Option<CarrierIpv4>,
    /// Bearers whose connect request fails
    pub failing_connects: HashSet<u32>,
    pub calls: Vec<String>,
}

pub struct FakeModemManager {
    world: Mutex<ModemWorld>,
}

impl FakeModemManager {
    /// One registered modem (id 0) without bearers
    pub fn new() -> Self {
        Self::with_modems(vec![0])
    }

    pub fn with_modems(modems: Vec<u32>) -> Self {
        let next_bearer = modems.first().map(|m| m + 1).unwrap_or(1);
        Self {
            world: Mutex::new(ModemWorld {
                modems,
                state: "registered".to_string(),
                signal: 67,
                bearers: Vec::new(),
                next_bearer,
                ip_on_connect: Some(CarrierIpv4::typical()),
                failing_connects: HashSet::new(),
                calls: Vec::new(),
            }),
        }
    }

    pub fn world(&self) -> std::sync::MutexGuard<'_, ModemWorld> {
        self.world.lock().unwrap()
    }

    pub fn calls(&self) -> Vec<String> {
        self.world().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.world().calls.clear();
    }

    /// Position of the first call equal to `call`
    pub fn position(&self, call: &str) -> Option<usize> {
        self.calls().iter().position(|c| c == call)
    }

    pub fn add_bearer(&self, id: u32, connected: bool, ipv4: Option<CarrierIpv4>) {
        let mut world = self.world();
        world.bearers.push(FakeBearer { id, connected, ipv4 });
        world.next_bearer = world.next_bearer.max(id + 1);
    }

    pub fn set_bearer_connected(&self, id: u32, connected: bool) {
        if let Some(b) = self.world().bearers.iter_mut().find(|b| b.id == id) {
            b.connected = connected;
        }
    }
}

fn render_modem(world: &ModemWorld, modem: u32) -> String {
    let mut out = format!(
        "  --------------------------------\n  General  |                   path: /org/freedesktop/ModemManager1/Modem/{}\n  --------------------------------\n  Status   |                  state: {}\n           |         signal quality: {}% (recent)\n  --------------------------------\n  3GPP     |           registration: home\n",
        modem, world.state, world.signal
    );
    if !world.bearers.is_empty() {
        out.push_str("  --------------------------------\n");
        for (i, bearer) in world.bearers.iter().enumerate() {
            let label = if i == 0 { "  Bearer   |                  paths: " } else { "           |                         " };
            out.push_str(&format!(
                "{}/org/freedesktop/ModemManager1/Bearer/{}\n",
                label, bearer.id
            ));
        }
    }
    out
}

fn render_bearer(bearer: &FakeBearer) -> String {
    let mut out = format!(
        "  --------------------------------\n  General            |               path: /org/freedesktop/ModemManager1/Bearer/{}\n  --------------------------------\n  Status             |          connected: {}\n                     |          interface: {}\n",
        bearer.id,
        if bearer.connected { "yes" } else { "no" },
        IFACE
    );
    if let (true, Some(ip)) = (bearer.connected, &bearer.ipv4) {
        out.push_str(&format!(
            "  --------------------------------\n  IPv4 configuration |             method: static\n                     |            address: {}\n                     |             prefix: {}\n                     |            gateway: {}\n",
            ip.address, ip.prefix, ip.gateway
        ));
        if !ip.dns.is_empty() {
            out.push_str(&format!(
                "                     |                dns: {}\n",
                ip.dns.join(", ")
            ));
        }
    }
    out
}

#[async_trait]
impl ModemManager for FakeModemManager {
    async fn list_modems(&self) -> WwanResult<String> {
        let mut world = self.world();
        world.calls.push("list".to_string());
        if world.modems.is_empty() {
            return Ok("No modems were found\n".to_string());
        }
        Ok(world
            .modems
            .iter()
            .map(|m| format!("    /org/freedesktop/ModemManager1/Modem/{} [Quectel] EC25\n", m))
            .collect())
    }

    async fn modem_report(&self, modem: ModemHandle) -> WwanResult<String> {
        let mut world = self.world();
        world.calls.push(format!("modem {}", modem));
        if !world.modems.contains(&modem.0) {
            return Err(WwanError::CommandFailed {
                cmd: "mmcli".to_string(),
                code: Some(1),
                stderr: "couldn't find modem".to_string(),
            });
        }
        Ok(render_modem(&world, modem.0))
    }

    async fn enable_modem(&self, modem: ModemHandle) -> WwanResult<()> {
        let mut world = self.world();
        world.calls.push(format!("enable {}", modem));
        world.state = "registered".to_string();
        Ok(())
    }

    async fn create_bearer(&self, modem: ModemHandle, _apn: &str, _ip_type: IpType) -> WwanResult<String> {
        let mut world = self.world();
        world.calls.push(format!("create {}", modem));
        let id = world.next_bearer;
        world.next_bearer += 1;
        world.bearers.push(FakeBearer {
            id,
            connected: false,
            ipv4: None,
        });
        Ok(format!(
            "Successfully created new bearer in modem: /org/freedesktop/ModemManager1/Bearer/{}\n",
            id
        ))
    }

    async fn connect_bearer(&self, bearer: BearerHandle) -> WwanResult<()> {
        let mut world = self.world();
        world.calls.push(format!("connect {}", bearer));
        let failing = world.failing_connects.contains(&bearer.0);
        let ip = world.ip_on_connect.clone();
        match world.bearers.iter_mut().find(|b| b.id == bearer.0) {
            Some(_) if failing => Err(WwanError::CommandFailed {
                cmd: "mmcli".to_string(),
                code: Some(1),
                stderr: "couldn't connect the bearer".to_string(),
            }),
            Some(b) => {
                b.connected = true;
                b.ipv4 = ip;
                Ok(())
            }
            None => Err(WwanError::CommandFailed {
                cmd: "mmcli".to_string(),
                code: Some(1),
                stderr: "couldn't find bearer".to_string(),
            }),
        }
    }

    async fn disconnect_bearer(&self, bearer: BearerHandle) -> WwanResult<()> {
        let mut world = self.world();
        world.calls.push(format!("disconnect {}", bearer));
        if let Some(b) = world.bearers.iter_mut().find(|b| b.id == bearer.0) {
            b.connected = false;
        }
        Ok(())
    }

    async fn bearer_report(&self, bearer: BearerHandle) -> WwanResult<Option<String>> {
        let mut world = self.world();
        world.calls.push(format!("bearer {}", bearer));
        Ok(world
            .bearers
            .iter()
            .find(|b| b.id == bearer.0)
            .map(render_bearer))
    }
}

#[derive(Debug, Default)]
pub struct StackState {
    pub links: HashMap<String, LinkInfo>,
    pub addresses: HashMap<String, Vec<InterfaceAddress>>,
    pub routes: Vec<Route>,
    /// Mutating calls only
    pub mutations: Vec<String>,
}

pub struct FakeNetworkStack {
    state: Mutex<StackState>,
}

impl FakeNetworkStack {
    /// `wwan0` present and down, nothing configured
    pub fn new() -> Self {
        let mut state = StackState::default();
        state.links.insert(
            IFACE.to_string(),
            LinkInfo {
                name: IFACE.to_string(),
                up: false,
                mtu: 1500,
            },
        );
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn without_link() -> Self {
        Self {
            state: Mutex::new(StackState::default()),
        }
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, StackState> {
        self.state.lock().unwrap()
    }

    pub fn mutation_count(&self) -> usize {
        self.state().mutations.len()
    }

    pub fn routes(&self) -> Vec<Route> {
        self.state().routes.clone()
    }

    pub fn default_routes(&self) -> Vec<Route> {
        self.routes().into_iter().filter(|r| r.is_default()).collect()
    }

    pub fn remove_default_routes(&self, dev: &str) {
        self.state().routes.retain(|r| !(r.is_default() && r.dev == dev));
    }

    pub fn push_route(&self, route: Route) {
        self.state().routes.push(route);
    }
}

#[async_trait]
impl NetworkStack for FakeNetworkStack {
    async fn link(&self, iface: &str) -> WwanResult<Option<LinkInfo>> {
        Ok(self.state().links.get(iface).cloned())
    }

    async fn set_link_up(&self, iface: &str) -> WwanResult<()> {
        let mut state = self.state();
        state.mutations.push(format!("link {} up", iface));
        match state.links.get_mut(iface) {
            Some(link) => {
                link.up = true;
                Ok(())
            }
            None => Err(WwanError::LinkNotFound(iface.to_string())),
        }
    }

    async fn set_mtu(&self, iface: &str, mtu: u32) -> WwanResult<()> {
        let mut state = self.state();
        state.mutations.push(format!("mtu {} {}", iface, mtu));
        if let Some(link) = state.links.get_mut(iface) {
            link.mtu = mtu;
        }
        Ok(())
    }

    async fn addresses(&self, iface: &str) -> WwanResult<Vec<InterfaceAddress>> {
        Ok(self.state().addresses.get(iface).cloned().unwrap_or_default())
    }

    async fn add_address(&self, iface: &str, address: InterfaceAddress) -> WwanResult<()> {
        let mut state = self.state();
        state
            .mutations
            .push(format!("addr add {}/{} dev {}", address.address, address.prefix_len, iface));
        let list = state.addresses.entry(iface.to_string()).or_default();
        if !list.contains(&address) {
            list.push(address);
        }
        Ok(())
    }

    async fn flush_addresses(&self, iface: &str) -> WwanResult<()> {
        let mut state = self.state();
        state.mutations.push(format!("addr flush dev {}", iface));
        state.addresses.remove(iface);
        Ok(())
    }

    async fn routes(&self) -> WwanResult<Vec<Route>> {
        Ok(self.state().routes.clone())
    }

    async fn add_route(&self, route: &Route) -> WwanResult<()> {
        let mut state = self.state();
        state.mutations.push(format!("route add {}", route));
        if !state.routes.contains(route) {
            state.routes.push(route.clone());
        }
        Ok(())
    }

    async fn replace_route(&self, route: &Route) -> WwanResult<()> {
        let mut state = self.state();
        state.mutations.push(format!("route replace {}", route));
        state
            .routes
            .retain(|r| !(r.destination == route.destination && r.dev == route.dev));
        state.routes.push(route.clone());
        Ok(())
    }

    async fn delete_route(&self, route: &Route) -> WwanResult<()> {
        let mut state = self.state();
        state.mutations.push(format!("route del {}", route));
        state.routes.retain(|r| r != route);
        Ok(())
    }

    async fn flush_routes(&self, iface: &str) -> WwanResult<()> {
        let mut state = self.state();
        state.mutations.push(format!("route flush dev {}", iface));
        state.routes.retain(|r| r.dev != iface);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeResolver {
    servers: Mutex<HashMap<String, Vec<IpAddr>>>,
    writes: Mutex<usize>,
}

impl FakeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> usize {
        *self.writes.lock().unwrap()
    }

    pub fn servers(&self, iface: &str) -> Vec<IpAddr> {
        self.servers.lock().unwrap().get(iface).cloned().unwrap_or_default()
    }

    pub fn clear(&self, iface: &str) {
        self.servers.lock().unwrap().remove(iface);
    }
}

#[async_trait]
impl Resolver for FakeResolver {
    async fn current_servers(&self, iface: &str) -> WwanResult<Vec<IpAddr>> {
        Ok(self.servers(iface))
    }

    async fn set_servers(&self, iface: &str, servers: &[IpAddr]) -> WwanResult<ResolverBackend> {
        *self.writes.lock().unwrap() += 1;
        self.servers
            .lock()
            .unwrap()
            .insert(iface.to_string(), servers.to_vec());
        Ok(ResolverBackend::ResolvConf)
    }
}

pub struct FakeProber {
    ping_ok: Mutex<bool>,
    resolve_ok: Mutex<bool>,
    pings: Mutex<usize>,
}

impl FakeProber {
    pub fn new() -> Self {
        Self {
            ping_ok: Mutex::new(true),
            resolve_ok: Mutex::new(true),
            pings: Mutex::new(0),
        }
    }

    pub fn set_ping_ok(&self, ok: bool) {
        *self.ping_ok.lock().unwrap() = ok;
    }

    pub fn set_resolve_ok(&self, ok: bool) {
        *self.resolve_ok.lock().unwrap() = ok;
    }

    pub fn pings(&self) -> usize {
        *self.pings.lock().unwrap()
    }
}

#[async_trait]
impl Prober for FakeProber {
    async fn ping(&self, _iface: &str, _host: &str) -> PingOutcome {
        *self.pings.lock().unwrap() += 1;
        if *self.ping_ok.lock().unwrap() {
            PingOutcome::reply(42.0)
        } else {
            PingOutcome::lost("Ping timeout")
        }
    }

    async fn resolve(&self, host: &str) -> WwanResult<Vec<IpAddr>> {
        if *self.resolve_ok.lock().unwrap() {
            Ok(vec!["142.250.185.78".parse().unwrap()])
        } else {
            Err(WwanError::Timeout(format!("resolving {}", host)))
        }
    }
}

/// All fakes plus services wired over them
pub struct Harness {
    pub modem: Arc<FakeModemManager>,
    pub stack: Arc<FakeNetworkStack>,
    pub resolver: Arc<FakeResolver>,
    pub prober: Arc<FakeProber>,
    pub services: Services,
}

impl Harness {
    pub fn new(modem: FakeModemManager, stack: FakeNetworkStack) -> Self {
        Self::with_config(modem, stack, &WwanConfig::default())
    }

    pub fn with_config(modem: FakeModemManager, stack: FakeNetworkStack, config: &WwanConfig) -> Self {
        let modem = Arc::new(modem);
        let stack = Arc::new(stack);
        let resolver = Arc::new(FakeResolver::new());
        let prober = Arc::new(FakeProber::new());
        let services = Services::with_backends(
            config,
            modem.clone(),
            stack.clone(),
            resolver.clone(),
            prober.clone(),
        );
        Self {
            modem,
            stack,
            resolver,
            prober,
            services,
        }
    }

    /// Harness after a successful one-shot connect
    pub async fn connected() -> Self {
        let harness = Self::new(FakeModemManager::new(), FakeNetworkStack::new());
        harness
            .services
            .connect()
            .await
            .expect("bring-up over fakes succeeds");
        harness.modem.clear_calls();
        harness
    }

    pub fn wwan_default_route(&self) -> Option<Route> {
        self.stack
            .routes()
            .into_iter()
            .find(|r| r.destination == Destination::Default && r.dev == IFACE)
    }
}
