//! Address planning
//!
//! Turns the carrier's raw addressing into the plan the applier installs:
//! derived subnet route, DNS ordering with public fallbacks, configured MTU.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::{debug, warn};

/// MTU assumed when the carrier reports none
pub const DEFAULT_MTU: u32 = 1500;

/// Public IPv4 resolver appended to every plan
pub const FALLBACK_DNS_V4: Ipv4Addr = Ipv4Addr::new(8, 8, 8, 8);

/// Public IPv6 resolver used when the carrier's is missing or not routable
pub const FALLBACK_DNS_V6: Ipv6Addr = Ipv6Addr::new(0x2001, 0x4860, 0x4860, 0, 0, 0, 0, 0x8888);

/// Netmasks for the prefix lengths this deployment supports
const MASK_TABLE: [(u8, Ipv4Addr); 9] = [
    (24, Ipv4Addr::new(255, 255, 255, 0)),
    (25, Ipv4Addr::new(255, 255, 255, 128)),
    (26, Ipv4Addr::new(255, 255, 255, 192)),
    (27, Ipv4Addr::new(255, 255, 255, 224)),
    (28, Ipv4Addr::new(255, 255, 255, 240)),
    (29, Ipv4Addr::new(255, 255, 255, 248)),
    (30, Ipv4Addr::new(255, 255, 255, 252)),
    (31, Ipv4Addr::new(255, 255, 255, 254)),
    (32, Ipv4Addr::new(255, 255, 255, 255)),
];

const MIN_PREFIX: u8 = 24;
const MAX_PREFIX: u8 = 32;

/// IPv4 network in CIDR form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ipv4Subnet {
    pub network: Ipv4Addr,
    pub prefix_len: u8,
}

impl Ipv4Subnet {
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        let mask = if self.prefix_len == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(self.prefix_len.min(32)))
        };
        u32::from(addr) & mask == u32::from(self.network)
    }
}

impl fmt::Display for Ipv4Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

impl std::str::FromStr for Ipv4Subnet {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = s.split_once('/').unwrap_or((s, "32"));
        let network = addr.parse().map_err(|_| format!("invalid network: {}", s))?;
        let prefix_len = prefix
            .parse::<u8>()
            .ok()
            .filter(|p| *p <= 32)
            .ok_or_else(|| format!("invalid prefix: {}", s))?;
        Ok(Self { network, prefix_len })
    }
}

/// IPv6 addressing reported by the carrier (informational)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipv6Info {
    pub address: Ipv6Addr,
    pub prefix_len: u8,
}

/// Addressing for the wwan interface.
///
/// As returned by the status reader it is the carrier's raw view; after
/// [`AddressPlanner::plan`] it is what gets applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressPlan {
    pub ipv4_address: Ipv4Addr,
    pub ipv4_prefix_len: u8,
    pub gateway: Ipv4Addr,
    /// Carrier servers first, then fallbacks
    pub ipv4_dns: Vec<Ipv4Addr>,
    pub ipv6: Option<Ipv6Info>,
    pub ipv6_dns: Vec<Ipv6Addr>,
    pub mtu: u32,
}

impl AddressPlan {
    /// Network route derived from address and prefix
    pub fn subnet_route(&self) -> Ipv4Subnet {
        subnet_for(self.ipv4_address, self.ipv4_prefix_len)
    }

    /// Resolver list in effective order: IPv4 servers, then IPv6
    pub fn dns_servers(&self) -> Vec<IpAddr> {
        self.ipv4_dns
            .iter()
            .copied()
            .map(IpAddr::V4)
            .chain(self.ipv6_dns.iter().copied().map(IpAddr::V6))
            .collect()
    }
}

impl fmt::Display for AddressPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dns: Vec<String> = self.dns_servers().iter().map(|d| d.to_string()).collect();
        write!(
            f,
            "{}/{} gw {} dns [{}] mtu {}",
            self.ipv4_address,
            self.ipv4_prefix_len,
            self.gateway,
            dns.join(", "),
            self.mtu
        )
    }
}

/// Resolver fallback policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsPolicy {
    /// Appended after the carrier's IPv4 servers
    pub ipv4_fallback: Vec<Ipv4Addr>,
    /// Substituted for a missing or non-routable carrier IPv6 server
    pub ipv6_fallback: Ipv6Addr,
}

impl Default for DnsPolicy {
    fn default() -> Self {
        Self {
            ipv4_fallback: vec![FALLBACK_DNS_V4],
            ipv6_fallback: FALLBACK_DNS_V6,
        }
    }
}

/// Netmask and effective prefix for `prefix_len`.
///
/// Out-of-table prefixes are clamped to the nearest supported entry.
pub fn mask_for_prefix(prefix_len: u8) -> (Ipv4Addr, u8) {
    let effective = prefix_len.clamp(MIN_PREFIX, MAX_PREFIX);
    if effective != prefix_len {
        warn!(
            "Prefix /{} outside supported range /{}-/{}, using /{}",
            prefix_len, MIN_PREFIX, MAX_PREFIX, effective
        );
    }
    let mask = MASK_TABLE
        .iter()
        .find(|(p, _)| *p == effective)
        .map(|(_, m)| *m)
        .unwrap_or(MASK_TABLE[0].1);
    (mask, effective)
}

/// `address & mask(prefix)` combined with the effective prefix
pub fn subnet_for(address: Ipv4Addr, prefix_len: u8) -> Ipv4Subnet {
    let (mask, effective) = mask_for_prefix(prefix_len);
    Ipv4Subnet {
        network: Ipv4Addr::from(u32::from(address) & u32::from(mask)),
        prefix_len: effective,
    }
}

/// 10/8, 172.16/12 or 192.168/16
pub fn is_private_v4(addr: Ipv4Addr) -> bool {
    addr.is_private()
}

/// fe80::/10
pub fn is_link_local_v6(addr: Ipv6Addr) -> bool {
    addr.segments()[0] & 0xffc0 == 0xfe80
}

/// fc00::/7
pub fn is_unique_local_v6(addr: Ipv6Addr) -> bool {
    addr.segments()[0] & 0xfe00 == 0xfc00
}

#[derive(Debug, Clone)]
pub struct AddressPlanner {
    policy: DnsPolicy,
    mtu: u32,
}

impl AddressPlanner {
    pub fn new(policy: DnsPolicy, mtu: u32) -> Self {
        Self { policy, mtu }
    }

    pub fn policy(&self) -> &DnsPolicy {
        &self.policy
    }

    /// Derive the applied plan from the carrier's raw addressing
    pub fn plan(&self, raw: &AddressPlan) -> AddressPlan {
        let (_, prefix_len) = mask_for_prefix(raw.ipv4_prefix_len);

        let mut ipv4_dns: Vec<Ipv4Addr> = Vec::new();
        for server in &raw.ipv4_dns {
            if is_private_v4(*server) {
                debug!("Carrier DNS {} is a private resolver, keeping it as primary", server);
            }
            if !ipv4_dns.contains(server) {
                ipv4_dns.push(*server);
            }
        }
        if ipv4_dns.is_empty() {
            warn!("Carrier provided no IPv4 DNS, using fallback resolvers only");
        }
        for fallback in &self.policy.ipv4_fallback {
            if !ipv4_dns.contains(fallback) {
                ipv4_dns.push(*fallback);
            }
        }
        if ipv4_dns.is_empty() {
            ipv4_dns.push(FALLBACK_DNS_V4);
        }

        let ipv6_dns = if raw.ipv6.is_some() || !raw.ipv6_dns.is_empty() {
            match raw.ipv6_dns.first() {
                Some(server) if !is_link_local_v6(*server) && !is_unique_local_v6(*server) => {
                    raw.ipv6_dns.clone()
                }
                Some(server) => {
                    debug!(
                        "Carrier IPv6 DNS {} is not globally routable, using {}",
                        server, self.policy.ipv6_fallback
                    );
                    vec![self.policy.ipv6_fallback]
                }
                None => vec![self.policy.ipv6_fallback],
            }
        } else {
            Vec::new()
        };

        AddressPlan {
            ipv4_address: raw.ipv4_address,
            ipv4_prefix_len: prefix_len,
            gateway: raw.gateway,
            ipv4_dns,
            ipv6: raw.ipv6,
            ipv6_dns,
            mtu: self.mtu,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(address: [u8; 4], prefix: u8, gateway: [u8; 4]) -> AddressPlan {
        AddressPlan {
            ipv4_address: Ipv4Addr::from(address),
            ipv4_prefix_len: prefix,
            gateway: Ipv4Addr::from(gateway),
            ipv4_dns: Vec::new(),
            ipv6: None,
            ipv6_dns: Vec::new(),
            mtu: DEFAULT_MTU,
        }
    }

    fn planner() -> AddressPlanner {
        AddressPlanner::new(DnsPolicy::default(), 1430)
    }

    #[test]
    fn test_carrier_slash_28() {
        let plan = raw([10, 19, 145, 184], 28, [10, 19, 145, 185]);
        let subnet = plan.subnet_route();
        assert_eq!(subnet.to_string(), "10.19.145.176/28");
        assert!(subnet.contains(plan.ipv4_address));
        assert!(subnet.contains(plan.gateway));
    }

    #[test]
    fn test_subnet_is_address_and_mask_for_supported_prefixes() {
        let addresses = [
            Ipv4Addr::new(10, 19, 145, 184),
            Ipv4Addr::new(100, 64, 7, 255),
            Ipv4Addr::new(192, 168, 1, 1),
            Ipv4Addr::new(37, 80, 3, 129),
        ];
        for prefix in 24..=32u8 {
            let (mask, effective) = mask_for_prefix(prefix);
            assert_eq!(effective, prefix);
            let expected_mask = u32::MAX << (32 - u32::from(prefix));
            assert_eq!(u32::from(mask), expected_mask);
            for addr in addresses {
                let subnet = subnet_for(addr, prefix);
                assert_eq!(u32::from(subnet.network), u32::from(addr) & u32::from(mask));
                assert_eq!(subnet.prefix_len, prefix);
                assert!(subnet.contains(addr));
            }
        }
    }

    #[test]
    fn test_out_of_range_prefix_clamps() {
        let subnet = subnet_for(Ipv4Addr::new(10, 1, 2, 3), 16);
        assert_eq!(subnet.to_string(), "10.1.2.0/24");
        let plan = planner().plan(&raw([10, 1, 2, 3], 8, [10, 1, 2, 1]));
        assert_eq!(plan.ipv4_prefix_len, 24);
    }

    #[test]
    fn test_empty_carrier_dns_gets_fallbacks() {
        let mut input = raw([10, 19, 145, 184], 28, [10, 19, 145, 185]);
        input.ipv6_dns = vec!["fe80::1".parse().unwrap()];

        let plan = planner().plan(&input);
        assert_eq!(plan.ipv4_dns, vec![Ipv4Addr::new(8, 8, 8, 8)]);
        assert_eq!(plan.ipv6_dns, vec!["2001:4860:4860::8888".parse::<Ipv6Addr>().unwrap()]);
        assert_eq!(
            plan.dns_servers(),
            vec![
                "8.8.8.8".parse::<IpAddr>().unwrap(),
                "2001:4860:4860::8888".parse::<IpAddr>().unwrap()
            ]
        );
    }

    #[test]
    fn test_carrier_dns_stays_primary() {
        let mut input = raw([10, 19, 145, 184], 28, [10, 19, 145, 185]);
        input.ipv4_dns = vec![Ipv4Addr::new(10, 177, 0, 34), Ipv4Addr::new(10, 177, 0, 210)];

        let plan = planner().plan(&input);
        assert_eq!(
            plan.ipv4_dns,
            vec![
                Ipv4Addr::new(10, 177, 0, 34),
                Ipv4Addr::new(10, 177, 0, 210),
                Ipv4Addr::new(8, 8, 8, 8)
            ]
        );
    }

    #[test]
    fn test_fallback_not_duplicated() {
        let mut input = raw([10, 19, 145, 184], 28, [10, 19, 145, 185]);
        input.ipv4_dns = vec![Ipv4Addr::new(8, 8, 8, 8)];
        let plan = planner().plan(&input);
        assert_eq!(plan.ipv4_dns, vec![Ipv4Addr::new(8, 8, 8, 8)]);
    }

    #[test]
    fn test_never_empty_dns_even_with_empty_policy() {
        let planner = AddressPlanner::new(
            DnsPolicy {
                ipv4_fallback: Vec::new(),
                ipv6_fallback: FALLBACK_DNS_V6,
            },
            1500,
        );
        let plan = planner.plan(&raw([10, 0, 0, 2], 30, [10, 0, 0, 1]));
        assert!(!plan.ipv4_dns.is_empty());
    }

    #[test]
    fn test_ipv6_dns_policy() {
        let public: Ipv6Addr = "2a01:598::1".parse().unwrap();
        let mut input = raw([10, 19, 145, 184], 28, [10, 19, 145, 185]);

        input.ipv6_dns = vec![public];
        assert_eq!(planner().plan(&input).ipv6_dns, vec![public]);

        input.ipv6_dns = vec!["fd00::53".parse().unwrap()];
        assert_eq!(planner().plan(&input).ipv6_dns, vec![FALLBACK_DNS_V6]);

        input.ipv6_dns = Vec::new();
        input.ipv6 = Some(Ipv6Info {
            address: "2a01:598:a1::1".parse().unwrap(),
            prefix_len: 64,
        });
        assert_eq!(planner().plan(&input).ipv6_dns, vec![FALLBACK_DNS_V6]);

        input.ipv6 = None;
        assert!(planner().plan(&input).ipv6_dns.is_empty());
    }

    #[test]
    fn test_mtu_is_configured_value() {
        let mut input = raw([10, 19, 145, 184], 28, [10, 19, 145, 185]);
        input.mtu = 1500;
        assert_eq!(planner().plan(&input).mtu, 1430);
    }

    #[test]
    fn test_address_classification() {
        assert!(is_private_v4(Ipv4Addr::new(172, 20, 0, 1)));
        assert!(!is_private_v4(Ipv4Addr::new(8, 8, 8, 8)));
        assert!(is_link_local_v6("fe80::1".parse().unwrap()));
        assert!(is_link_local_v6("febf::1".parse().unwrap()));
        assert!(!is_link_local_v6("fec0::1".parse().unwrap()));
        assert!(is_unique_local_v6("fd12:3456::1".parse().unwrap()));
        assert!(!is_unique_local_v6("2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn test_subnet_parse() {
        let s: Ipv4Subnet = "10.19.145.176/28".parse().unwrap();
        assert_eq!(s.prefix_len, 28);
        assert!("10.19.145.176/40".parse::<Ipv4Subnet>().is_err());
    }
}
