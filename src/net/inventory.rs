//! Interface inventory
//!
//! Queries live kernel network state through `ip -j` and returns a fresh
//! structured snapshot on every call. Nothing is cached between calls;
//! callers thread the snapshot through explicitly.

use crate::cmd::Runner;
use crate::error::{Error, Result};
use ipnet::{IpNet, Ipv4Net};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use tracing::warn;

/// Administrative state of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LinkState {
    Up,
    Down,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Up => write!(f, "UP"),
            LinkState::Down => write!(f, "DOWN"),
        }
    }
}

/// Interface classification derived from the kernel name prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InterfaceKind {
    WiFi,
    Ethernet,
    Usb,
    BluetoothTethering,
    Virtual,
    Unknown,
}

impl InterfaceKind {
    /// Classify an interface by name prefix.
    ///
    /// Precedence is fixed: wireless, ethernet, USB, Bluetooth
    /// tethering, virtual/bridge/VPN, unknown.
    pub fn classify(name: &str) -> Self {
        if name.starts_with("wl") {
            InterfaceKind::WiFi
        } else if name.starts_with("en") || name.starts_with("eth") {
            InterfaceKind::Ethernet
        } else if name.starts_with("usb") {
            InterfaceKind::Usb
        } else if name.starts_with("bnep") || name.starts_with("bt") {
            InterfaceKind::BluetoothTethering
        } else if ["veth", "br", "docker", "tun", "tap"]
            .iter()
            .any(|p| name.starts_with(p))
        {
            InterfaceKind::Virtual
        } else {
            InterfaceKind::Unknown
        }
    }
}

impl fmt::Display for InterfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InterfaceKind::WiFi => "Wi-Fi",
            InterfaceKind::Ethernet => "Ethernet",
            InterfaceKind::Usb => "USB",
            InterfaceKind::BluetoothTethering => "Bluetooth Tethering",
            InterfaceKind::Virtual => "Virtual/Bridge/VPN",
            InterfaceKind::Unknown => "Unknown",
        };
        write!(f, "{}", s)
    }
}

/// A fresh snapshot of one host interface
#[derive(Debug, Clone, Serialize)]
pub struct NetworkInterface {
    /// Kernel-unique interface name
    pub name: String,
    /// Administrative state
    pub state: LinkState,
    /// Prefix-derived classification (Unknown for DOWN interfaces)
    pub kind: InterfaceKind,
    /// IPv4 and IPv6 addresses with prefix
    pub addresses: Vec<IpNet>,
    /// Link-layer address (ether links only)
    pub mac: Option<String>,
    /// Route metric, last-wins across the device's routes
    pub metric: Option<u32>,
    /// Gateways in first-seen order, deduplicated
    pub gateways: Vec<IpAddr>,
}

impl NetworkInterface {
    pub fn is_up(&self) -> bool {
        self.state == LinkState::Up
    }

    /// First IPv4 address with prefix, if any
    pub fn primary_ipv4(&self) -> Option<Ipv4Net> {
        self.addresses.iter().find_map(|net| match net {
            IpNet::V4(v4) => Some(*v4),
            IpNet::V6(_) => None,
        })
    }

    /// First discovered gateway, if any
    pub fn first_gateway(&self) -> Option<IpAddr> {
        self.gateways.first().copied()
    }
}

// Typed records for `ip -j` output. Only the consumed fields are listed;
// serde ignores the rest.

#[derive(Debug, Deserialize)]
struct LinkRecord {
    ifname: String,
    #[serde(default)]
    flags: Vec<String>,
    #[serde(default)]
    link_type: Option<String>,
    #[serde(default)]
    address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AddrRecord {
    #[serde(default)]
    addr_info: Vec<AddrInfo>,
}

#[derive(Debug, Deserialize)]
struct AddrInfo {
    #[serde(default)]
    local: Option<IpAddr>,
    #[serde(default)]
    prefixlen: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct RouteRecord {
    #[serde(default)]
    gateway: Option<IpAddr>,
    #[serde(default)]
    metric: Option<u32>,
}

/// Enumerate all non-loopback interfaces.
///
/// The result is recomputed from the kernel on every call. DOWN
/// interfaces are returned with empty detail so callers can distinguish
/// "exists but inactive" from "absent". Failure to obtain the base link
/// listing is a `Discovery` error, distinct from an empty result.
pub fn enumerate(runner: &dyn Runner) -> Result<Vec<NetworkInterface>> {
    let output = runner
        .run("ip", &["-j", "link", "show"])
        .map_err(|e| Error::Discovery(e.to_string()))?;
    if !output.success() {
        return Err(Error::Discovery(output.stderr.trim().to_string()));
    }

    let links: Vec<LinkRecord> = serde_json::from_str(&output.stdout)
        .map_err(|e| Error::Discovery(format!("malformed link listing: {}", e)))?;

    let mut interfaces = Vec::new();
    for link in links {
        if link.ifname == "lo" {
            continue;
        }

        let state = if link.flags.iter().any(|f| f == "UP") {
            LinkState::Up
        } else {
            LinkState::Down
        };

        // DOWN interfaces are reported bare: no addresses, routes, or
        // classification detail.
        if state == LinkState::Down {
            interfaces.push(NetworkInterface {
                name: link.ifname,
                state,
                kind: InterfaceKind::Unknown,
                addresses: Vec::new(),
                mac: None,
                metric: None,
                gateways: Vec::new(),
            });
            continue;
        }

        let mac = match link.link_type.as_deref() {
            Some("ether") => link.address.map(|a| a.to_uppercase()),
            _ => None,
        };

        let addresses = query_addresses(runner, &link.ifname);
        let (metric, gateways) = query_routes(runner, &link.ifname);

        interfaces.push(NetworkInterface {
            kind: InterfaceKind::classify(&link.ifname),
            name: link.ifname,
            state,
            addresses,
            mac,
            metric,
            gateways,
        });
    }

    Ok(interfaces)
}

/// Per-family address listing for one device. Failures are non-fatal.
fn query_addresses(runner: &dyn Runner, name: &str) -> Vec<IpNet> {
    let mut addresses = Vec::new();

    for family in ["-4", "-6"] {
        let output = match runner.run("ip", &["-j", family, "addr", "show", "dev", name]) {
            Ok(out) if out.success() => out,
            _ => {
                warn!(interface = name, family, "address listing unavailable");
                continue;
            }
        };

        let records: Vec<AddrRecord> = match serde_json::from_str(&output.stdout) {
            Ok(records) => records,
            Err(e) => {
                warn!(interface = name, family, error = %e, "malformed address listing");
                continue;
            }
        };

        for info in records.into_iter().flat_map(|r| r.addr_info) {
            if let (Some(local), Some(prefix)) = (info.local, info.prefixlen)
                && let Ok(net) = IpNet::new(local, prefix)
            {
                addresses.push(net);
            }
        }
    }

    addresses
}

/// Per-device route listing: metric and gateways. Failures are non-fatal.
///
/// The metric is taken from the last route record that carries one
/// (last-wins). Most hosts have a single default route per device; on
/// multi-route devices the later record shadows earlier ones.
fn query_routes(runner: &dyn Runner, name: &str) -> (Option<u32>, Vec<IpAddr>) {
    let output = match runner.run("ip", &["-j", "route", "show", "dev", name]) {
        Ok(out) if out.success() => out,
        _ => {
            warn!(interface = name, "route listing unavailable");
            return (None, Vec::new());
        }
    };

    let records: Vec<RouteRecord> = match serde_json::from_str(&output.stdout) {
        Ok(records) => records,
        Err(e) => {
            warn!(interface = name, error = %e, "malformed route listing");
            return (None, Vec::new());
        }
    };

    let mut metric = None;
    let mut gateways: Vec<IpAddr> = Vec::new();
    for route in records {
        if route.metric.is_some() {
            metric = route.metric;
        }
        if let Some(gw) = route.gateway
            && !gateways.contains(&gw)
        {
            gateways.push(gw);
        }
    }

    (metric, gateways)
}
