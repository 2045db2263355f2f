//! Host network model.

use std::collections::BTreeSet;
use std::net::IpAddr;
use serde::{Deserialize, Serialize};

/// Interface name as reported by the host.
pub type NetworkId = String;

/// Physical class of a network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NetworkType {
    Ethernet,
    Wifi,
    Cellular,
    #[default]
    Unknown,
}

impl NetworkType {
    /// Classify a Linux interface by its name.
    pub fn from_interface(name: &str) -> Self {
        if name.starts_with("wl") {
            NetworkType::Wifi
        } else if name.starts_with("en") || name.starts_with("eth") {
            NetworkType::Ethernet
        } else if name.starts_with("ww") || name.starts_with("rmnet") {
            NetworkType::Cellular
        } else {
            NetworkType::Unknown
        }
    }
}

/// Interfaces that carry an alternate tunnel (VPN) rather than a link.
pub fn is_tunnel_interface(name: &str) -> bool {
    const PREFIXES: [&str; 6] = ["tun", "tap", "wg", "ppp", "ipsec", "utun"];
    PREFIXES.iter().any(|p| name.starts_with(p))
}

/// Connectivity callback delivered by an event source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    Available(NetworkId),
    CapabilitiesChanged {
        network: NetworkId,
        capabilities: BTreeSet<String>,
    },
    LinkPropertiesChanged {
        network: NetworkId,
        dns_servers: Vec<IpAddr>,
    },
    BlockedStatusChanged {
        network: NetworkId,
        blocked: bool,
    },
    Lost(NetworkId),
    Unavailable,
}

/// Host-side network queries.
pub trait HostNetwork: Send + Sync {
    /// Whether any usable network is up.
    fn is_network_available(&self) -> bool;

    /// Whether a VPN or similar tunnel is active.
    fn is_alternate_tunnel_active(&self) -> bool;

    /// Network currently carrying the default route.
    fn active_network(&self) -> Option<NetworkId>;

    fn network_type(&self, network: &str) -> NetworkType {
        NetworkType::from_interface(network)
    }
}
