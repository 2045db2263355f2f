//! Linux host network backed by sysfs and procfs.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::net::network::{is_tunnel_interface, HostNetwork, NetworkId};

const RTF_UP: u32 = 0x0001;

/// Snapshot of one interface under `/sys/class/net`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub name: NetworkId,
    pub operstate: String,
    pub carrier: bool,
}

impl InterfaceInfo {
    /// Tunnel devices commonly report `unknown` while passing traffic.
    pub fn is_up(&self) -> bool {
        self.operstate == "up" || (self.operstate == "unknown" && self.carrier)
    }

    pub fn capabilities(&self) -> BTreeSet<String> {
        let mut caps = BTreeSet::new();
        caps.insert(format!("operstate={}", self.operstate));
        if self.carrier {
            caps.insert("carrier".to_string());
        }
        if is_tunnel_interface(&self.name) {
            caps.insert("tunnel".to_string());
        }
        caps
    }
}

#[derive(Debug, Clone)]
pub struct SystemNetwork {
    sysfs_net: PathBuf,
    proc_route: PathBuf,
}

impl SystemNetwork {
    pub fn new(sysfs_net: impl Into<PathBuf>, proc_route: impl Into<PathBuf>) -> Self {
        Self {
            sysfs_net: sysfs_net.into(),
            proc_route: proc_route.into(),
        }
    }

    /// All non-loopback interfaces, sorted by name.
    pub fn interfaces(&self) -> Vec<InterfaceInfo> {
        let entries = match fs::read_dir(&self.sysfs_net) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(path = ?self.sysfs_net, error = %e, "Unable to list interfaces");
                return Vec::new();
            }
        };

        let mut interfaces: Vec<InterfaceInfo> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name != "lo")
            .map(|name| {
                let dir = self.sysfs_net.join(&name);
                InterfaceInfo {
                    operstate: read_trimmed(&dir.join("operstate")).unwrap_or_else(|| "unknown".to_string()),
                    carrier: read_trimmed(&dir.join("carrier")).as_deref() == Some("1"),
                    name,
                }
            })
            .collect();
        interfaces.sort_by(|a, b| a.name.cmp(&b.name));
        interfaces
    }

    fn interface(&self, name: &str) -> Option<InterfaceInfo> {
        self.interfaces().into_iter().find(|i| i.name == name)
    }

    /// Default routes as `(metric, interface)`, lowest metric first.
    fn default_routes(&self) -> Vec<(u32, String)> {
        let Ok(table) = fs::read_to_string(&self.proc_route) else {
            return Vec::new();
        };
        let mut routes = parse_default_routes(&table);
        routes.sort();
        routes
    }
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

/// Parse `/proc/net/route`, keeping default routes that are up.
fn parse_default_routes(table: &str) -> Vec<(u32, String)> {
    table
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 7 || fields[1] != "00000000" {
                return None;
            }
            let flags = u32::from_str_radix(fields[3], 16).ok()?;
            if flags & RTF_UP == 0 {
                return None;
            }
            let metric = fields[6].parse().ok()?;
            Some((metric, fields[0].to_string()))
        })
        .collect()
}

impl HostNetwork for SystemNetwork {
    fn is_network_available(&self) -> bool {
        self.active_network().is_some()
    }

    fn is_alternate_tunnel_active(&self) -> bool {
        self.interfaces()
            .iter()
            .any(|i| is_tunnel_interface(&i.name) && i.is_up())
    }

    fn active_network(&self) -> Option<NetworkId> {
        self.default_routes()
            .into_iter()
            .map(|(_, iface)| iface)
            .find(|iface| self.interface(iface).is_some_and(|i| i.is_up()))
    }
}
