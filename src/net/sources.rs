//! Linux network event sources.
//!
//! Both sources translate host state into [`NetworkEvent`]s on an mpsc
//! channel consumed by the observer.

use std::collections::BTreeMap;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::net::network::{HostNetwork, NetworkEvent};
use crate::net::system::{InterfaceInfo, SystemNetwork};

/// Polls interface state and reports link-level transitions.
pub struct LinkPoller {
    network: Arc<SystemNetwork>,
    interval: Duration,
}

impl LinkPoller {
    pub fn new(network: Arc<SystemNetwork>, interval: Duration) -> Self {
        Self { network, interval }
    }

    pub async fn run(self, tx: mpsc::Sender<NetworkEvent>, cancel: CancellationToken) {
        let mut previous: BTreeMap<String, InterfaceInfo> = BTreeMap::new();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let current: BTreeMap<String, InterfaceInfo> = self
                .network
                .interfaces()
                .into_iter()
                .map(|i| (i.name.clone(), i))
                .collect();

            for event in diff_interfaces(&previous, &current) {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
            previous = current;
        }
        tracing::debug!("Link poller stopped");
    }
}

/// Events implied by moving from `previous` to `current`.
pub fn diff_interfaces(
    previous: &BTreeMap<String, InterfaceInfo>,
    current: &BTreeMap<String, InterfaceInfo>,
) -> Vec<NetworkEvent> {
    let was_up = |name: &str| previous.get(name).is_some_and(InterfaceInfo::is_up);
    let mut events = Vec::new();

    for (name, info) in current {
        if !info.is_up() {
            continue;
        }
        if !was_up(name) {
            events.push(NetworkEvent::Available(name.clone()));
        }
        let changed = previous
            .get(name)
            .map_or(true, |old| old.capabilities() != info.capabilities());
        if changed || !was_up(name) {
            events.push(NetworkEvent::CapabilitiesChanged {
                network: name.clone(),
                capabilities: info.capabilities(),
            });
        }
    }

    for name in previous.keys() {
        let still_up = current.get(name).is_some_and(InterfaceInfo::is_up);
        if was_up(name) && !still_up {
            events.push(NetworkEvent::Lost(name.clone()));
        }
    }

    let any_up = current.values().any(InterfaceInfo::is_up);
    if !any_up && previous.values().any(InterfaceInfo::is_up) {
        events.push(NetworkEvent::Unavailable);
    }

    events
}

/// Watches the resolver configuration and reports DNS server changes
/// against the active network.
pub struct ResolvConfWatcher {
    path: PathBuf,
    host: Arc<dyn HostNetwork>,
}

impl ResolvConfWatcher {
    pub fn new(path: impl Into<PathBuf>, host: Arc<dyn HostNetwork>) -> Self {
        Self {
            path: path.into(),
            host,
        }
    }

    /// Current DNS servers of the active network, if any.
    pub fn current_event(&self) -> Option<NetworkEvent> {
        link_properties_event(&self.path, self.host.as_ref())
    }

    /// Start watching. The returned watcher must be kept alive.
    ///
    /// The parent directory is watched because resolvers usually replace
    /// the file rather than edit it in place.
    pub fn run(self, tx: mpsc::Sender<NetworkEvent>) -> Result<RecommendedWatcher, notify::Error> {
        let path = self.path.clone();
        let host = self.host.clone();
        let file_name = self.path.file_name().map(ToOwned::to_owned);
        let dir = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let relevant = event
                        .paths
                        .iter()
                        .any(|p| p.file_name().map(ToOwned::to_owned) == file_name);
                    if !relevant || event.kind.is_access() {
                        return;
                    }
                    if let Some(update) = link_properties_event(&path, host.as_ref()) {
                        if tx.blocking_send(update).is_err() {
                            tracing::debug!("Observer gone, dropping resolver update");
                        }
                    }
                }
                Err(e) => tracing::error!(error = ?e, "Resolver watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        tracing::info!(path = ?self.path, "Resolver watcher started");
        Ok(watcher)
    }
}

fn link_properties_event(path: &Path, host: &dyn HostNetwork) -> Option<NetworkEvent> {
    let network = host.active_network()?;
    let text = fs::read_to_string(path).unwrap_or_default();
    Some(NetworkEvent::LinkPropertiesChanged {
        network,
        dns_servers: parse_nameservers(&text),
    })
}

/// `nameserver` entries of a resolv.conf. Unparseable addresses are skipped.
pub fn parse_nameservers(text: &str) -> Vec<IpAddr> {
    text.lines()
        .filter_map(|line| line.trim().strip_prefix("nameserver"))
        .filter_map(|rest| rest.split_whitespace().next())
        .filter_map(|addr| addr.parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iface(name: &str, operstate: &str, carrier: bool) -> (String, InterfaceInfo) {
        (
            name.to_string(),
            InterfaceInfo {
                name: name.to_string(),
                operstate: operstate.to_string(),
                carrier,
            },
        )
    }

    #[test]
    fn new_interface_is_available_with_capabilities() {
        let previous = BTreeMap::new();
        let current = BTreeMap::from([iface("wlan0", "up", true)]);

        let events = diff_interfaces(&previous, &current);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], NetworkEvent::Available("wlan0".into()));
        assert!(matches!(events[1], NetworkEvent::CapabilitiesChanged { .. }));
    }

    #[test]
    fn steady_state_is_silent() {
        let state = BTreeMap::from([iface("eth0", "up", true)]);
        assert!(diff_interfaces(&state, &state).is_empty());
    }

    #[test]
    fn last_interface_going_down_is_lost_and_unavailable() {
        let previous = BTreeMap::from([iface("eth0", "up", true)]);
        let current = BTreeMap::from([iface("eth0", "down", false)]);

        let events = diff_interfaces(&previous, &current);
        assert_eq!(
            events,
            vec![NetworkEvent::Lost("eth0".into()), NetworkEvent::Unavailable]
        );
    }

    #[test]
    fn carrier_change_is_a_capability_change() {
        let previous = BTreeMap::from([iface("tun0", "unknown", true), iface("eth0", "up", false)]);
        let current = BTreeMap::from([iface("tun0", "unknown", true), iface("eth0", "up", true)]);

        let events = diff_interfaces(&previous, &current);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            NetworkEvent::CapabilitiesChanged { network, .. } if network == "eth0"
        ));
    }

    #[test]
    fn parses_nameserver_lines() {
        let text = "# generated\nnameserver 1.1.1.1\nnameserver  2606:4700:4700::1111\nnameserver bogus\nsearch lan\n";
        let servers = parse_nameservers(text);
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0], "1.1.1.1".parse::<IpAddr>().unwrap());
    }
}
