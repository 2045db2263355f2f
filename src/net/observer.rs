//! Connectivity observer.
//!
//! # Responsibilities
//! - Filter raw host callbacks down to meaningful network changes
//! - Publish a coalesced change signal to any number of consumers
//! - Remember the last network type across keeper restarts
//!
//! # Design Decisions
//! - The signal is a `watch` generation counter: bursts collapse and a
//!   slow consumer always observes the latest generation
//! - Capability and DNS changes only count when they add something new
//!   to the active network, and never on the first observation

use std::collections::{BTreeSet, HashSet};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::net::IpAddr;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::lifecycle::StateStore;
use crate::net::network::{HostNetwork, NetworkEvent, NetworkId, NetworkType};
use crate::observability::metrics;

#[derive(Debug, Default)]
struct ObservedState {
    network_type: NetworkType,
    active: Option<NetworkId>,
    capabilities: BTreeSet<String>,
    dns: HashSet<u64>,
}

pub struct ConnectivityObserver {
    host: Arc<dyn HostNetwork>,
    state_store: Arc<StateStore>,
    observed: Mutex<ObservedState>,
    changes: watch::Sender<u64>,
}

impl ConnectivityObserver {
    pub fn new(host: Arc<dyn HostNetwork>, state_store: Arc<StateStore>) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            host,
            state_store,
            observed: Mutex::new(ObservedState::default()),
            changes,
        }
    }

    /// Start observing: restores the persisted network type and returns a
    /// receiver for change generations.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        let restored = self.state_store.last_network();
        self.lock().network_type = restored;
        tracing::debug!(network_type = ?restored, "Network observer subscribed");
        self.changes.subscribe()
    }

    /// Stop observing and persist the last network type.
    pub fn unsubscribe(&self) {
        let network_type = self.lock().network_type;
        if let Err(e) = self.state_store.set_last_network(network_type) {
            tracing::warn!(error = %e, "Unable to persist last network type");
        }
        tracing::debug!(?network_type, "Network observer unsubscribed");
    }

    pub fn last_network_type(&self) -> NetworkType {
        self.lock().network_type
    }

    /// Consume events until the channel closes or `cancel` fires.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<NetworkEvent>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },
            }
        }
        tracing::debug!("Network observer stopped");
    }

    pub fn handle(&self, event: NetworkEvent) {
        match event {
            NetworkEvent::Available(network) => {
                tracing::info!(%network, "Network available");
                self.emit();
            }
            NetworkEvent::CapabilitiesChanged { network, capabilities } => {
                if self.is_active(&network) {
                    let mut observed = self.lock();
                    if !capabilities.is_subset(&observed.capabilities) {
                        let had_previous = !observed.capabilities.is_empty();
                        tracing::info!(%network, ?capabilities, "Network capabilities changed");
                        observed.capabilities = capabilities;
                        drop(observed);
                        if had_previous {
                            self.emit();
                        }
                    }
                }
                self.refresh_network_type();
            }
            NetworkEvent::LinkPropertiesChanged { network, dns_servers } => {
                let dns: HashSet<u64> = dns_servers.iter().map(hash_addr).collect();
                if self.is_active(&network) {
                    let mut observed = self.lock();
                    if !dns.is_subset(&observed.dns) {
                        let had_previous = !observed.dns.is_empty();
                        observed.dns = dns;
                        drop(observed);
                        if had_previous {
                            self.emit();
                        }
                    }
                }
                self.refresh_network_type();
                tracing::info!(%network, ?dns_servers, "Network link properties changed");
            }
            NetworkEvent::BlockedStatusChanged { network, blocked } => {
                if self.is_active(&network) {
                    self.emit();
                }
                self.refresh_network_type();
                tracing::info!(%network, blocked, "Network blocked status changed");
            }
            NetworkEvent::Unavailable => {
                self.lock().network_type = NetworkType::Unknown;
                tracing::info!("Network unavailable");
                self.emit();
                self.refresh_network_type();
            }
            NetworkEvent::Lost(network) => {
                let lost = self.host.network_type(&network);
                let mut observed = self.lock();
                let was_active = observed.active.as_deref() == Some(network.as_str());
                let matched = lost == observed.network_type;
                if matched || lost == NetworkType::Unknown {
                    observed.network_type = NetworkType::Unknown;
                }
                if was_active {
                    observed.active = None;
                }
                drop(observed);
                tracing::info!(%network, was_active, "Network lost");
                if was_active || matched {
                    self.emit();
                }
                self.refresh_network_type();
            }
        }
    }

    fn is_active(&self, network: &str) -> bool {
        self.host.active_network().as_deref() == Some(network)
    }

    fn refresh_network_type(&self) {
        let active = self.host.active_network();
        let current = active
            .as_deref()
            .map(|n| self.host.network_type(n))
            .unwrap_or_default();

        let mut observed = self.lock();
        observed.active = active;
        if observed.network_type != current {
            tracing::info!(from = ?observed.network_type, to = ?current, "Active network type changed");
            observed.network_type = current;
            drop(observed);
            self.emit();
        }
    }

    fn emit(&self) {
        self.changes.send_modify(|generation| *generation = generation.wrapping_add(1));
        metrics::record_network_change();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ObservedState> {
        self.observed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn hash_addr(addr: &IpAddr) -> u64 {
    let mut hasher = DefaultHasher::new();
    addr.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::net::sources::diff_interfaces;
    use crate::net::system::InterfaceInfo;
    use crate::torrc::TorMode;

    struct FakeHost {
        active: Mutex<Option<String>>,
    }

    impl FakeHost {
        fn new(active: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                active: Mutex::new(active.map(str::to_string)),
            })
        }

        fn set_active(&self, active: Option<&str>) {
            *self.active.lock().unwrap() = active.map(str::to_string);
        }
    }

    impl HostNetwork for FakeHost {
        fn is_network_available(&self) -> bool {
            self.active.lock().unwrap().is_some()
        }

        fn is_alternate_tunnel_active(&self) -> bool {
            false
        }

        fn active_network(&self) -> Option<String> {
            self.active.lock().unwrap().clone()
        }
    }

    fn observer(host: Arc<FakeHost>) -> (ConnectivityObserver, watch::Receiver<u64>) {
        let store = Arc::new(StateStore::in_memory(TorMode::Auto));
        let observer = ConnectivityObserver::new(host, store);
        let rx = observer.subscribe();
        (observer, rx)
    }

    fn caps(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn interface(name: &str, up: bool) -> InterfaceInfo {
        InterfaceInfo {
            name: name.to_string(),
            operstate: if up { "up" } else { "down" }.to_string(),
            carrier: up,
        }
    }

    fn generation(rx: &watch::Receiver<u64>) -> u64 {
        *rx.borrow()
    }

    #[test]
    fn available_always_emits() {
        let (observer, rx) = observer(FakeHost::new(Some("wlan0")));
        observer.handle(NetworkEvent::Available("wlan0".into()));
        observer.handle(NetworkEvent::Available("eth0".into()));
        assert_eq!(generation(&rx), 2);
    }

    #[test]
    fn first_capabilities_are_recorded_silently() {
        let host = FakeHost::new(Some("eth0"));
        let (observer, rx) = observer(host);
        // Seed the type so the type refresh does not emit.
        observer.lock().network_type = NetworkType::Ethernet;

        observer.handle(NetworkEvent::CapabilitiesChanged {
            network: "eth0".into(),
            capabilities: caps(&["operstate=up", "carrier"]),
        });
        assert_eq!(generation(&rx), 0);

        // Subset of what was recorded: ignored.
        observer.handle(NetworkEvent::CapabilitiesChanged {
            network: "eth0".into(),
            capabilities: caps(&["carrier"]),
        });
        assert_eq!(generation(&rx), 0);

        // New capability: emits.
        observer.handle(NetworkEvent::CapabilitiesChanged {
            network: "eth0".into(),
            capabilities: caps(&["operstate=up", "carrier", "tunnel"]),
        });
        assert_eq!(generation(&rx), 1);
    }

    #[test]
    fn inactive_network_capabilities_are_ignored() {
        let (observer, rx) = observer(FakeHost::new(Some("eth0")));
        observer.lock().network_type = NetworkType::Ethernet;
        observer.lock().capabilities = caps(&["carrier"]);

        observer.handle(NetworkEvent::CapabilitiesChanged {
            network: "wlan0".into(),
            capabilities: caps(&["operstate=up"]),
        });
        assert_eq!(generation(&rx), 0);
    }

    #[test]
    fn dns_change_emits_after_first_set() {
        let (observer, rx) = observer(FakeHost::new(Some("wlan0")));
        observer.lock().network_type = NetworkType::Wifi;

        let first: Vec<IpAddr> = vec!["192.168.1.1".parse().unwrap()];
        observer.handle(NetworkEvent::LinkPropertiesChanged {
            network: "wlan0".into(),
            dns_servers: first.clone(),
        });
        observer.handle(NetworkEvent::LinkPropertiesChanged {
            network: "wlan0".into(),
            dns_servers: first,
        });
        assert_eq!(generation(&rx), 0);

        observer.handle(NetworkEvent::LinkPropertiesChanged {
            network: "wlan0".into(),
            dns_servers: vec!["9.9.9.9".parse().unwrap()],
        });
        assert_eq!(generation(&rx), 1);
    }

    #[test]
    fn blocked_status_on_active_network_emits() {
        let (observer, rx) = observer(FakeHost::new(Some("wlan0")));
        observer.lock().network_type = NetworkType::Wifi;

        observer.handle(NetworkEvent::BlockedStatusChanged {
            network: "wlan0".into(),
            blocked: true,
        });
        observer.handle(NetworkEvent::BlockedStatusChanged {
            network: "eth0".into(),
            blocked: true,
        });
        assert_eq!(generation(&rx), 1);
    }

    #[test]
    fn network_type_switch_emits_once() {
        let host = FakeHost::new(Some("wlan0"));
        let (observer, rx) = observer(host.clone());

        observer.handle(NetworkEvent::BlockedStatusChanged {
            network: "other".into(),
            blocked: false,
        });
        assert_eq!(observer.last_network_type(), NetworkType::Wifi);
        assert_eq!(generation(&rx), 1);

        host.set_active(Some("eth0"));
        observer.handle(NetworkEvent::BlockedStatusChanged {
            network: "other".into(),
            blocked: false,
        });
        observer.handle(NetworkEvent::BlockedStatusChanged {
            network: "other".into(),
            blocked: false,
        });
        assert_eq!(observer.last_network_type(), NetworkType::Ethernet);
        assert_eq!(generation(&rx), 2);
    }

    #[test]
    fn losing_the_current_type_clears_it_and_emits() {
        let host = FakeHost::new(Some("wlan0"));
        let (observer, rx) = observer(host.clone());
        observer.lock().network_type = NetworkType::Wifi;

        observer.handle(NetworkEvent::Lost("eth0".into()));
        assert_eq!(observer.last_network_type(), NetworkType::Wifi);
        assert_eq!(generation(&rx), 0);

        host.set_active(None);
        observer.handle(NetworkEvent::Lost("wlan0".into()));
        assert_eq!(observer.last_network_type(), NetworkType::Unknown);
        assert_eq!(generation(&rx), 1);
    }

    #[test]
    fn last_interface_going_down_emits() {
        let host = FakeHost::new(Some("eth0"));
        let (observer, rx) = observer(host.clone());

        let up = BTreeMap::from([("eth0".to_string(), interface("eth0", true))]);
        let down = BTreeMap::from([("eth0".to_string(), interface("eth0", false))]);

        for event in diff_interfaces(&BTreeMap::new(), &up) {
            observer.handle(event);
        }
        assert_eq!(observer.last_network_type(), NetworkType::Ethernet);
        let before = generation(&rx);

        host.set_active(None);
        for event in diff_interfaces(&up, &down) {
            observer.handle(event);
        }
        assert!(generation(&rx) > before);
        assert_eq!(observer.last_network_type(), NetworkType::Unknown);
    }

    #[test]
    fn losing_wifi_with_ethernet_up_emits() {
        let host = FakeHost::new(Some("wlan0"));
        let (observer, rx) = observer(host.clone());
        observer.handle(NetworkEvent::BlockedStatusChanged {
            network: "wlan0".into(),
            blocked: false,
        });
        let before = generation(&rx);

        host.set_active(Some("eth0"));
        observer.handle(NetworkEvent::Lost("wlan0".into()));
        assert!(generation(&rx) > before);
        assert_eq!(observer.last_network_type(), NetworkType::Ethernet);
    }

    #[test]
    fn last_type_round_trips_through_state_store() {
        let store = Arc::new(StateStore::in_memory(TorMode::Auto));
        store.set_last_network(NetworkType::Cellular).unwrap();

        let observer = ConnectivityObserver::new(FakeHost::new(None), store.clone());
        let _rx = observer.subscribe();
        assert_eq!(observer.last_network_type(), NetworkType::Cellular);

        observer.handle(NetworkEvent::Unavailable);
        observer.unsubscribe();
        assert_eq!(store.last_network(), NetworkType::Unknown);
    }

    #[tokio::test]
    async fn slow_consumer_sees_latest_generation() {
        let (observer, mut rx) = observer(FakeHost::new(Some("wlan0")));
        for _ in 0..5 {
            observer.handle(NetworkEvent::Available("wlan0".into()));
        }
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 5);
        assert!(!rx.has_changed().unwrap());
    }
}
