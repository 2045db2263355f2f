//! Connectivity checker.
//!
//! # Responsibilities
//! - Poll a well-known HTTPS site through the managed proxy until it answers
//! - Report every attempt's outcome to registered listeners
//!
//! # Design Decisions
//! - At most one poll loop at a time, guarded by an atomic flag
//! - Listeners are held weakly behind explicit handles; dropping the last
//!   registration cancels the loop
//! - Nested deadlines: the whole loop and each attempt are bounded

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio_util::sync::CancellationToken;

use crate::config::CheckerConfig;
use crate::health::probe::{ProbeError, Prober, Route};
use crate::net::HostNetwork;
use crate::observability::metrics;
use crate::torrc::ConfigurationStore;

/// Receives the outcome of each connectivity attempt.
pub trait ConnectionListener: Send + Sync {
    fn on_connection_checked(&self, available: bool);
}

/// Registration handle returned by [`ConnectivityChecker::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ListenerHandle(u64);

#[derive(Debug, Clone)]
pub struct CheckerSettings {
    pub interval: Duration,
    pub cooldown: Duration,
    pub attempt_timeout: Duration,
    pub loop_timeout: Duration,
    pub targets: Vec<String>,
    pub target_port: u16,
}

impl From<&CheckerConfig> for CheckerSettings {
    fn from(config: &CheckerConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.interval_secs),
            cooldown: Duration::from_secs(config.cooldown_secs),
            attempt_timeout: Duration::from_secs(config.attempt_timeout_secs),
            loop_timeout: Duration::from_secs(config.loop_timeout_secs),
            targets: config.targets.clone(),
            target_port: config.target_port,
        }
    }
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: BTreeMap<ListenerHandle, Weak<dyn ConnectionListener>>,
}

struct Inner {
    host: Arc<dyn HostNetwork>,
    prober: Arc<dyn Prober>,
    torrc: Arc<ConfigurationStore>,
    settings: CheckerSettings,
    checking: AtomicBool,
    listeners: Mutex<Listeners>,
    task: Mutex<Option<CancellationToken>>,
}

#[derive(Clone)]
pub struct ConnectivityChecker {
    inner: Arc<Inner>,
}

impl ConnectivityChecker {
    pub fn new(
        host: Arc<dyn HostNetwork>,
        prober: Arc<dyn Prober>,
        torrc: Arc<ConfigurationStore>,
        settings: CheckerSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                host,
                prober,
                torrc,
                settings,
                checking: AtomicBool::new(false),
                listeners: Mutex::new(Listeners::default()),
                task: Mutex::new(None),
            }),
        }
    }

    pub fn is_checking(&self) -> bool {
        self.inner.checking.load(Ordering::Acquire)
    }

    /// Register a listener. The checker keeps only a weak reference; the
    /// caller owns the listener and must remove the handle on teardown.
    pub fn add_listener(&self, listener: &Arc<dyn ConnectionListener>) -> ListenerHandle {
        let mut listeners = self.inner.lock_listeners();
        let handle = ListenerHandle(listeners.next_id);
        listeners.next_id += 1;
        listeners.entries.insert(handle, Arc::downgrade(listener));
        handle
    }

    /// Unregister a listener. Removing the last one cancels any running check.
    pub fn remove_listener(&self, handle: ListenerHandle) {
        let now_empty = {
            let mut listeners = self.inner.lock_listeners();
            listeners.entries.remove(&handle);
            listeners.entries.is_empty()
        };

        if now_empty {
            if let Some(token) = self.inner.lock_task().take() {
                tracing::debug!("Last connectivity listener removed, cancelling check");
                token.cancel();
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.lock_listeners().entries.len()
    }

    /// Start a poll loop unless one is already running or nobody listens.
    pub fn request_check(&self) {
        if self.listener_count() == 0 {
            tracing::debug!("No connectivity listeners, skipping check");
            return;
        }
        if self
            .inner
            .checking
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let token = CancellationToken::new();
        if let Some(previous) = self.inner.lock_task().replace(token.clone()) {
            previous.cancel();
        }

        tokio::spawn(self.inner.clone().run(token));
    }

    /// Cancel any running check.
    pub fn cancel(&self) {
        if let Some(token) = self.inner.lock_task().take() {
            token.cancel();
        }
    }
}

impl Inner {
    async fn run(self: Arc<Self>, token: CancellationToken) {
        tokio::select! {
            _ = token.cancelled() => {
                tracing::debug!("Connectivity check cancelled");
            }
            result = tokio::time::timeout(self.settings.loop_timeout, self.poll_until_available()) => {
                if result.is_err() {
                    tracing::warn!(
                        timeout_secs = self.settings.loop_timeout.as_secs(),
                        "Connectivity check gave up"
                    );
                }
            }
        }
        self.checking.store(false, Ordering::Release);
    }

    async fn poll_until_available(&self) {
        let settings = &self.settings;
        loop {
            if !self.host.is_network_available() {
                tokio::time::sleep(settings.interval).await;
                continue;
            }

            let Some(target) = self.pick_target() else {
                tracing::error!("No connectivity check targets configured");
                return;
            };
            let route = Route::Socks(self.torrc.socks_port());
            tracing::info!(%target, ?route, "Checking connection through proxy");

            let attempt = self
                .prober
                .check(&target, settings.target_port, route, settings.attempt_timeout);
            let available = match tokio::time::timeout(settings.attempt_timeout, attempt).await {
                Ok(Ok(_)) => true,
                Ok(Err(ProbeError::Timeout)) | Err(_) => {
                    tracing::info!(%target, "Connection check timed out");
                    tokio::time::sleep(settings.cooldown).await;
                    false
                }
                Ok(Err(e)) => {
                    tracing::info!(%target, error = %e, "Connection check failed");
                    false
                }
            };

            tracing::info!(available, "Proxy connectivity checked");
            metrics::record_connectivity_check(available);
            self.notify(available);

            if available {
                return;
            }
            tokio::time::sleep(settings.interval).await;
        }
    }

    fn pick_target(&self) -> Option<String> {
        let mut rng = rand::thread_rng();
        self.settings.targets.choose(&mut rng).cloned()
    }

    fn notify(&self, available: bool) {
        let live: Vec<Arc<dyn ConnectionListener>> = {
            let mut listeners = self.lock_listeners();
            listeners.entries.retain(|_, weak| weak.strong_count() > 0);
            listeners.entries.values().filter_map(Weak::upgrade).collect()
        };
        for listener in live {
            listener.on_connection_checked(available);
        }
    }

    fn lock_listeners(&self) -> MutexGuard<'_, Listeners> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_task(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
