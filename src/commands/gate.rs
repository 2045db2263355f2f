//! Serialized command handling.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::commands::address::parse_address;
use crate::commands::CommandError;
use crate::config::ReachabilityConfig;
use crate::health::{ReachabilityCache, Route};
use crate::lifecycle::{ProcessState, ProcessStatus, StateStore};
use crate::net::HostNetwork;
use crate::observability::metrics;
use crate::process::ProcessSupervisor;
use crate::torrc::{ConfigurationStore, ModeSummary, SettingsUpdate, TorMode};

/// Current configuration plus process state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationReport {
    #[serde(flatten)]
    pub summary: ModeSummary,
    pub tor_state: ProcessState,
    pub tor_ready: bool,
}

/// Answer to an address check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressVerdict {
    /// Route the destination through the proxy.
    pub redirect: bool,
    /// SOCKS port to use, or 0 while the proxy is not ready.
    pub port: u16,
}

impl AddressVerdict {
    const NOT_READY: Self = Self { redirect: false, port: 0 };
}

#[derive(Debug, Clone)]
pub struct GateSettings {
    pub direct_timeout: Duration,
    pub tunnel_timeout: Duration,
    pub idle_shutdown: Duration,
}

impl From<&ReachabilityConfig> for GateSettings {
    fn from(config: &ReachabilityConfig) -> Self {
        Self {
            direct_timeout: Duration::from_millis(config.direct_timeout_ms),
            tunnel_timeout: Duration::from_millis(config.tunnel_timeout_ms),
            idle_shutdown: Duration::from_secs(config.idle_shutdown_secs),
        }
    }
}

pub struct CommandGate {
    supervisor: Arc<dyn ProcessSupervisor>,
    status: Arc<ProcessStatus>,
    torrc: Arc<ConfigurationStore>,
    state: Arc<StateStore>,
    cache: Arc<ReachabilityCache>,
    host: Arc<dyn HostNetwork>,
    settings: GateSettings,
    start_lock: tokio::sync::Mutex<()>,
    stop_lock: tokio::sync::Mutex<()>,
    config_lock: tokio::sync::Mutex<()>,
    last_unreachable: Mutex<Option<Instant>>,
}

impl CommandGate {
    pub fn new(
        supervisor: Arc<dyn ProcessSupervisor>,
        status: Arc<ProcessStatus>,
        torrc: Arc<ConfigurationStore>,
        state: Arc<StateStore>,
        cache: Arc<ReachabilityCache>,
        host: Arc<dyn HostNetwork>,
        settings: GateSettings,
    ) -> Self {
        Self {
            supervisor,
            status,
            torrc,
            state,
            cache,
            host,
            settings,
            start_lock: tokio::sync::Mutex::new(()),
            stop_lock: tokio::sync::Mutex::new(()),
            config_lock: tokio::sync::Mutex::new(()),
            last_unreachable: Mutex::new(None),
        }
    }

    pub fn status(&self) -> &Arc<ProcessStatus> {
        &self.status
    }

    /// Start the proxy if it is stopped. Fails when the process is in `Fault`.
    pub async fn start(&self) -> Result<(), CommandError> {
        let _guard = self.start_lock.lock().await;
        match self.status.state() {
            ProcessState::Stopped => {
                tracing::info!("Start requested");
                self.supervisor.start();
                Ok(())
            }
            ProcessState::Fault => Err(CommandError::StartFailed),
            _ => Ok(()),
        }
    }

    /// Stop the proxy if it is running or faulted.
    pub async fn stop(&self) {
        let _guard = self.stop_lock.lock().await;
        if matches!(self.status.state(), ProcessState::Running | ProcessState::Fault) {
            tracing::info!("Stop requested");
            self.supervisor.stop();
        }
    }

    /// Install the default torrc if needed and report the current settings.
    pub async fn get_configuration(&self) -> Result<ConfigurationReport, CommandError> {
        let _guard = self.config_lock.lock().await;
        self.install()?;
        Ok(self.report())
    }

    /// Apply a partial settings update, then start or stop the proxy if the
    /// new mode demands it.
    pub async fn set_configuration(&self, update: SettingsUpdate) -> Result<ConfigurationReport, CommandError> {
        let _guard = self.config_lock.lock().await;
        self.install()?;

        let changed = self.torrc.apply_settings(&update)?;
        if changed && self.status.state() == ProcessState::Running {
            self.supervisor.reload_configuration();
        }

        if let Some(mode) = update.mode() {
            self.state.set_tor_mode(mode)?;
            self.manage(mode).await;
        }

        Ok(self.report())
    }

    async fn manage(&self, mode: TorMode) {
        match (mode, self.status.state()) {
            (TorMode::Always, ProcessState::Stopped) => {
                if let Err(e) = self.start().await {
                    tracing::warn!(error = %e, "Unable to start proxy for ALWAYS mode");
                }
            }
            (TorMode::Never, ProcessState::Running) => self.stop().await,
            _ => {}
        }
    }

    fn install(&self) -> Result<(), CommandError> {
        self.torrc.ensure_installed().map_err(|e| {
            tracing::error!(error = %e, "Unable to install proxy configuration");
            self.status.set_state(ProcessState::Fault);
            CommandError::from(e)
        })?;
        Ok(())
    }

    fn report(&self) -> ConfigurationReport {
        let snapshot = self.torrc.read();
        ConfigurationReport {
            summary: self.torrc.mode_summary(&snapshot, self.state.tor_mode()),
            tor_state: self.status.state(),
            tor_ready: self.status.is_ready(),
        }
    }

    /// Decide whether `address` must go through the proxy.
    ///
    /// Starts the proxy on demand and stops it after a long stretch in
    /// `Auto` mode without unreachable destinations.
    pub async fn check_address(&self, address: &str) -> AddressVerdict {
        let redirect = match parse_address(address) {
            Some((host, port)) => !self.is_reachable(&host, port).await,
            None => {
                tracing::debug!(address, "Ignoring unparseable address");
                false
            }
        };

        if redirect && self.status.state() == ProcessState::Stopped {
            if let Err(e) = self.start().await {
                tracing::warn!(error = %e, "Unable to start proxy for unreachable address");
            }
        }

        if self.status.is_ready() {
            AddressVerdict {
                redirect,
                port: self.torrc.socks_port(),
            }
        } else {
            AddressVerdict::NOT_READY
        }
    }

    async fn is_reachable(&self, host: &str, port: u16) -> bool {
        let mode = self.state.tor_mode();
        let timeout = if self.host.is_alternate_tunnel_active() {
            self.settings.tunnel_timeout
        } else {
            self.settings.direct_timeout
        };
        let prober = self.cache.prober().clone();

        let reachable = self
            .cache
            .lookup(host, port, async {
                match mode {
                    TorMode::Never => true,
                    TorMode::Always => false,
                    TorMode::Auto => {
                        let reachable = prober.probe(host, port, Route::Direct, timeout).await;
                        metrics::record_probe(false, reachable);
                        reachable
                    }
                }
            })
            .await;

        if mode == TorMode::Auto {
            self.track_idle(reachable).await;
        }
        reachable
    }

    async fn track_idle(&self, reachable: bool) {
        let idle = self.settings.idle_shutdown;
        let since = {
            let mut last = self
                .last_unreachable
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if !reachable {
                *last = Some(Instant::now());
                return;
            }
            *last
        };
        let Some(since) = since else {
            return;
        };
        if since.elapsed() <= idle {
            return;
        }

        if !self.cache.is_empty()
            && !self.cache.has_fresh_unreachable(idle)
            && self.status.state() == ProcessState::Running
        {
            tracing::info!(idle_secs = idle.as_secs(), "Stopping proxy after long inactivity");
            self.stop().await;
        }
    }
}
