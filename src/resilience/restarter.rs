//! Restart supervisor.
//!
//! # Responsibilities
//! - Drive progressive reconnection while the proxy cannot reach the network
//! - Escalate to a hard restart when a bootstrapped proxy stays cut off
//!
//! # Counters
//! ```text
//! partial: 0 idle, n > 0 running (step n waits unit × n²)
//! full:    0 idle, n > 0 ticking towards the ceiling, -1 locked
//! ```
//! The full branch locks itself after a hard restart so that a second
//! restart needs an explicit `stop_restarter_counters` first.
//!
//! # Design Decisions
//! - One branch task at a time; switching always cancels the previous one
//! - Cancellation is routine: a cancelled branch exits without side effects

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::RestarterConfig;
use crate::health::ConnectionListener;
use crate::lifecycle::{ProcessState, ProcessStatus};
use crate::net::HostNetwork;
use crate::observability::metrics;
use crate::process::ProcessSupervisor;
use crate::resilience::backoff::quadratic_delay;

#[derive(Debug, Clone)]
pub struct RestartTimings {
    pub partial_unit: Duration,
    pub full_tick: Duration,
    pub full_reload_tick: i64,
    pub full_ceiling: i64,
}

impl From<&RestarterConfig> for RestartTimings {
    fn from(config: &RestarterConfig) -> Self {
        Self {
            partial_unit: Duration::from_secs(config.partial_unit_secs),
            full_tick: Duration::from_millis(config.full_tick_ms),
            full_reload_tick: config.full_reload_tick,
            full_ceiling: config.full_ceiling,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Branch {
    Partial,
    Full,
}

struct Inner {
    status: Arc<ProcessStatus>,
    host: Arc<dyn HostNetwork>,
    process: Arc<dyn ProcessSupervisor>,
    cache_file: PathBuf,
    timings: RestartTimings,
    partial: AtomicI64,
    full: AtomicI64,
    branch: Mutex<Option<CancellationToken>>,
}

#[derive(Clone)]
pub struct RestartSupervisor {
    inner: Arc<Inner>,
}

impl RestartSupervisor {
    pub fn new(
        status: Arc<ProcessStatus>,
        host: Arc<dyn HostNetwork>,
        process: Arc<dyn ProcessSupervisor>,
        cache_file: PathBuf,
        timings: RestartTimings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                status,
                host,
                process,
                cache_file,
                timings,
                partial: AtomicI64::new(0),
                full: AtomicI64::new(0),
                branch: Mutex::new(None),
            }),
        }
    }

    /// `(partial, full)` counter values.
    pub fn counters(&self) -> (i64, i64) {
        (
            self.inner.partial.load(Ordering::Acquire),
            self.inner.full.load(Ordering::Acquire),
        )
    }

    /// Enter the state machine after a failed connectivity check or a
    /// network change.
    pub fn start_restarter_counter(&self) {
        let inner = &self.inner;
        let entry = inner.lock_branch();
        let ready = inner.status.is_ready();

        if ready && !inner.is_full_running() && !inner.is_full_locked() {
            inner.stop_counters_locked(entry);
            inner.spawn_branch(Branch::Full);
        } else if !ready && !inner.is_partial_running() && !inner.is_full_locked() {
            inner.stop_counters_locked(entry);
            inner.spawn_branch(Branch::Partial);
        } else if !ready && !inner.is_partial_running() {
            // Full counter stays locked.
            drop(entry);
            inner.spawn_branch(Branch::Partial);
        }
    }

    /// Cancel any branch and reset both counters. No-op when idle.
    pub fn stop_restarter_counters(&self) {
        self.inner.stop_counters();
    }
}

impl ConnectionListener for RestartSupervisor {
    fn on_connection_checked(&self, available: bool) {
        if available {
            self.stop_restarter_counters();
        } else {
            self.start_restarter_counter();
        }
    }
}

impl Inner {
    fn is_partial_running(&self) -> bool {
        self.partial.load(Ordering::Acquire) > 0
    }

    fn is_full_running(&self) -> bool {
        self.full.load(Ordering::Acquire) > 0
    }

    fn is_full_locked(&self) -> bool {
        self.full.load(Ordering::Acquire) < 0
    }

    fn reset_counters(&self) {
        self.partial.store(0, Ordering::Release);
        self.full.store(0, Ordering::Release);
    }

    fn lock_branch(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.branch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stop_counters(&self) {
        let guard = self.lock_branch();
        self.stop_counters_locked(guard);
    }

    fn stop_counters_locked(&self, mut guard: MutexGuard<'_, Option<CancellationToken>>) {
        let partial = self.partial.load(Ordering::Acquire);
        let full = self.full.load(Ordering::Acquire);
        match (partial, full) {
            (p, _) if p > 0 => tracing::info!(partial = p, "Stopping partial restart counter"),
            (p, _) if p < 0 => tracing::info!(partial = p, "Resetting partial restart counter"),
            (_, f) if f > 0 => tracing::info!(full = f, "Stopping full restart counter"),
            (_, f) if f < 0 => tracing::info!("Resetting locked full restart counter"),
            _ => return,
        }

        if let Some(token) = guard.take() {
            token.cancel();
        }
        self.reset_counters();
    }

    /// Cancel the running branch, if any, and start `branch`.
    fn spawn_branch(self: &Arc<Self>, branch: Branch) {
        let token = CancellationToken::new();
        if let Some(previous) = self.lock_branch().replace(token.clone()) {
            previous.cancel();
        }

        let inner = self.clone();
        match branch {
            Branch::Partial => tokio::spawn(async move { inner.run_partial(token).await }),
            Branch::Full => tokio::spawn(async move { inner.run_full(token).await }),
        };
    }

    async fn run_partial(self: Arc<Self>, token: CancellationToken) {
        tracing::info!("Starting partial restart counter");
        loop {
            let step = if self.host.is_network_available() {
                self.partial.fetch_add(1, Ordering::AcqRel) + 1
            } else {
                tracing::info!("Network unavailable, abandoning partial restart");
                self.stop_counters();
                return;
            };

            let delay = quadratic_delay(step, self.timings.partial_unit);
            tracing::debug!(step, delay_secs = delay.as_secs(), "Partial restart step scheduled");
            if !sleep_unless_cancelled(&token, delay).await {
                return;
            }

            if self.status.is_ready() && !self.is_full_locked() {
                self.reset_counters();
                self.spawn_branch(Branch::Full);
                return;
            } else if self.host.is_network_available() {
                tracing::info!(step, "Reloading proxy configuration to re-establish a connection");
                self.process.reload_configuration();
                metrics::record_reload();
            }
        }
    }

    async fn run_full(self: Arc<Self>, token: CancellationToken) {
        tracing::info!("Starting full restart counter");
        let timings = &self.timings;

        while self.full.load(Ordering::Acquire) < timings.full_ceiling {
            if self.full.load(Ordering::Acquire) == timings.full_reload_tick
                && self.status.is_ready()
                && self.host.is_network_available()
            {
                tracing::info!("Reloading proxy configuration to re-establish a connection");
                self.process.reload_configuration();
                metrics::record_reload();
            }
            self.full.fetch_add(1, Ordering::AcqRel);
            if !sleep_unless_cancelled(&token, timings.full_tick).await {
                return;
            }
        }

        if self.status.state() == ProcessState::Running
            && self.status.is_ready()
            && self.host.is_network_available()
            && !token.is_cancelled()
        {
            self.delete_cached_consensus();
            self.process.restart();
            metrics::record_restart();
            self.full.store(-1, Ordering::Release);
            tracing::info!("Restarting proxy to re-establish a connection");
        } else {
            self.reset_counters();
            tracing::info!("Resetting restart counters");
        }
    }

    fn delete_cached_consensus(&self) {
        match fs::remove_file(&self.cache_file) {
            Ok(()) => tracing::debug!(path = ?self.cache_file, "Deleted cached consensus"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = ?self.cache_file, error = %e, "Unable to delete cached consensus"),
        }
    }
}

/// Sleep for `duration`; `false` if `token` was cancelled first.
async fn sleep_unless_cancelled(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        biased;
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => !token.is_cancelled(),
    }
}
