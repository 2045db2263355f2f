//! torkeeper daemon
//!
//! Keeps a Tor client running as a local SOCKS proxy and reconnects it
//! when the host network changes.
//!
//! # Architecture Overview
//!
//! ```text
//!   sysfs / resolv.conf ──▶ net::sources ──▶ net::observer ──┐
//!                                                             │ network changed
//!                                          ┌──────────────────┴───────────┐
//!                                          ▼                              ▼
//!                              health::connectivity            resilience::restarter
//!                               (probe via SOCKS5)  ──result──▶ (partial / full backoff)
//!                                          ▲                              │
//!                                          │ start / reload               │ start / reload / restart
//!   admin API ──▶ commands::CommandGate ───┴──▶ process::ActionSender ◀───┘
//!        │              │                              │
//!        │              ▼                              ▼
//!        │        torrc::ConfigurationStore     process::ProcessRunner ──▶ tor
//!        │        health::reachability                 │
//!        └──────────────────────────────────── lifecycle::ProcessStatus
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use clap::Parser;
use tokio::sync::mpsc;

use torkeeper::admin::{self, AdminState};
use torkeeper::commands::{CommandGate, GateSettings};
use torkeeper::config::watcher::{apply_updates, ConfigWatcher};
use torkeeper::config::{load_config, KeeperConfig};
use torkeeper::health::{CheckerSettings, ConnectionListener, ConnectivityChecker, Prober, ReachabilityCache, TlsProber};
use torkeeper::lifecycle::{ProcessState, ProcessStatus, Shutdown, StateStore};
use torkeeper::net::{ConnectivityObserver, HostNetwork, LinkPoller, ResolvConfWatcher, SystemNetwork};
use torkeeper::observability::{logging, metrics};
use torkeeper::process::{ActionSender, ProcessRunner, ProcessSupervisor, RunnerSettings};
use torkeeper::resilience::{RestartSupervisor, RestartTimings};
use torkeeper::torrc::{ConfigurationStore, TorMode};

#[derive(Parser)]
#[command(name = "torkeeper", version, about = "Supervisor for a local Tor SOCKS proxy")]
struct Args {
    /// Path to the keeper configuration file.
    #[arg(short, long, default_value = "/etc/torkeeper/keeper.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config_exists = args.config.is_file();
    let config = if config_exists {
        load_config(&args.config)?
    } else {
        KeeperConfig::default()
    };

    logging::init(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "torkeeper starting");
    if !config_exists {
        tracing::warn!(path = ?args.config, "Config file not found, using defaults");
    }

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shared_config = Arc::new(ArcSwap::from_pointee(config.clone()));
    let shutdown = Shutdown::new();

    // Shared state
    let state = Arc::new(StateStore::load(&config.paths.state_file(), config.proxy.default_mode));
    let status = Arc::new(ProcessStatus::new());
    let torrc = Arc::new(ConfigurationStore::from_config(&config));
    let system = Arc::new(SystemNetwork::new(
        config.observer.sysfs_net.clone(),
        config.observer.proc_route.clone(),
    ));
    let host: Arc<dyn HostNetwork> = system.clone();

    // Health
    let prober: Arc<dyn Prober> = Arc::new(TlsProber::new()?);
    let cache = Arc::new(ReachabilityCache::from_config(prober.clone(), &config.reachability));
    let checker = ConnectivityChecker::new(
        host.clone(),
        prober,
        torrc.clone(),
        CheckerSettings::from(&config.checker),
    );

    // Process control
    let (actions, commands) = ActionSender::channel();
    let supervisor: Arc<dyn ProcessSupervisor> = Arc::new(actions);
    let runner = ProcessRunner::new(RunnerSettings::from_config(&config), torrc.clone(), status.clone())
        .with_checker(checker.clone());
    let runner_task = tokio::spawn(runner.run(commands, shutdown.token()));

    let restarter = Arc::new(RestartSupervisor::new(
        status.clone(),
        host.clone(),
        supervisor.clone(),
        config.paths.consensus_cache_file(),
        RestartTimings::from(&config.restarter),
    ));
    let listener: Arc<dyn ConnectionListener> = restarter.clone();
    let listener_handle = checker.add_listener(&listener);

    // Network observation
    let observer = Arc::new(ConnectivityObserver::new(host.clone(), state.clone()));
    let mut changes = observer.subscribe();
    let (event_tx, event_rx) = mpsc::channel(64);
    tokio::spawn(observer.clone().run(event_rx, shutdown.token()));

    let poller = LinkPoller::new(system.clone(), Duration::from_secs(config.observer.poll_interval_secs));
    tokio::spawn(poller.run(event_tx.clone(), shutdown.token()));

    let resolv = ResolvConfWatcher::new(config.observer.resolv_conf.clone(), host.clone());
    if let Some(event) = resolv.current_event() {
        let _ = event_tx.send(event).await;
    }
    let _resolv_watcher = match resolv.run(event_tx) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            tracing::warn!(error = %e, "Unable to watch resolver configuration");
            None
        }
    };

    let network_task = {
        let checker = checker.clone();
        let restarter = restarter.clone();
        let cancel = shutdown.token();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = changes.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let generation = *changes.borrow_and_update();
                        tracing::debug!(generation, "Network changed, checking proxy connection");
                        checker.request_check();
                        restarter.start_restarter_counter();
                    }
                }
            }
        })
    };

    // Keeper config hot reload
    let (watcher, updates) = ConfigWatcher::new(&args.config);
    let _config_watcher = if config_exists {
        match watcher.run() {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                tracing::warn!(error = %e, "Config hot reload disabled");
                None
            }
        }
    } else {
        None
    };
    tokio::spawn(apply_updates(shared_config.clone(), updates));

    // Commands and admin API
    let gate = Arc::new(CommandGate::new(
        supervisor.clone(),
        status.clone(),
        torrc.clone(),
        state.clone(),
        cache,
        host.clone(),
        GateSettings::from(&config.reachability),
    ));

    if config.admin.enabled {
        let addr: SocketAddr = config.admin.bind_address.parse()?;
        let admin_state = AdminState {
            gate: gate.clone(),
            config: shared_config.clone(),
            restarter: Some(restarter.clone()),
        };
        let cancel = shutdown.token();
        tokio::spawn(async move {
            if let Err(e) = admin::serve(addr, admin_state, cancel).await {
                tracing::error!(address = %addr, error = %e, "Admin API failed");
            }
        });
    }

    if let Err(e) = torrc.ensure_installed() {
        tracing::error!(error = %e, "Unable to install proxy configuration");
        status.set_state(ProcessState::Fault);
    } else if state.tor_mode() == TorMode::Always {
        if let Err(e) = gate.start().await {
            tracing::error!(error = %e, "Unable to start proxy");
        }
    }

    shutdown.wait_for_signal().await;
    tracing::info!("Shutting down");

    checker.remove_listener(listener_handle);
    checker.cancel();
    restarter.stop_restarter_counters();
    observer.unsubscribe();

    let _ = network_task.await;
    if let Err(e) = runner_task.await {
        tracing::error!(error = %e, "Process runner task failed");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
