//! Shared fakes for integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use torkeeper::health::{ProbeError, Prober, Route};
use torkeeper::net::HostNetwork;
use torkeeper::process::{ProcessCommand, ProcessSupervisor};
use torkeeper::torrc::{BridgeCatalog, ConfigurationStore, TransportPaths};

/// Host network with switchable availability and VPN flags.
pub struct FakeHost {
    pub available: AtomicBool,
    pub tunnel: AtomicBool,
}

impl FakeHost {
    pub fn online() -> Arc<Self> {
        Arc::new(Self {
            available: AtomicBool::new(true),
            tunnel: AtomicBool::new(false),
        })
    }
}

impl HostNetwork for FakeHost {
    fn is_network_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn is_alternate_tunnel_active(&self) -> bool {
        self.tunnel.load(Ordering::SeqCst)
    }

    fn active_network(&self) -> Option<String> {
        self.is_network_available().then(|| "eth0".to_string())
    }
}

/// Supervisor that only records what it was asked to do.
#[derive(Default)]
pub struct RecordingSupervisor {
    commands: Mutex<Vec<ProcessCommand>>,
}

impl RecordingSupervisor {
    pub fn commands(&self) -> Vec<ProcessCommand> {
        self.commands.lock().unwrap().clone()
    }

    fn push(&self, command: ProcessCommand) {
        self.commands.lock().unwrap().push(command);
    }
}

impl ProcessSupervisor for RecordingSupervisor {
    fn start(&self) {
        self.push(ProcessCommand::Start);
    }

    fn stop(&self) {
        self.push(ProcessCommand::Stop);
    }

    fn restart(&self) {
        self.push(ProcessCommand::Restart);
    }

    fn reload_configuration(&self) {
        self.push(ProcessCommand::Reload);
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Answer {
    Up,
    Down,
}

/// Prober answering from a script, then with a fixed fallback.
pub struct ScriptedProber {
    script: Mutex<VecDeque<Answer>>,
    fallback: Answer,
    calls: AtomicUsize,
}

impl ScriptedProber {
    pub fn new(script: &[Answer], fallback: Answer) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.iter().copied().collect()),
            fallback,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn check(&self, _host: &str, _port: u16, _route: Route, _timeout: Duration) -> Result<u16, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let answer = self.script.lock().unwrap().pop_front().unwrap_or(self.fallback);
        match answer {
            Answer::Up => Ok(200),
            Answer::Down => Err(ProbeError::Status(502)),
        }
    }
}

pub fn torrc_store(dir: &Path) -> Arc<ConfigurationStore> {
    Arc::new(ConfigurationStore::new(
        dir.join("tor").join("torrc"),
        dir.join("tor_data"),
        9051,
        BridgeCatalog::builtin(),
        TransportPaths {
            obfs4proxy: PathBuf::from("/pt/obfs4proxy"),
            snowflake: PathBuf::from("/pt/snowflake"),
            webtunnel: PathBuf::from("/pt/webtunnel"),
        },
    ))
}

/// Shell script standing in for the proxy binary. Run it as
/// `/bin/sh <script> -f <torrc>`.
pub const FAKE_PROXY_SCRIPT: &str = r#"
trap 'exit 0' TERM
echo "[notice] Bootstrapped 100% (done): Done"
while true; do sleep 0.1; done
"#;

pub fn write_fake_proxy(dir: &Path) -> PathBuf {
    let path = dir.join("fake-proxy.sh");
    std::fs::write(&path, FAKE_PROXY_SCRIPT).unwrap();
    path
}

/// Poll `cond` in real time for up to five seconds.
pub async fn eventually(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..100 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {what}");
}
