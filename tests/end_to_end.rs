//! Command gate driving a real child process through the runner.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use torkeeper::commands::{AddressVerdict, CommandGate, GateSettings};
use torkeeper::health::ReachabilityCache;
use torkeeper::lifecycle::{ProcessState, ProcessStatus, StateStore};
use torkeeper::process::{ActionSender, ProcessRunner, RunnerSettings};
use torkeeper::torrc::{SettingsUpdate, TorMode};

mod common;
use common::{eventually, Answer, FakeHost, ScriptedProber};

#[tokio::test]
async fn always_mode_runs_proxy_until_never() {
    let dir = tempfile::tempdir().unwrap();
    let script = common::write_fake_proxy(dir.path());
    let torrc = common::torrc_store(dir.path());
    let status = Arc::new(ProcessStatus::new());

    let (sender, commands) = ActionSender::channel();
    let runner = ProcessRunner::new(
        RunnerSettings {
            binary: PathBuf::from("/bin/sh"),
            launcher_args: vec![script.display().to_string()],
            stop_timeout: Duration::from_secs(2),
            restart_delay: Duration::from_millis(50),
        },
        torrc.clone(),
        status.clone(),
    );
    let cancel = CancellationToken::new();
    let runner_task = tokio::spawn(runner.run(commands, cancel.clone()));

    let gate = CommandGate::new(
        Arc::new(sender),
        status.clone(),
        torrc,
        Arc::new(StateStore::in_memory(TorMode::Auto)),
        Arc::new(ReachabilityCache::new(
            ScriptedProber::new(&[], Answer::Down),
            Duration::from_secs(180),
            Duration::from_secs(120),
        )),
        FakeHost::online(),
        GateSettings {
            direct_timeout: Duration::from_secs(3),
            tunnel_timeout: Duration::from_secs(8),
            idle_shutdown: Duration::from_secs(300),
        },
    );

    let report = gate
        .set_configuration(SettingsUpdate {
            tor_mode: Some("ALWAYS".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(report.summary.tor_mode, TorMode::Always);

    eventually("proxy readiness", || status.is_ready()).await;
    assert_eq!(
        gate.check_address("https://example.org/").await,
        AddressVerdict { redirect: true, port: 9051 }
    );

    gate.set_configuration(SettingsUpdate {
        tor_mode: Some("NEVER".into()),
        ..Default::default()
    })
    .await
    .unwrap();
    eventually("proxy stop", || status.state() == ProcessState::Stopped).await;

    cancel.cancel();
    runner_task.await.unwrap();
}
