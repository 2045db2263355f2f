//! Child process runner for the proxy binary.

use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::KeeperConfig;
use crate::health::ConnectivityChecker;
use crate::lifecycle::{ProcessState, ProcessStatus};
use crate::process::ProcessCommand;
use crate::torrc::ConfigurationStore;

/// Line the proxy prints once it has a usable circuit.
pub const BOOTSTRAP_DONE: &str = "Bootstrapped 100% (done): Done";

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub binary: PathBuf,
    /// Arguments placed before `-f <torrc>`.
    pub launcher_args: Vec<String>,
    /// Grace period between SIGTERM and SIGKILL.
    pub stop_timeout: Duration,
    /// Pause between stopping and starting on restart.
    pub restart_delay: Duration,
}

impl RunnerSettings {
    pub fn from_config(config: &KeeperConfig) -> Self {
        Self {
            binary: config.paths.tor_binary.clone(),
            launcher_args: Vec::new(),
            stop_timeout: Duration::from_secs(10),
            restart_delay: Duration::from_secs(5),
        }
    }
}

enum Event {
    Command(ProcessCommand),
    Exited(io::Result<ExitStatus>),
}

/// Owns the proxy child process and executes [`ProcessCommand`]s.
pub struct ProcessRunner {
    settings: RunnerSettings,
    torrc: Arc<ConfigurationStore>,
    status: Arc<ProcessStatus>,
    checker: Option<ConnectivityChecker>,
    child: Option<Child>,
}

impl ProcessRunner {
    pub fn new(settings: RunnerSettings, torrc: Arc<ConfigurationStore>, status: Arc<ProcessStatus>) -> Self {
        Self {
            settings,
            torrc,
            status,
            checker: None,
            child: None,
        }
    }

    /// Request a connectivity check after every start and reload.
    pub fn with_checker(mut self, checker: ConnectivityChecker) -> Self {
        self.checker = Some(checker);
        self
    }

    /// Execute commands until the channel closes or `cancel` fires, then
    /// stop the child.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<ProcessCommand>, cancel: CancellationToken) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => None,
                command = commands.recv() => command.map(Event::Command),
                exit = wait_child(&mut self.child) => Some(Event::Exited(exit)),
            };

            match event {
                Some(Event::Command(command)) => self.handle(command).await,
                Some(Event::Exited(exit)) => self.on_exit(exit).await,
                None => break,
            }
        }

        self.stop_child().await;
        tracing::info!("Process runner stopped");
    }

    async fn handle(&mut self, command: ProcessCommand) {
        tracing::debug!(?command, state = %self.status.state(), "Handling process command");
        match command {
            ProcessCommand::Start => self.start(),
            ProcessCommand::Stop => {
                if self.child.is_some() || self.status.state() == ProcessState::Fault {
                    self.stop_child().await;
                }
            }
            ProcessCommand::Restart => {
                if self.status.state() != ProcessState::Running {
                    tracing::debug!("Ignoring restart, process is not running");
                    return;
                }
                self.stop_child().await;
                self.status.set_state(ProcessState::Starting);
                tokio::time::sleep(self.settings.restart_delay).await;
                self.start();
            }
            ProcessCommand::Reload => self.reload(),
        }
    }

    fn start(&mut self) {
        if self.child.is_some() {
            tracing::debug!("Process already running");
            return;
        }
        self.status.set_state(ProcessState::Starting);

        if let Err(e) = self.torrc.ensure_installed() {
            tracing::error!(error = %e, "Unable to install proxy configuration");
            self.status.set_state(ProcessState::Fault);
            return;
        }
        let torrc = self.torrc.clone();
        if let Err(e) = torrc.update(|snapshot| torrc.correct_plugin_paths(snapshot)) {
            tracing::warn!(error = %e, "Unable to correct transport plugin paths");
        }

        let spawned = Command::new(&self.settings.binary)
            .args(&self.settings.launcher_args)
            .arg("-f")
            .arg(self.torrc.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(binary = ?self.settings.binary, error = %e, "Unable to start proxy");
                self.status.set_state(ProcessState::Fault);
                return;
            }
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        tracing::info!(pid = ?child.id(), port = self.torrc.socks_port(), "Proxy started");
        self.child = Some(child);
        self.status.set_state(ProcessState::Running);

        if let Some(stdout) = stdout {
            tokio::spawn(watch_stdout(stdout, self.status.clone()));
        }
        if let Some(stderr) = stderr {
            tokio::spawn(log_stderr(stderr));
        }
        self.request_check();
    }

    fn reload(&self) {
        if self.status.state() != ProcessState::Running {
            tracing::debug!("Ignoring reload, process is not running");
            return;
        }
        match self.child.as_ref().and_then(Child::id) {
            Some(pid) => {
                send_signal(pid, Signal::SIGHUP);
                tracing::info!(pid, "Proxy configuration reload requested");
                self.request_check();
            }
            None => tracing::debug!("No child to reload"),
        }
    }

    async fn stop_child(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Some(pid) = child.id() {
                send_signal(pid, Signal::SIGTERM);
            }
            match tokio::time::timeout(self.settings.stop_timeout, child.wait()).await {
                Ok(Ok(exit)) => tracing::info!(%exit, "Proxy stopped"),
                Ok(Err(e)) => tracing::warn!(error = %e, "Unable to reap proxy"),
                Err(_) => {
                    tracing::warn!("Proxy ignored SIGTERM, killing");
                    if let Err(e) = child.kill().await {
                        tracing::error!(error = %e, "Unable to kill proxy");
                    }
                }
            }
        }
        self.status.set_state(ProcessState::Stopped);
    }

    async fn on_exit(&mut self, exit: io::Result<ExitStatus>) {
        self.child = None;
        let was_serving = self.status.state() == ProcessState::Running && self.status.is_ready();

        match exit {
            Ok(exit) if exit.success() => {
                tracing::info!(%exit, "Proxy exited");
                self.status.set_state(ProcessState::Stopped);
            }
            Ok(exit) if was_serving => {
                tracing::warn!(%exit, "Proxy crashed, trying to restart");
                self.status.set_state(ProcessState::Starting);
                tokio::time::sleep(self.settings.restart_delay).await;
                self.start();
            }
            Ok(exit) => {
                tracing::error!(%exit, "Proxy exited with an error");
                self.status.set_state(ProcessState::Stopped);
            }
            Err(e) => {
                tracing::error!(error = %e, "Lost track of proxy process");
                self.status.set_state(ProcessState::Stopped);
            }
        }
    }

    fn request_check(&self) {
        if let Some(checker) = &self.checker {
            checker.request_check();
        }
    }
}

async fn wait_child(child: &mut Option<Child>) -> io::Result<ExitStatus> {
    match child {
        Some(child) => child.wait().await,
        None => std::future::pending().await,
    }
}

fn send_signal(pid: u32, sig: Signal) {
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(e) = signal::kill(Pid::from_raw(raw), sig) {
        tracing::warn!(pid, signal = ?sig, error = %e, "Unable to signal proxy");
    }
}

async fn watch_stdout<R>(stdout: R, status: Arc<ProcessStatus>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stdout).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(target: "torkeeper::proxy", "{line}");
        if line.ends_with(BOOTSTRAP_DONE) {
            status.set_ready(true);
        }
    }
}

async fn log_stderr<R>(stderr: R)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::warn!(target: "torkeeper::proxy", "{line}");
    }
}
