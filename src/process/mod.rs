//! Managed process control.
//!
//! # Data Flow
//! ```text
//! restarter / command gate
//!     → ProcessSupervisor (ActionSender) → mpsc<ProcessCommand>
//!     → runner.rs ProcessRunner
//!         → spawn / SIGHUP / SIGTERM the proxy binary
//!         → ProcessStatus (state, readiness from stdout)
//! ```
//!
//! # Design Decisions
//! - Commands are fire-and-forget; callers observe the outcome through
//!   `ProcessStatus`
//! - A single runner task owns the child, so commands never race

pub mod runner;

use tokio::sync::mpsc;

pub use runner::{ProcessRunner, RunnerSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessCommand {
    Start,
    Stop,
    Restart,
    Reload,
}

/// Control surface of the managed proxy process.
pub trait ProcessSupervisor: Send + Sync {
    fn start(&self);
    fn stop(&self);
    fn restart(&self);
    /// Ask the running process to re-read its configuration.
    fn reload_configuration(&self);
}

/// [`ProcessSupervisor`] that forwards commands to a [`ProcessRunner`].
#[derive(Debug, Clone)]
pub struct ActionSender {
    tx: mpsc::UnboundedSender<ProcessCommand>,
}

impl ActionSender {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProcessCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, command: ProcessCommand) {
        tracing::debug!(?command, "Sending process command");
        if self.tx.send(command).is_err() {
            tracing::warn!(?command, "Process runner is gone, dropping command");
        }
    }
}

impl ProcessSupervisor for ActionSender {
    fn start(&self) {
        self.send(ProcessCommand::Start);
    }

    fn stop(&self) {
        self.send(ProcessCommand::Stop);
    }

    fn restart(&self) {
        self.send(ProcessCommand::Restart);
    }

    fn reload_configuration(&self) {
        self.send(ProcessCommand::Reload);
    }
}
