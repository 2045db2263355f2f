//! Shared process status.
//!
//! # Responsibilities
//! - Hold the managed process lifecycle state and readiness flag
//! - Allow lock-free reads from every subsystem
//!
//! # Design Decisions
//! - Single writer (the process runner), many readers
//! - Readiness implies `Running`; any other state clears it

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use serde::{Deserialize, Serialize};

use crate::observability::metrics;

/// Lifecycle state of the managed process.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Fault = 3,
}

impl From<u8> for ProcessState {
    fn from(val: u8) -> Self {
        match val {
            1 => ProcessState::Starting,
            2 => ProcessState::Running,
            3 => ProcessState::Fault,
            _ => ProcessState::Stopped,
        }
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProcessState::Stopped => "STOPPED",
            ProcessState::Starting => "STARTING",
            ProcessState::Running => "RUNNING",
            ProcessState::Fault => "FAULT",
        };
        f.write_str(name)
    }
}

/// Process-wide status cell, constructed once and shared via `Arc`.
#[derive(Debug)]
pub struct ProcessStatus {
    state: AtomicU8,
    ready: AtomicBool,
}

impl ProcessStatus {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ProcessState::Stopped as u8),
            ready: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> ProcessState {
        ProcessState::from(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: ProcessState) {
        let previous = ProcessState::from(self.state.swap(state as u8, Ordering::AcqRel));
        if state != ProcessState::Running {
            self.set_ready_flag(false);
        }
        if previous != state {
            tracing::info!(from = %previous, to = %state, "Process state changed");
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Mark the process as bootstrapped. Ignored unless the state is `Running`.
    pub fn set_ready(&self, ready: bool) {
        if ready && self.state() != ProcessState::Running {
            tracing::debug!(state = %self.state(), "Ignoring readiness outside RUNNING");
            return;
        }
        self.set_ready_flag(ready);
    }

    fn set_ready_flag(&self, ready: bool) {
        let previous = self.ready.swap(ready, Ordering::AcqRel);
        if previous != ready {
            tracing::info!(ready, "Process readiness changed");
            metrics::record_process_ready(ready);
        }
    }
}

impl Default for ProcessStatus {
    fn default() -> Self {
        Self::new()
    }
}
