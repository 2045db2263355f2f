//! Command layer consumed by the admin API.
//!
//! # Data Flow
//! ```text
//! admin handlers
//!     → gate.rs CommandGate (start / stop / configuration locks)
//!         → ConfigurationStore, StateStore (mode)
//!         → ProcessSupervisor (start / stop / reload)
//!     → check_address
//!         → address.rs (parse https://host[:port]/...)
//!         → ReachabilityCache (mode-dependent verdict)
//!         → idle shutdown / on-demand start
//! ```
//!
//! # Design Decisions
//! - Each resource has its own lock so a slow configuration write never
//!   blocks a stop request
//! - Commands only enqueue process actions; callers read the outcome back
//!   through `ProcessStatus`

pub mod address;
pub mod gate;

use std::io;

use crate::torrc::TorrcError;

pub use address::parse_address;
pub use gate::{AddressVerdict, CommandGate, ConfigurationReport, GateSettings};

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("start failed, process is in FAULT state")]
    StartFailed,
    #[error(transparent)]
    Torrc(#[from] TorrcError),
    #[error("unable to persist keeper state: {0}")]
    State(#[from] io::Error),
}
