//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Process status (status.rs):
//!     process runner → ProcessStatus (atomics) → every reader
//!
//! Keeper state (state.rs):
//!     keeper-state.json ↔ StateStore (tor mode, last network type)
//!
//! Shutdown (shutdown.rs):
//!     SIGINT/SIGTERM → root token cancelled → child tokens cancelled
//! ```
//!
//! # Design Decisions
//! - Status is lock-free; the runner is the only writer
//! - State writes are skipped when nothing changed

pub mod shutdown;
pub mod state;
pub mod status;

pub use shutdown::Shutdown;
pub use state::{KeeperState, StateStore};
pub use status::{ProcessState, ProcessStatus};
