//! Reconnection and restart policy.
//!
//! # Data Flow
//! ```text
//! connectivity check failed ─→ restarter.rs start_restarter_counter
//!                                 ├─ not ready: partial branch (backoff.rs)
//!                                 └─ ready:     full branch → restart
//! connectivity check passed ─→ stop_restarter_counters
//! ```

pub mod backoff;
pub mod restarter;

pub use restarter::{RestartSupervisor, RestartTimings};
