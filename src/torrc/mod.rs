//! Managed proxy configuration (torrc) subsystem.
//!
//! # Data Flow
//! ```text
//! torrc on disk
//!     → store.rs read() → ConfigSnapshot (entry.rs)
//!     → transforms: set_port (port.rs), set_bridge_mode (bridges.rs)
//!     → store.rs write(original, updated), skipped when unchanged
//!
//! Reporting:
//!     ConfigSnapshot → mode_summary → ModeSummary (mode.rs)
//! ```
//!
//! # Design Decisions
//! - Line order is preserved; duplicate keys are positional
//! - Snapshots are values; every mutation yields a new one
//! - Malformed input degrades to defaults instead of aborting

pub mod bridges;
pub mod entry;
pub mod mode;
pub mod port;
pub mod store;

pub use bridges::{BridgeCatalog, BridgeType, TransportPaths};
pub use entry::{ConfigEntry, ConfigSnapshot};
pub use mode::{ModeSummary, PortValue, SettingsUpdate, TorMode};
pub use store::{ConfigurationStore, TorrcError};
