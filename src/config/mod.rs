//! Keeper configuration subsystem.
//!
//! # Data Flow
//! ```text
//! keeper.toml
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → KeeperConfig (validated, immutable)
//!     → shared via Arc<ArcSwap<..>> to the admin layer
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → atomic swap of the shared config
//! ```
//!
//! This is the daemon's own configuration. The managed proxy's torrc is
//! handled by [`crate::torrc`].

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdminConfig, BridgesConfig, CheckerConfig, KeeperConfig, ObservabilityConfig, ObserverConfig, PathsConfig,
    ProxyDefaults, ReachabilityConfig, RestarterConfig,
};
