//! torkeeper: supervisor for a local Tor SOCKS proxy.

pub mod config;
pub mod torrc;
pub mod net;
pub mod health;
pub mod lifecycle;
pub mod process;
pub mod resilience;
pub mod commands;
pub mod observability;
pub mod admin;

pub use config::schema::KeeperConfig;
pub use commands::CommandGate;
pub use lifecycle::Shutdown;
