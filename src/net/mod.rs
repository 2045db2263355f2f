//! Host network observation.
//!
//! # Data Flow
//! ```text
//! /sys/class/net (LinkPoller)      ┐
//! /etc/resolv.conf (ResolvConf..)  ┴→ mpsc<NetworkEvent>
//!     → observer.rs (dedupe, type tracking)
//!     → watch<u64> generation → checker / restarter wiring
//!
//! Queries:
//!     HostNetwork (system.rs) → availability, VPN, active interface
//! ```

pub mod network;
pub mod observer;
pub mod sources;
pub mod system;

pub use network::{HostNetwork, NetworkEvent, NetworkId, NetworkType};
pub use observer::ConnectivityObserver;
pub use sources::{LinkPoller, ResolvConfWatcher};
pub use system::SystemNetwork;
