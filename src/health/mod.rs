//! Reachability and connectivity health.
//!
//! # Data Flow
//! ```text
//! Destination checks (command layer):
//!     check_address → reachability.rs (TTL cache) → probe.rs (direct)
//!
//! Proxy health (network changes):
//!     observer signal → connectivity.rs poll loop
//!         → probe.rs via SOCKS5 → listeners (restart supervisor)
//! ```

pub mod connectivity;
pub mod probe;
pub mod reachability;

pub use connectivity::{CheckerSettings, ConnectionListener, ConnectivityChecker, ListenerHandle};
pub use probe::{ProbeError, Prober, Route, TlsProber};
pub use reachability::ReachabilityCache;
