//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the keeper.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::path::PathBuf;
use serde::{Deserialize, Serialize};

use crate::torrc::TorMode;

/// Root configuration for the keeper daemon.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct KeeperConfig {
    /// Filesystem layout (data dir, torrc, binaries).
    pub paths: PathsConfig,

    /// Managed proxy defaults.
    pub proxy: ProxyDefaults,

    /// Reachability cache and idle-shutdown settings.
    pub reachability: ReachabilityConfig,

    /// Connectivity checker poll loop.
    pub checker: CheckerConfig,

    /// Restart supervisor timings.
    pub restarter: RestarterConfig,

    /// Network observer settings.
    pub observer: ObserverConfig,

    /// Extra bridge descriptors, keyed by bridge type.
    pub bridges: BridgesConfig,

    /// Local admin API.
    pub admin: AdminConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Filesystem layout.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root directory for torrc, tor data and keeper state.
    pub data_dir: PathBuf,

    /// Explicit torrc location. Defaults to `<data_dir>/tor/torrc`.
    pub torrc: Option<PathBuf>,

    /// Proxy binary to launch.
    pub tor_binary: PathBuf,

    /// Pluggable transport executables.
    pub obfs4proxy: PathBuf,
    pub snowflake: PathBuf,
    pub webtunnel: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/torkeeper"),
            torrc: None,
            tor_binary: PathBuf::from("/usr/bin/tor"),
            obfs4proxy: PathBuf::from("/usr/bin/obfs4proxy"),
            snowflake: PathBuf::from("/usr/bin/snowflake-client"),
            webtunnel: PathBuf::from("/usr/bin/webtunnel-client"),
        }
    }
}

impl PathsConfig {
    pub fn torrc_path(&self) -> PathBuf {
        self.torrc
            .clone()
            .unwrap_or_else(|| self.data_dir.join("tor").join("torrc"))
    }

    pub fn tor_data_dir(&self) -> PathBuf {
        self.data_dir.join("tor_data")
    }

    /// Cached consensus deleted before a hard restart.
    pub fn consensus_cache_file(&self) -> PathBuf {
        self.tor_data_dir().join("cached-microdesc-consensus")
    }

    pub fn state_file(&self) -> PathBuf {
        self.data_dir.join("keeper-state.json")
    }
}

/// Defaults applied when the torrc or state file is silent.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyDefaults {
    /// SOCKS port used when the torrc has no valid `SOCKSPort`.
    pub default_socks_port: u16,

    /// Mode used until the user picks one.
    pub default_mode: TorMode,
}

impl Default for ProxyDefaults {
    fn default() -> Self {
        Self {
            default_socks_port: 9051,
            default_mode: TorMode::Auto,
        }
    }
}

/// Reachability cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReachabilityConfig {
    /// How long a reachable verdict is trusted, in seconds.
    pub reachable_ttl_secs: u64,

    /// How long an unreachable verdict is trusted, in seconds.
    /// Must be shorter than `reachable_ttl_secs`.
    pub unreachable_ttl_secs: u64,

    /// Quiet period after the last unreachable destination before the
    /// process is stopped for inactivity, in seconds.
    pub idle_shutdown_secs: u64,

    /// Direct probe timeout in milliseconds.
    pub direct_timeout_ms: u64,

    /// Direct probe timeout while a VPN or other tunnel is active.
    pub tunnel_timeout_ms: u64,
}

impl Default for ReachabilityConfig {
    fn default() -> Self {
        Self {
            reachable_ttl_secs: 3 * 60,
            unreachable_ttl_secs: 2 * 60,
            idle_shutdown_secs: 5 * 60,
            direct_timeout_ms: 3_000,
            tunnel_timeout_ms: 8_000,
        }
    }
}

/// Connectivity checker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CheckerConfig {
    /// Delay between attempts, in seconds.
    pub interval_secs: u64,

    /// Extra delay after a timed-out attempt, in seconds.
    pub cooldown_secs: u64,

    /// Per-attempt timeout, in seconds.
    pub attempt_timeout_secs: u64,

    /// Overall loop timeout, in seconds.
    pub loop_timeout_secs: u64,

    /// Hosts probed through the proxy; one is picked at random per attempt.
    pub targets: Vec<String>,

    /// TLS port probed on the targets.
    pub target_port: u16,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            cooldown_secs: 30,
            attempt_timeout_secs: 120,
            loop_timeout_secs: 20 * 60,
            targets: vec![
                "www.torproject.org".to_string(),
                "www.google.com".to_string(),
                "www.cloudflare.com".to_string(),
                "www.quad9.net".to_string(),
            ],
            target_port: 443,
        }
    }
}

/// Restart supervisor timings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RestarterConfig {
    /// Base unit of the quadratic partial backoff, in seconds.
    pub partial_unit_secs: u64,

    /// Full branch tick length, in milliseconds.
    pub full_tick_ms: u64,

    /// Tick at which the full branch issues its single reload.
    pub full_reload_tick: i64,

    /// Tick at which the full branch restarts the process.
    pub full_ceiling: i64,
}

impl Default for RestarterConfig {
    fn default() -> Self {
        Self {
            partial_unit_secs: 60,
            full_tick_ms: 1_000,
            full_reload_tick: 10,
            full_ceiling: 60,
        }
    }
}

/// Network observer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObserverConfig {
    /// Interface poll interval, in seconds.
    pub poll_interval_secs: u64,

    /// Resolver configuration watched for DNS server changes.
    pub resolv_conf: PathBuf,

    /// Interface state directory.
    pub sysfs_net: PathBuf,

    /// Kernel routing table, used to find the default route.
    pub proc_route: PathBuf,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            resolv_conf: PathBuf::from("/etc/resolv.conf"),
            sysfs_net: PathBuf::from("/sys/class/net"),
            proc_route: PathBuf::from("/proc/net/route"),
        }
    }
}

/// Bridge descriptors beyond the built-in snowflake set.
///
/// ```toml
/// [bridges.descriptors]
/// OBFS4 = ["obfs4 192.0.2.10:443 0123... cert=... iat-mode=0"]
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct BridgesConfig {
    pub descriptors: BTreeMap<String, Vec<String>>,
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8181".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config: KeeperConfig = toml::from_str("").unwrap();
        assert_eq!(config.proxy.default_socks_port, 9051);
        assert_eq!(config.reachability.reachable_ttl_secs, 180);
        assert_eq!(config.checker.targets.len(), 4);
    }

    #[test]
    fn derived_paths_follow_data_dir() {
        let config: KeeperConfig = toml::from_str(
            r#"
            [paths]
            data_dir = "/tmp/keeper"
            "#,
        )
        .unwrap();

        assert_eq!(config.paths.torrc_path(), PathBuf::from("/tmp/keeper/tor/torrc"));
        assert_eq!(
            config.paths.consensus_cache_file(),
            PathBuf::from("/tmp/keeper/tor_data/cached-microdesc-consensus")
        );
    }

    #[test]
    fn bridge_descriptors_parse_by_type() {
        let config: KeeperConfig = toml::from_str(
            r#"
            [bridges.descriptors]
            OBFS4 = ["obfs4 192.0.2.10:443 AAAA cert=x iat-mode=0"]
            "#,
        )
        .unwrap();
        assert_eq!(config.bridges.descriptors["OBFS4"].len(), 1);
    }

    #[test]
    fn tor_mode_parses_from_toml() {
        let config: KeeperConfig = toml::from_str(
            r#"
            [proxy]
            default_mode = "ALWAYS"
            "#,
        )
        .unwrap();
        assert_eq!(config.proxy.default_mode, TorMode::Always);
    }
}
