//! File-backed torrc store.
//!
//! # Responsibilities
//! - Read the torrc into a [`ConfigSnapshot`]
//! - Write a changed snapshot back atomically
//! - Port, bridge and summary transforms over snapshots
//!
//! # Design Decisions
//! - Reads fail soft: an unreadable file is an empty snapshot
//! - Writes are skipped when nothing changed
//! - Transforms never fail; bad input returns the snapshot unchanged

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::KeeperConfig;
use crate::torrc::bridges::{self, BridgeCatalog, BridgeType, TransportPaths};
use crate::torrc::entry::{ConfigEntry, ConfigSnapshot};
use crate::torrc::mode::{ModeSummary, SettingsUpdate, TorMode};
use crate::torrc::port::{parse_port, port_from_value, replace_port};

pub const SOCKS_PORT: &str = "SOCKSPort";
pub const SOCKS_PORT_COMMENTED: &str = "#SOCKSPort";

const DEFAULT_TEMPLATE: &str = include_str!("default.torrc");

/// Error type for torrc persistence.
#[derive(Debug, thiserror::Error)]
pub enum TorrcError {
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to install default configuration at {path}: {source}")]
    Install {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Reads and rewrites the managed proxy's torrc.
#[derive(Debug, Clone)]
pub struct ConfigurationStore {
    path: PathBuf,
    data_dir: PathBuf,
    default_socks_port: u16,
    catalog: BridgeCatalog,
    transports: TransportPaths,
}

impl ConfigurationStore {
    pub fn new(
        path: PathBuf,
        data_dir: PathBuf,
        default_socks_port: u16,
        catalog: BridgeCatalog,
        transports: TransportPaths,
    ) -> Self {
        Self {
            path,
            data_dir,
            default_socks_port,
            catalog,
            transports,
        }
    }

    pub fn from_config(config: &KeeperConfig) -> Self {
        Self::new(
            config.paths.torrc_path(),
            config.paths.tor_data_dir(),
            config.proxy.default_socks_port,
            BridgeCatalog::with_extra(&config.bridges.descriptors),
            TransportPaths {
                obfs4proxy: config.paths.obfs4proxy.clone(),
                snowflake: config.paths.snowflake.clone(),
                webtunnel: config.paths.webtunnel.clone(),
            },
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Current torrc contents. Unreadable files yield an empty snapshot.
    pub fn read(&self) -> ConfigSnapshot {
        match fs::read_to_string(&self.path) {
            Ok(text) => ConfigSnapshot::parse(&text),
            Err(e) => {
                tracing::warn!(path = ?self.path, error = %e, "Unable to read torrc");
                ConfigSnapshot::default()
            }
        }
    }

    /// Persist `updated` if it differs from `original`.
    ///
    /// Returns `Ok(false)` without touching the filesystem when the two
    /// snapshots are identical or `updated` is empty.
    pub fn write(&self, original: &ConfigSnapshot, updated: &ConfigSnapshot) -> Result<bool, TorrcError> {
        if updated.is_empty() || !updated.differs_from(original) {
            return Ok(false);
        }

        self.replace_contents(&updated.render())
            .map_err(|source| TorrcError::Write {
                path: self.path.clone(),
                source,
            })?;

        tracing::info!(path = ?self.path, entries = updated.len(), "torrc rewritten");
        Ok(true)
    }

    /// Read, transform and write back in one step.
    pub fn update<F>(&self, transform: F) -> Result<bool, TorrcError>
    where
        F: FnOnce(&ConfigSnapshot) -> ConfigSnapshot,
    {
        let original = self.read();
        let updated = transform(&original);
        self.write(&original, &updated)
    }

    fn replace_contents(&self, contents: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, &self.path).inspect_err(|_| {
            let _ = fs::remove_file(&tmp);
        })
    }

    /// SOCKS port from the first `SOCKSPort` directive, or the default.
    pub fn socks_port(&self) -> u16 {
        self.socks_port_of(&self.read())
    }

    pub fn socks_port_of(&self, snapshot: &ConfigSnapshot) -> u16 {
        snapshot
            .first(SOCKS_PORT)
            .and_then(|e| port_from_value(&e.value))
            .unwrap_or(self.default_socks_port)
    }

    /// Rewrite the port of every active and commented-out `SOCKSPort`.
    pub fn set_port(&self, snapshot: &ConfigSnapshot, port_text: &str) -> ConfigSnapshot {
        let Some(port) = parse_port(port_text.trim()) else {
            tracing::warn!(port = %port_text, "Ignoring invalid SOCKS port");
            return snapshot.clone();
        };

        snapshot
            .iter()
            .map(|entry| {
                if entry.key == SOCKS_PORT || entry.key == SOCKS_PORT_COMMENTED {
                    ConfigEntry::new(entry.key.clone(), replace_port(&entry.value, port))
                } else {
                    entry.clone()
                }
            })
            .collect()
    }

    pub fn set_bridge_mode(&self, snapshot: &ConfigSnapshot, bridge: BridgeType) -> ConfigSnapshot {
        bridges::apply_bridge_mode(snapshot, bridge, &self.catalog, &self.transports)
    }

    /// Point transport plugin lines at the configured executables.
    pub fn correct_plugin_paths(&self, snapshot: &ConfigSnapshot) -> ConfigSnapshot {
        bridges::correct_plugin_paths(snapshot, &self.transports)
    }

    /// Apply the port and bridge parts of a settings update in one
    /// read-modify-write. The mode is not stored in the torrc.
    pub fn apply_settings(&self, update: &SettingsUpdate) -> Result<bool, TorrcError> {
        let port = update.port_text();
        let bridge = update.bridge();
        if port.is_none() && bridge.is_none() {
            return Ok(false);
        }

        self.update(|snapshot| {
            let mut next = snapshot.clone();
            if let Some(port) = port.as_deref() {
                next = self.set_port(&next, port);
            }
            if let Some(bridge) = bridge {
                next = self.set_bridge_mode(&next, bridge);
            }
            next
        })
    }

    /// Summarize mode, port and bridge type. When several `SOCKSPort`
    /// lines exist the last one wins, matching how the proxy resolves them.
    pub fn mode_summary(&self, snapshot: &ConfigSnapshot, mode: TorMode) -> ModeSummary {
        let tor_port = snapshot
            .entries()
            .iter()
            .rev()
            .find(|e| e.key == SOCKS_PORT)
            .and_then(|e| port_from_value(&e.value))
            .unwrap_or(self.default_socks_port);

        ModeSummary {
            tor_mode: mode,
            tor_port,
            bridge_type: bridges::detect_bridge_type(snapshot),
        }
    }

    /// Write the bundled default torrc when none exists yet.
    ///
    /// Returns `Ok(true)` when a file was installed.
    pub fn ensure_installed(&self) -> Result<bool, TorrcError> {
        if self.exists() {
            return Ok(false);
        }

        let contents = DEFAULT_TEMPLATE
            .replace("@DATA_DIR@", &self.data_dir.display().to_string())
            .replace("@SOCKS_PORT@", &self.default_socks_port.to_string());

        fs::create_dir_all(&self.data_dir)
            .and_then(|_| self.replace_contents(&contents))
            .map_err(|source| TorrcError::Install {
                path: self.path.clone(),
                source,
            })?;

        tracing::info!(path = ?self.path, "Installed default torrc");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrc::bridges::{BRIDGE, CLIENT_TRANSPORT_PLUGIN, USE_BRIDGES};

    fn store_in(dir: &Path) -> ConfigurationStore {
        ConfigurationStore::new(
            dir.join("tor").join("torrc"),
            dir.join("tor_data"),
            9051,
            BridgeCatalog::builtin(),
            TransportPaths {
                obfs4proxy: PathBuf::from("/pt/obfs4proxy"),
                snowflake: PathBuf::from("/pt/snowflake"),
                webtunnel: PathBuf::from("/pt/webtunnel"),
            },
        )
    }

    fn seed(store: &ConfigurationStore, text: &str) {
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), text).unwrap();
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        assert!(store.read().is_empty());
        assert_eq!(store.socks_port(), 9051);
    }

    #[test]
    fn identical_write_does_no_io() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let snapshot = ConfigSnapshot::parse("SOCKSPort 9051\n");

        // The file does not exist, so any write attempt would create it.
        assert!(!store.write(&snapshot, &snapshot).unwrap());
        assert!(!store.exists());
    }

    #[test]
    fn changed_write_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        seed(&store, "SOCKSPort 9051\nAvoidDiskWrites 1\n");

        let original = store.read();
        let updated = store.set_port(&original, "9150");
        assert!(store.write(&original, &updated).unwrap());

        let text = fs::read_to_string(store.path()).unwrap();
        assert_eq!(text, "SOCKSPort 9150\nAvoidDiskWrites 1\n");
        assert!(!store.path().with_extension("tmp").exists());
    }

    #[test]
    fn socks_port_reads_first_directive_with_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        seed(&store, "SOCKSPort 127.0.0.1:9150 IsolateDestAddr\nSOCKSPort 9999\n");
        assert_eq!(store.socks_port(), 9150);

        seed(&store, "SOCKSPort 127.0.0.1:99999\n");
        assert_eq!(store.socks_port(), 9051);

        seed(&store, "SOCKSPort auto\n");
        assert_eq!(store.socks_port(), 9051);
    }

    #[test]
    fn set_port_touches_only_socks_directives() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let snapshot = ConfigSnapshot::parse(
            "SOCKSPort 127.0.0.1:9051 IsolateDestAddr\n#SOCKSPort [::1]:9051\nHTTPTunnelPort 9051\nLog notice stdout\n",
        );

        let out = store.set_port(&snapshot, "1080");
        assert_eq!(out.entries()[0].value, "127.0.0.1:1080 IsolateDestAddr");
        assert_eq!(out.entries()[1].value, "[::1]:1080");
        assert_eq!(out.entries()[2], snapshot.entries()[2]);
        assert_eq!(out.entries()[3], snapshot.entries()[3]);
    }

    #[test]
    fn set_port_rejects_invalid_text() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let snapshot = ConfigSnapshot::parse("SOCKSPort 9051\n");

        for bad in ["", "abc", "65536", "0", "123456", "-1"] {
            assert_eq!(store.set_port(&snapshot, bad), snapshot, "input {bad:?}");
        }
    }

    #[test]
    fn summary_reports_port_and_bridge() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let snapshot = store.set_bridge_mode(&ConfigSnapshot::parse("SOCKSPort 9150\n"), BridgeType::Snowflake);

        let summary = store.mode_summary(&snapshot, TorMode::Always);
        assert_eq!(summary.tor_port, 9150);
        assert_eq!(summary.bridge_type, BridgeType::Snowflake);
        assert_eq!(summary.tor_mode, TorMode::Always);
        assert_eq!(snapshot.count(USE_BRIDGES), 1);
        assert_eq!(snapshot.count(CLIENT_TRANSPORT_PLUGIN), 1);
        assert!(snapshot.count(BRIDGE) >= 1);
    }

    #[test]
    fn apply_settings_changes_port_and_bridges_together() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        seed(&store, "SOCKSPort 127.0.0.1:9051\nUseBridges 0\n");

        let update: SettingsUpdate =
            serde_json::from_str(r#"{"torPort": 9150, "bridgeType": "SNOWFLAKE"}"#).unwrap();
        assert!(store.apply_settings(&update).unwrap());

        let summary = store.mode_summary(&store.read(), TorMode::Auto);
        assert_eq!(summary.tor_port, 9150);
        assert_eq!(summary.bridge_type, BridgeType::Snowflake);

        assert!(!store.apply_settings(&SettingsUpdate::default()).unwrap());
    }

    #[test]
    fn ensure_installed_writes_template_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        assert!(store.ensure_installed().unwrap());
        assert!(!store.ensure_installed().unwrap());

        let snapshot = store.read();
        assert_eq!(store.socks_port_of(&snapshot), 9051);
        let data_dir = snapshot.first("DataDirectory").unwrap();
        assert!(data_dir.value.ends_with("tor_data"));
    }

    #[test]
    fn update_is_read_modify_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        seed(&store, "SOCKSPort 9051\n");

        assert!(store.update(|s| store.set_port(s, "9150")).unwrap());
        assert!(!store.update(|s| store.set_port(s, "9150")).unwrap());
        assert_eq!(store.socks_port(), 9150);
    }
}
