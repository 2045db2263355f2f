//! Persisted keeper state.
//!
//! Small JSON document next to the torrc holding values that must survive
//! a restart of the keeper itself: the user's mode choice and the last
//! network type seen by the observer.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::net::NetworkType;
use crate::torrc::TorMode;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct KeeperState {
    pub tor_mode: Option<TorMode>,
    pub last_network: NetworkType,
}

/// Shared, file-backed [`KeeperState`].
#[derive(Debug)]
pub struct StateStore {
    path: Option<PathBuf>,
    default_mode: TorMode,
    current: ArcSwap<KeeperState>,
}

impl StateStore {
    /// Store without a backing file.
    pub fn in_memory(default_mode: TorMode) -> Self {
        Self {
            path: None,
            default_mode,
            current: ArcSwap::from_pointee(KeeperState::default()),
        }
    }

    /// Load from `path`. A missing or corrupt file starts from defaults.
    pub fn load(path: &Path, default_mode: TorMode) -> Self {
        let state = match fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                tracing::warn!(path = ?path, error = %e, "Discarding unreadable keeper state");
                KeeperState::default()
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => KeeperState::default(),
            Err(e) => {
                tracing::warn!(path = ?path, error = %e, "Unable to read keeper state");
                KeeperState::default()
            }
        };

        tracing::debug!(path = ?path, ?state, "Loaded keeper state");
        Self {
            path: Some(path.to_path_buf()),
            default_mode,
            current: ArcSwap::from_pointee(state),
        }
    }

    pub fn snapshot(&self) -> Arc<KeeperState> {
        self.current.load_full()
    }

    pub fn tor_mode(&self) -> TorMode {
        self.current.load().tor_mode.unwrap_or(self.default_mode)
    }

    pub fn set_tor_mode(&self, mode: TorMode) -> io::Result<()> {
        self.modify(|state| state.tor_mode = Some(mode))
    }

    pub fn last_network(&self) -> NetworkType {
        self.current.load().last_network
    }

    pub fn set_last_network(&self, network: NetworkType) -> io::Result<()> {
        self.modify(|state| state.last_network = network)
    }

    fn modify<F>(&self, f: F) -> io::Result<()>
    where
        F: Fn(&mut KeeperState),
    {
        let previous = self.current.rcu(|current| {
            let mut next = KeeperState::clone(current);
            f(&mut next);
            next
        });
        if *previous == **self.current.load() {
            return Ok(());
        }
        self.save()
    }

    fn save(&self) -> io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let bytes = serde_json::to_vec_pretty(&*self.current.load_full())?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path)
    }
}
