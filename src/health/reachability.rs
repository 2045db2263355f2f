//! Reachability cache.
//!
//! # Responsibilities
//! - Remember per-destination reachability verdicts
//! - Expire verdicts with polarity-dependent TTLs
//! - Answer "was anything unreachable recently?" for idle shutdown
//!
//! # Design Decisions
//! - Reachable verdicts live longer than unreachable ones, so a blocked
//!   destination is re-probed sooner
//! - Concurrent lookups of the same key may both probe; the last write wins

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::config::ReachabilityConfig;
use crate::health::probe::{Prober, Route};
use crate::observability::metrics;

#[derive(Debug, Clone, Copy)]
struct ReachabilityRecord {
    checked_at: Instant,
    reachable: bool,
}

pub struct ReachabilityCache {
    prober: Arc<dyn Prober>,
    records: DashMap<(String, u16), ReachabilityRecord>,
    reachable_ttl: Duration,
    unreachable_ttl: Duration,
}

impl ReachabilityCache {
    pub fn new(prober: Arc<dyn Prober>, reachable_ttl: Duration, unreachable_ttl: Duration) -> Self {
        Self {
            prober,
            records: DashMap::new(),
            reachable_ttl,
            unreachable_ttl,
        }
    }

    pub fn from_config(prober: Arc<dyn Prober>, config: &ReachabilityConfig) -> Self {
        Self::new(
            prober,
            Duration::from_secs(config.reachable_ttl_secs),
            Duration::from_secs(config.unreachable_ttl_secs),
        )
    }

    pub fn prober(&self) -> &Arc<dyn Prober> {
        &self.prober
    }

    /// Probe `host:port` over `route`, reusing a fresh verdict.
    pub async fn is_reachable(&self, host: &str, port: u16, route: Route, timeout: Duration) -> bool {
        let prober = self.prober.clone();
        self.lookup(host, port, async move {
            let reachable = prober.probe(host, port, route, timeout).await;
            metrics::record_probe(route.is_proxied(), reachable);
            reachable
        })
        .await
    }

    /// Return the cached verdict for `host:port` if still fresh, otherwise
    /// await `resolve` and record its result.
    pub async fn lookup<F>(&self, host: &str, port: u16, resolve: F) -> bool
    where
        F: Future<Output = bool>,
    {
        if let Some(reachable) = self.fresh(host, port) {
            metrics::record_cache_hit();
            return reachable;
        }

        let reachable = resolve.await;
        self.records.insert(
            (host.to_owned(), port),
            ReachabilityRecord {
                checked_at: Instant::now(),
                reachable,
            },
        );
        tracing::debug!(host, port, reachable, "Recorded reachability");

        reachable
    }

    fn fresh(&self, host: &str, port: u16) -> Option<bool> {
        let record = *self.records.get(&(host.to_owned(), port))?;
        let ttl = if record.reachable {
            self.reachable_ttl
        } else {
            self.unreachable_ttl
        };
        (record.checked_at.elapsed() <= ttl).then_some(record.reachable)
    }

    /// Whether any destination was found unreachable within `window`.
    pub fn has_fresh_unreachable(&self, window: Duration) -> bool {
        self.records
            .iter()
            .any(|r| !r.reachable && r.checked_at.elapsed() < window)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
