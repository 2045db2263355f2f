//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, ports valid)
//! - Enforce the reachable-TTL > unreachable-TTL ordering
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: KeeperConfig → Result<(), Vec<ValidationError>>

use std::net::SocketAddr;
use crate::config::schema::KeeperConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self { field, message: message.into() }
    }
}

/// Check a parsed configuration for semantic errors.
pub fn validate_config(config: &KeeperConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.proxy.default_socks_port == 0 {
        errors.push(ValidationError::new("proxy.default_socks_port", "must be between 1 and 65535"));
    }

    let reach = &config.reachability;
    if reach.unreachable_ttl_secs == 0 {
        errors.push(ValidationError::new("reachability.unreachable_ttl_secs", "must be > 0"));
    }
    if reach.reachable_ttl_secs <= reach.unreachable_ttl_secs {
        errors.push(ValidationError::new(
            "reachability.reachable_ttl_secs",
            "must be greater than unreachable_ttl_secs",
        ));
    }
    if reach.direct_timeout_ms == 0 || reach.tunnel_timeout_ms == 0 {
        errors.push(ValidationError::new("reachability", "probe timeouts must be > 0"));
    }

    let checker = &config.checker;
    if checker.targets.is_empty() {
        errors.push(ValidationError::new("checker.targets", "at least one target is required"));
    }
    if checker.attempt_timeout_secs == 0 || checker.loop_timeout_secs == 0 {
        errors.push(ValidationError::new("checker", "timeouts must be > 0"));
    }
    if checker.attempt_timeout_secs > checker.loop_timeout_secs {
        errors.push(ValidationError::new(
            "checker.attempt_timeout_secs",
            "must not exceed loop_timeout_secs",
        ));
    }

    let restarter = &config.restarter;
    if restarter.partial_unit_secs == 0 || restarter.full_tick_ms == 0 {
        errors.push(ValidationError::new("restarter", "tick lengths must be > 0"));
    }
    if restarter.full_reload_tick < 0 || restarter.full_reload_tick >= restarter.full_ceiling {
        errors.push(ValidationError::new(
            "restarter.full_reload_tick",
            "must be within [0, full_ceiling)",
        ));
    }

    if config.observer.poll_interval_secs == 0 {
        errors.push(ValidationError::new("observer.poll_interval_secs", "must be > 0"));
    }

    if config.admin.enabled && config.admin.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new("admin.bind_address", "not a socket address"));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new("observability.metrics_address", "not a socket address"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
