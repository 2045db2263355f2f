//! Quadratic backoff.

use std::time::Duration;

/// Delay before the `attempt`-th partial restart step: `unit × attempt²`.
/// Non-positive attempts yield zero.
pub fn quadratic_delay(attempt: i64, unit: Duration) -> Duration {
    if attempt <= 0 {
        return Duration::ZERO;
    }

    let factor = u32::try_from(attempt.saturating_mul(attempt)).unwrap_or(u32::MAX);
    unit.saturating_mul(factor)
}
