//! Exponential backoff schedule.
//!
//! `delay` is the pure, documented schedule. `jittered` spreads it by
//! `± jitter_fraction` and is what the retry executor actually sleeps on.

use std::time::Duration;

use rand::Rng;

use super::retry::RetryConfig;

/// Delay before retry number `attempt + 1`, where `attempt` is the number of
/// retries already performed (zero-based).
///
/// `min(initial_delay × multiplier^attempt, max_delay)`; never negative,
/// saturating to `max_delay` on overflow.
pub fn delay(attempt: u32, config: &RetryConfig) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let factor = config.multiplier.max(1.0).powi(exponent);
    let nanos = config.initial_delay.as_nanos() as f64 * factor;
    let cap = config.max_delay;
    if !nanos.is_finite() || nanos >= cap.as_nanos() as f64 {
        return cap;
    }
    Duration::from_nanos(nanos.max(0.0).round() as u64)
}

/// [`delay`] with `± jitter_fraction × delay` of uniform random jitter.
pub fn jittered(attempt: u32, config: &RetryConfig) -> Duration {
    let base = delay(attempt, config);
    let fraction = config.jitter_fraction.clamp(0.0, 1.0);
    if fraction == 0.0 || base.is_zero() {
        return base;
    }
    let spread = base.as_nanos() as f64 * fraction;
    let offset = rand::thread_rng().gen_range(-spread..=spread);
    let nanos = (base.as_nanos() as f64 + offset).max(0.0);
    Duration::from_nanos(nanos.round() as u64)
}
