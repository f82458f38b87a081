//! Jittered backoff. The shape (`base_delay * jitter_factor`) follows
//! `everruns-durable`'s `RetryPolicy::delay_for_attempt`; the jitter range
//! here is multiplicative (`[0.5, 1.5)`) rather than additive, per this
//! system's own spec.

use chrono::Duration;
use dex_types::RetryBehavior;
use rand::Rng;

/// Backoff duration before retrying `attempt` (0-indexed: the attempt that
/// just failed), including multiplicative jitter.
pub fn jittered_delay(behavior: &RetryBehavior, attempt: u32) -> Duration {
    let base_ms = behavior.base_delay_ms(attempt) as f64;
    let jitter: f64 = rand::rng().random_range(0.5..1.5);
    Duration::milliseconds((base_ms * jitter).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn jittered_delay_stays_within_half_to_one_and_a_half_times_base() {
        let behavior = RetryBehavior {
            max_attempts: 5,
            initial_backoff_ms: 100,
            base: 2,
        };
        for attempt in 0..4 {
            let base = behavior.base_delay_ms(attempt) as i64;
            let delay = jittered_delay(&behavior, attempt).num_milliseconds();
            assert!(delay >= base / 2, "delay {delay} below half of base {base}");
            assert!(delay <= (base * 3) / 2 + 1, "delay {delay} above 1.5x base {base}");
        }
    }
}
