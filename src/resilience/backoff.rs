//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

/// Delay to wait before retry number `attempt` (1-based).
///
/// The delay doubles from `base` on each retry, is capped at `max`, then
/// gets up to 10% of random jitter on top.
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let factor = 2u32.saturating_pow(attempt - 1);
    let capped = base.saturating_mul(factor).min(max);

    let jitter_range = capped.as_millis() as u64 / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    capped + Duration::from_millis(jitter)
}
