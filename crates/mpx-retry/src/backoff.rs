// SPDX-License-Identifier: MIT OR Apache-2.0
//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

/// First-retry delay.
pub const BASE_DELAY: Duration = Duration::from_secs(1);

/// Backoff ceiling before jitter.
pub const MAX_DELAY: Duration = Duration::from_secs(30);

/// The deterministic part of the delay for retry number `retry_count`.
pub fn base_backoff(retry_count: u32) -> Duration {
    let factor = 1u64 << retry_count.min(30);
    BASE_DELAY.saturating_mul(factor as u32).min(MAX_DELAY)
}

/// Inclusive bounds of the jittered delay for `retry_count`.
pub fn backoff_bounds(retry_count: u32) -> (Duration, Duration) {
    let base = base_backoff(retry_count);
    (base, base + base / 2)
}

/// The delay to sleep before retry number `retry_count`:
/// `min(1s · 2^n, 30s) + U[0, delay/2]`.
pub fn backoff_delay(retry_count: u32) -> Duration {
    let base = base_backoff(retry_count);
    let jitter_cap = base.as_millis() as u64 / 2;
    let jitter = if jitter_cap == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=jitter_cap)
    };
    base + Duration::from_millis(jitter)
}
