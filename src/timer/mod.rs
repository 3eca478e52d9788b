//! Timer helpers: randomized waits and failure-driven backoff.


use std::cmp;
use std::time::Duration;

use rand::Rng;

use crate::constants::MAX_FAILURE_SCALE;

/// Returns a duration drawn uniformly from `[base, 2 * base)`.
///
/// Replication and heartbeat ticks must not fire in lockstep across peers,
/// otherwise every follower is probed at the same instant.
pub(crate) fn random_timeout(base: Duration) -> Duration {
    let base_ms = base.as_millis() as u64;
    if base_ms == 0 {
        return base;
    }
    let extra = rand::thread_rng().gen_range(0..base_ms);
    base + Duration::from_millis(extra)
}

/// Exponential backoff: `base * 2^min(failures, MAX_FAILURE_SCALE)`.
///
/// The factor saturates at `2^14`, keeping the worst-case wait bounded.
pub(crate) fn backoff(
    base: Duration,
    failures: u64,
) -> Duration {
    let scale = cmp::min(failures, MAX_FAILURE_SCALE) as u32;
    base * 2u32.pow(scale)
}
