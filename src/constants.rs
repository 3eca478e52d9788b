use std::time::Duration;

/// Exponent cap for failure-driven retry delays. The backoff factor
/// saturates at `2^MAX_FAILURE_SCALE`.
pub(crate) const MAX_FAILURE_SCALE: u64 = 14;

/// Base delay applied after the first consecutive failure.
pub(crate) const FAILURE_WAIT: Duration = Duration::from_millis(10);
