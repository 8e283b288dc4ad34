/// Preset retry policies for the distribution paths
use crate::retry::RetryPolicy;
use std::time::Duration;

/// Origin → edge push delivery
///
/// - 3 attempts, 100ms doubling backoff, capped at 5s
/// - exhaustion arms pull-fallback, so the budget stays small
pub fn edge_push_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(100),
        backoff_multiplier: 2.0,
        max_delay: Duration::from_secs(5),
    }
}

/// Edge → origin pull
///
/// - 5 attempts, the pull is the last line of consistency
/// - 50ms base, capped at 2s so a reader is not parked for long
pub fn origin_pull_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 5,
        base_delay: Duration::from_millis(50),
        backoff_multiplier: 2.0,
        max_delay: Duration::from_secs(2),
    }
}
