//! Retry utilities for transient stage failures.
//!
//! Provides classification of retryable errors and exponential backoff.

use crate::error::StageError;
use std::time::Duration;

/// Determine whether a stage error is worth retrying.
///
/// Retryable errors: timeouts and execution failures (a crashed or wedged
/// process). Non-retryable: missing binaries/models and bad input images.
pub fn is_retryable(error: &StageError) -> bool {
    matches!(
        error,
        StageError::Timeout { .. } | StageError::Execution { .. }
    )
}

/// Calculate exponential backoff duration for a given attempt.
///
/// Uses `base_delay * 2^attempt` with a cap at 30 seconds.
pub fn backoff_duration(attempt: u32, base_delay_ms: u64) -> Duration {
    let delay = base_delay_ms.saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_millis(delay.min(30_000))
}
