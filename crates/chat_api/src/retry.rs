use std::time::Duration;

use crate::error::ErrorKind;

/// Maximum retry attempts after an initial request attempt.
pub const MAX_RETRIES: u32 = 3;
/// Base delay before the first retry.
pub const BASE_DELAY_MS: u64 = 1000;

/// Transport retry decision, driven by the typed error kind rather than by
/// matching on error text.
pub fn is_retryable(kind: ErrorKind) -> bool {
    kind.is_retryable()
}

/// Compute exponential backoff delay for a retry attempt.
pub fn retry_delay_ms(attempt: u32) -> Duration {
    let exponent = attempt.min(30);
    Duration::from_millis(BASE_DELAY_MS * 2u64.saturating_pow(exponent))
}
