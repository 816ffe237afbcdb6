use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the current timestamp in microseconds since the UNIX epoch.
///
/// Falls back to `0` if the system clock reports a time before the epoch.
///
/// # Example:
/// ```rust
/// use camrelay::utils::now;
/// let timestamp = now();
/// assert!(timestamp > 0);
/// ```
pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Whole seconds since the UNIX epoch, as used in recording listings.
pub fn now_secs() -> i64 {
    (now() / 1_000_000) as i64
}
