use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide counter, starting at 1 so that 0 never names a request.
static REQUEST_ID_COUNTER: Lazy<AtomicU64> = Lazy::new(|| AtomicU64::new(1));

/// Returns a request id unique for the lifetime of the process.
#[inline]
pub fn next_request_id() -> u64 {
    REQUEST_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}
