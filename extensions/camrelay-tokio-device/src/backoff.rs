use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;

/// Delay before the first reconnect attempt.
pub const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Ceiling for the doubling reconnect delay.
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectBackoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            initial: INITIAL_RECONNECT_DELAY,
            max: MAX_RECONNECT_DELAY,
        }
    }
}

impl ReconnectBackoff {
    /// Delay before attempt `attempt` (1-based): `initial * 2^(attempt - 1)`,
    /// capped at `max`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);

        self.initial
            .checked_mul(1u32 << exponent)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

/// Runs `attempt` until it reports success, sleeping with exponential
/// backoff before each try.
///
/// Returns `true` once an attempt succeeds, or `false` as soon as `stop`
/// turns `true` (or its sender goes away), including mid-sleep.
pub async fn retry_with_backoff<F, Fut>(
    backoff: ReconnectBackoff,
    mut stop: watch::Receiver<bool>,
    mut attempt: F,
) -> bool
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = bool>,
{
    let mut count: u32 = 0;

    loop {
        if *stop.borrow() {
            return false;
        }

        count = count.saturating_add(1);
        let delay = backoff.delay_for_attempt(count);
        tracing::info!(
            attempt = count,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect attempt"
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stop.wait_for(|stopped| *stopped) => {
                tracing::debug!(attempt = count, "reconnect loop stopped");
                return false;
            }
        }

        if attempt(count).await {
            tracing::info!(attempt = count, "reconnected");
            return true;
        }

        tracing::warn!(attempt = count, "reconnect attempt failed");
    }
}
