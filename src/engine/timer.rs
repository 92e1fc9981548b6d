//! Engine clock
//!
//! Waits, backoff and deadlines all go through a `Timer`, so a paused tokio
//! clock (`#[tokio::test(start_paused = true)]`) drives whole executions in
//! virtual time.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

/// Upper bound on any span the engine adds to an instant
pub const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + duration`, clamped to `FAR_FUTURE` so huge durations never overflow
pub fn instant_after(now: Instant, duration: Duration) -> Instant {
    now.checked_add(duration.min(FAR_FUTURE)).unwrap_or(now)
}

#[async_trait]
pub trait Timer: Send + Sync {
    fn now(&self) -> Instant;

    /// Suspend the calling execution until `deadline` without blocking others
    async fn sleep_until(&self, deadline: Instant);
}

/// Timer backed by the tokio runtime clock
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimer;

#[async_trait]
impl Timer for TokioTimer {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep_until(&self, deadline: Instant) {
        tokio::time::sleep_until(deadline).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sleep_until_advances_virtual_time() {
        let timer = TokioTimer;
        let start = timer.now();
        timer.sleep_until(start + Duration::from_secs(900)).await;
        assert_eq!(timer.now() - start, Duration::from_secs(900));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_until_past_returns_immediately() {
        let timer = TokioTimer;
        let start = timer.now();
        timer.sleep_until(start).await;
        assert_eq!(timer.now(), start);
    }

    #[test]
    fn test_instant_after_clamps() {
        let now = Instant::now();
        assert_eq!(instant_after(now, Duration::from_secs(5)), now + Duration::from_secs(5));
        assert_eq!(instant_after(now, Duration::MAX), now + FAR_FUTURE);
        assert_eq!(
            instant_after(now, Duration::from_secs(u64::MAX)),
            now + FAR_FUTURE
        );
    }
}
