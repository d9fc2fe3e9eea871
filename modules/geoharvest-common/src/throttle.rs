use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// Process-wide request budget: at most `max_requests` calls start within any
/// `per` window. Share one instance (behind `Arc`) across all workers so the
/// provider's aggregate quota holds regardless of concurrency.
///
/// Each `acquire` reserves the earliest slot that keeps the sliding window
/// under quota, then sleeps until that slot.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    per: Duration,
    /// Start times of the most recent `max_requests` reservations, oldest first.
    window: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, per: Duration) -> Self {
        let max_requests = max_requests.max(1) as usize;
        Self {
            max_requests,
            per,
            window: Mutex::new(VecDeque::new()),
        }
    }

    /// Unthrottled limiter for tests and local providers.
    pub fn unlimited() -> Self {
        Self::new(u32::MAX, Duration::ZERO)
    }

    pub async fn acquire(&self) {
        let slot = self.reserve(Instant::now());
        let wait = slot.saturating_duration_since(Instant::now());
        if !wait.is_zero() {
            debug!(wait_ms = wait.as_millis() as u64, "Rate limit wait");
            tokio::time::sleep_until(slot).await;
        }
    }

    fn reserve(&self, now: Instant) -> Instant {
        if self.per.is_zero() {
            return now;
        }
        let mut window = self.window.lock().unwrap_or_else(|p| p.into_inner());
        let slot = if window.len() < self.max_requests {
            now
        } else {
            let oldest = window.pop_front().unwrap_or(now);
            (oldest + self.per).max(now)
        };
        window.push_back(slot);
        slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn burst_up_to_quota_is_immediate() {
        let limiter = RateLimiter::new(3, Duration::from_secs(1));
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn excess_requests_wait_for_window() {
        let limiter = RateLimiter::new(2, Duration::from_secs(1));
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        // slots at 0, 0, 1, 1, 2
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn budget_is_shared_across_tasks() {
        let limiter = Arc::new(RateLimiter::new(1, Duration::from_secs(1)));
        let start = Instant::now();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move {
                    limiter.acquire().await;
                    Instant::now()
                })
            })
            .collect();

        let mut finished = Vec::new();
        for handle in handles {
            finished.push(handle.await.unwrap() - start);
        }
        finished.sort();
        assert_eq!(finished[0], Duration::ZERO);
        assert!(finished[3] >= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn unlimited_never_waits() {
        let limiter = RateLimiter::unlimited();
        for _ in 0..100 {
            limiter.acquire().await;
        }
    }
}
