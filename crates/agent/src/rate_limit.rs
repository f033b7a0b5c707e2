//! Sliding-window request limiter shared by every run of one agent.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Bounds model consultations to `max_requests` per rolling `window`.
///
/// One limiter is owned (behind an `Arc`) by an agent; all of that agent's
/// concurrent runs, and their summarization calls, draw from it.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    grants: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window,
            grants: Mutex::new(VecDeque::with_capacity(max_requests)),
        }
    }

    /// A limiter of `max_requests` per minute.
    pub fn per_minute(max_requests: u32) -> Self {
        Self::new(max_requests as usize, Duration::from_secs(60))
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    /// Take a slot if one is free now. Otherwise returns how long until
    /// the oldest grant leaves the window.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let now = Instant::now();
        let mut grants = self.grants.lock().unwrap_or_else(|e| e.into_inner());

        while grants
            .front()
            .is_some_and(|t| now.duration_since(*t) >= self.window)
        {
            grants.pop_front();
        }

        if grants.len() < self.max_requests {
            grants.push_back(now);
            return Ok(());
        }

        let oldest = grants.front().copied().unwrap_or(now);
        Err((oldest + self.window).saturating_duration_since(now))
    }

    /// Wait until a slot is free and take it. Never fails; cancel by
    /// dropping the future.
    pub async fn acquire(&self) {
        loop {
            match self.try_acquire() {
                Ok(()) => return,
                Err(wait) => {
                    debug!(wait_ms = wait.as_millis() as u64, "Rate limit reached, waiting");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Grants currently inside the window.
    pub fn in_flight(&self) -> usize {
        let now = Instant::now();
        let grants = self.grants.lock().unwrap_or_else(|e| e.into_inner());
        grants
            .iter()
            .filter(|t| now.duration_since(**t) < self.window)
            .count()
    }
}
