use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Rate limiter configuration
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Maximum number of calls allowed inside the rolling window
    pub max_requests: u32,
    /// Length of the rolling window
    pub window: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_requests: 5,
            window: Duration::from_secs(60),
        }
    }
}

/// Process-wide sliding-window rate limiter for the generation provider.
///
/// Keeps the timestamps of recent dispatches in a deque under a single
/// mutex. `acquire` waits until the oldest timestamp ages out of the
/// window, so no more than `max_requests` calls are dispatched within any
/// rolling window, across all tasks sharing the limiter.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Mutex<VecDeque<Instant>>>,
    config: RateLimiterConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::new())),
            config,
        }
    }

    /// Wait for a slot, then claim it.
    ///
    /// The slot is claimed at the moment of return; the caller should make
    /// the provider call immediately afterwards.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut calls = self.inner.lock();
                let now = Instant::now();

                // Expire timestamps that fell out of the window
                while let Some(front) = calls.front() {
                    if now.duration_since(*front) >= self.config.window {
                        calls.pop_front();
                    } else {
                        break;
                    }
                }

                if (calls.len() as u32) < self.config.max_requests {
                    calls.push_back(now);
                    None
                } else {
                    // Oldest call determines when the next slot frees up
                    calls
                        .front()
                        .map(|front| self.config.window - now.duration_since(*front))
                }
            };

            match wait {
                None => return,
                Some(delay) => tokio::time::sleep(delay).await,
            }
        }
    }

    /// Claim a slot only if one is free right now.
    pub fn try_acquire(&self) -> bool {
        let mut calls = self.inner.lock();
        let now = Instant::now();

        while let Some(front) = calls.front() {
            if now.duration_since(*front) >= self.config.window {
                calls.pop_front();
            } else {
                break;
            }
        }

        if (calls.len() as u32) < self.config.max_requests {
            calls.push_back(now);
            true
        } else {
            false
        }
    }

    /// Number of calls currently counted against the window.
    pub fn in_flight(&self) -> usize {
        let mut calls = self.inner.lock();
        let now = Instant::now();
        while let Some(front) = calls.front() {
            if now.duration_since(*front) >= self.config.window {
                calls.pop_front();
            } else {
                break;
            }
        }
        calls.len()
    }
}
