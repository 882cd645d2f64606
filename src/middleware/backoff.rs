use std::time::Duration;

/// Which retry schedule an error maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Provider rate-limit signal: longer fixed waits
    RateLimit,
    /// Timeout, connection error, 5xx: exponential backoff
    Transient,
    /// Not worth retrying
    Fatal,
}

/// Retry policy shared by the outbound provider clients.
///
/// Rate-limit errors wait on a fixed schedule that grows linearly (10s,
/// 20s, 30s); transient errors back off exponentially from a 2s base (2s,
/// 4s, 8s) with sub-second jitter. Both schedules are capped by
/// `max_retries`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    rate_limit_base: Duration,
    transient_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            rate_limit_base: Duration::from_secs(10),
            transient_base: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    #[cfg(test)]
    fn with_bases(max_retries: u32, rate_limit_base: Duration, transient_base: Duration) -> Self {
        Self {
            max_retries,
            rate_limit_base,
            transient_base,
        }
    }

    /// Delay before retry number `attempt` (0-based), or None when the
    /// retry budget is spent or the failure is fatal.
    pub fn delay_for(&self, kind: FailureKind, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }
        match kind {
            FailureKind::RateLimit => Some(self.rate_limit_base * (attempt + 1)),
            FailureKind::Transient => {
                let base = self.transient_base * 2_u32.pow(attempt);
                let jitter = Duration::from_millis(rand::random::<u64>() % 1000);
                Some(base + jitter)
            }
            FailureKind::Fatal => None,
        }
    }

    /// Sleep out the delay for this failure, returning false when the
    /// caller should give up instead.
    pub async fn wait(&self, kind: FailureKind, attempt: u32) -> bool {
        match self.delay_for(kind, attempt) {
            Some(delay) => {
                tokio::time::sleep(delay).await;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_schedule_grows_linearly() {
        let policy = RetryPolicy::new(3);
        assert_eq!(
            policy.delay_for(FailureKind::RateLimit, 0),
            Some(Duration::from_secs(10))
        );
        assert_eq!(
            policy.delay_for(FailureKind::RateLimit, 1),
            Some(Duration::from_secs(20))
        );
        assert_eq!(
            policy.delay_for(FailureKind::RateLimit, 2),
            Some(Duration::from_secs(30))
        );
        assert_eq!(policy.delay_for(FailureKind::RateLimit, 3), None);
    }

    #[test]
    fn test_transient_schedule_doubles() {
        let policy = RetryPolicy::new(3);
        let d0 = policy.delay_for(FailureKind::Transient, 0).unwrap();
        let d1 = policy.delay_for(FailureKind::Transient, 1).unwrap();
        let d2 = policy.delay_for(FailureKind::Transient, 2).unwrap();
        // Jitter adds at most one second on top of the base
        assert!(d0 >= Duration::from_secs(2) && d0 < Duration::from_secs(3));
        assert!(d1 >= Duration::from_secs(4) && d1 < Duration::from_secs(5));
        assert!(d2 >= Duration::from_secs(8) && d2 < Duration::from_secs(9));
    }

    #[test]
    fn test_fatal_never_retries() {
        let policy = RetryPolicy::new(3);
        assert_eq!(policy.delay_for(FailureKind::Fatal, 0), None);
    }

    #[tokio::test]
    async fn test_wait_respects_budget() {
        let policy = RetryPolicy::with_bases(
            1,
            Duration::from_millis(1),
            Duration::from_millis(1),
        );
        assert!(policy.wait(FailureKind::RateLimit, 0).await);
        assert!(!policy.wait(FailureKind::RateLimit, 1).await);
    }
}
