// Middleware for resilient service calls
//
// Provides retry scheduling and provider rate limiting

pub mod backoff;
pub mod rate_limiter;

// Re-export commonly used types
pub use backoff::{FailureKind, RetryPolicy};
pub use rate_limiter::{RateLimiter, RateLimiterConfig};
