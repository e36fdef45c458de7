//! Fixed-window request limiter keyed by (token, device). Counters live in
//! the coordination store so every instance enforces the same budget; a
//! store outage fails open rather than taking the displays down.

use std::sync::Arc;

use tracing::warn;

use crate::config::AppConfig;
use crate::error::ServiceError;
use crate::store::{KeyValueStore, keys};

#[derive(Clone)]
pub struct RateLimiter {
    kv: Arc<dyn KeyValueStore>,
    window_seconds: u64,
    max_requests: u64,
}

impl RateLimiter {
    pub fn new(kv: Arc<dyn KeyValueStore>, config: &AppConfig) -> Self {
        Self {
            kv,
            window_seconds: config.rate_limit_window_seconds.max(1),
            max_requests: config.rate_limit_max_requests.max(1),
        }
    }

    /// Count one request against the window, rejecting beyond the budget.
    pub async fn check(&self, token: &str, device_id: &str) -> Result<(), ServiceError> {
        let key = keys::rate_limit(token, device_id);
        let window = std::time::Duration::from_secs(self.window_seconds);
        match self.kv.incr(&key, window).await {
            Ok(count) if count as u64 > self.max_requests => Err(ServiceError::RateLimited {
                retry_after_seconds: self.window_seconds,
            }),
            Ok(_) => Ok(()),
            Err(err) => {
                warn!(error = %err, "rate limit counter unavailable; allowing request");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryKv;

    fn limiter(kv: Arc<MemoryKv>) -> RateLimiter {
        RateLimiter {
            kv,
            window_seconds: 10,
            max_requests: 3,
        }
    }

    #[tokio::test]
    async fn bursts_within_budget_pass_then_reject() {
        let limiter = limiter(MemoryKv::new());
        for _ in 0..3 {
            assert!(limiter.check("tok", "dev").await.is_ok());
        }
        let rejected = limiter.check("tok", "dev").await;
        match rejected {
            Err(ServiceError::RateLimited {
                retry_after_seconds,
            }) => assert_eq!(retry_after_seconds, 10),
            other => panic!("expected rate limit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn budgets_are_per_token_and_device() {
        let limiter = limiter(MemoryKv::new());
        for _ in 0..3 {
            limiter.check("tok", "dev-a").await.unwrap();
        }
        assert!(limiter.check("tok", "dev-b").await.is_ok());
        assert!(limiter.check("other", "dev-a").await.is_ok());
    }
}
