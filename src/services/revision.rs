//! Per-school schedule revision registry: an authoritative, monotonically
//! increasing counter in the coordination store, bumped at most once per
//! debounce window however many upstream edits arrive.

use std::sync::Arc;

use tracing::warn;

use crate::config::{BUMP_DEBOUNCE, REVISION_TTL};
use crate::store::{KeyValueStore, keys};

#[derive(Clone)]
pub struct RevisionRegistry {
    kv: Arc<dyn KeyValueStore>,
}

impl RevisionRegistry {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Current revision, or 0 when unset or the store is unreachable. A zero
    /// never matches a client's revision hint, so degraded reads always push
    /// clients toward a full fetch rather than a false 304.
    pub async fn current(&self, school_id: i64) -> i64 {
        match self.kv.get_int(&keys::revision(school_id)).await {
            Ok(value) => value.unwrap_or(0),
            Err(err) => {
                warn!(school_id, error = %err, "revision read failed; reporting 0");
                0
            }
        }
    }

    /// Debounced bump. Returns the new revision when this call won the
    /// debounce window, `None` when a recent bump already covered it. Store
    /// errors are swallowed: a bump must never fail the upstream write that
    /// triggered it.
    pub async fn bump_debounced(&self, school_id: i64) -> Option<i64> {
        let lock_key = keys::bump_lock(school_id);
        match self.kv.add(&lock_key, "1", BUMP_DEBOUNCE).await {
            Ok(true) => {}
            Ok(false) => return None,
            Err(err) => {
                warn!(school_id, error = %err, "bump debounce lock failed; skipping");
                return None;
            }
        }

        let revision_key = keys::revision(school_id);
        match self.kv.incr(&revision_key, REVISION_TTL).await {
            Ok(revision) => {
                // The counter's expiry slides on every bump; it may only lapse
                // on a school that stopped changing for the full TTL.
                if let Err(err) = self.kv.expire(&revision_key, REVISION_TTL).await {
                    warn!(school_id, error = %err, "revision ttl refresh failed");
                }
                Some(revision)
            }
            Err(err) => {
                warn!(school_id, error = %err, "revision bump failed");
                None
            }
        }
    }

    /// Administrative recovery only: force the counter to a known value.
    pub async fn set(&self, school_id: i64, revision: i64) -> bool {
        match self
            .kv
            .set_int(&keys::revision(school_id), revision, REVISION_TTL)
            .await
        {
            Ok(()) => true,
            Err(err) => {
                warn!(school_id, revision, error = %err, "revision set failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryKv;

    #[tokio::test]
    async fn bump_strictly_increases_the_counter() {
        let registry = RevisionRegistry::new(MemoryKv::new());
        assert_eq!(registry.current(3).await, 0);

        let bumped = registry.bump_debounced(3).await;
        assert_eq!(bumped, Some(1));
        assert_eq!(registry.current(3).await, 1);
    }

    #[tokio::test]
    async fn burst_of_bumps_increments_once() {
        let registry = RevisionRegistry::new(MemoryKv::new());
        registry.set(5, 10).await;

        let mut wins = 0;
        for _ in 0..50 {
            if registry.bump_debounced(5).await.is_some() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
        assert_eq!(registry.current(5).await, 11);
    }

    #[tokio::test]
    async fn schools_debounce_independently() {
        let registry = RevisionRegistry::new(MemoryKv::new());
        assert!(registry.bump_debounced(1).await.is_some());
        assert!(registry.bump_debounced(2).await.is_some());
        assert!(registry.bump_debounced(1).await.is_none());
    }

    #[tokio::test]
    async fn set_overrides_for_recovery() {
        let registry = RevisionRegistry::new(MemoryKv::new());
        assert!(registry.set(9, 400).await);
        assert_eq!(registry.current(9).await, 400);
    }

    #[tokio::test]
    async fn bump_refreshes_the_counter_expiry() {
        let kv = MemoryKv::new();
        let registry = RevisionRegistry::new(kv.clone());

        // Counter about to lapse; a bump must reset the full TTL, so a school
        // that keeps changing never watches its revision evaporate.
        kv.set_int("rev:3", 5, std::time::Duration::from_millis(30))
            .await
            .unwrap();
        assert_eq!(registry.bump_debounced(3).await, Some(6));

        tokio::time::sleep(std::time::Duration::from_millis(60)).await;
        assert_eq!(registry.current(3).await, 6);
    }
}
