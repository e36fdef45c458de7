//! Snapshot cache and build coordinator: serve from cache, build exactly once
//! per school at a time, fall back to a stale document when the current one
//! is missing and the build lock is contended.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use tracing::{debug, info, warn};

use crate::config::{AppConfig, BUILD_LOCK_TTL};
use crate::dto::snapshot::{SnapshotDoc, etag_for};
use crate::error::ServiceError;
use crate::services::builder::SnapshotBuilder;
use crate::services::revision::RevisionRegistry;
use crate::store::{KeyValueStore, keys};

/// How long a contended reader waits for the lock holder's write to land
/// before giving up, and the polling step while waiting.
const LOCK_WAIT: Duration = Duration::from_millis(600);
const LOCK_WAIT_STEP: Duration = Duration::from_millis(50);

const STALE_WARNING: &str = "يتم عرض نسخة سابقة من البيانات حتى اكتمال التحديث";

/// A snapshot ready to serve: canonical bytes plus the derived strong ETag.
#[derive(Debug, Clone)]
pub struct ServedSnapshot {
    pub bytes: Vec<u8>,
    pub etag: String,
    pub revision: i64,
    pub is_stale: bool,
}

impl ServedSnapshot {
    fn fresh(bytes: Vec<u8>, revision: i64) -> Self {
        let etag = etag_for(&bytes);
        Self {
            bytes,
            etag,
            revision,
            is_stale: false,
        }
    }
}

#[derive(Clone)]
pub struct SnapshotCoordinator {
    kv: Arc<dyn KeyValueStore>,
    builder: SnapshotBuilder,
    registry: RevisionRegistry,
    config: Arc<AppConfig>,
}

impl SnapshotCoordinator {
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        builder: SnapshotBuilder,
        registry: RevisionRegistry,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            kv,
            builder,
            registry,
            config,
        }
    }

    /// Serve the snapshot for `school_id` at the registry's current revision.
    /// `force_rebuild` skips the cache-hit fast path (debug `nocache`).
    pub async fn serve(
        &self,
        school_id: i64,
        force_rebuild: bool,
    ) -> Result<ServedSnapshot, ServiceError> {
        let revision = self.registry.current(school_id).await;
        let cache_key = keys::snapshot(school_id, revision);

        if !force_rebuild
            && let Some(bytes) = self.cache_read(&cache_key).await
        {
            return Ok(ServedSnapshot::fresh(bytes, revision));
        }

        let lock_key = keys::build_lock(school_id);
        match self.kv.add(&lock_key, "1", BUILD_LOCK_TTL).await {
            Ok(true) => {
                let _guard = LockGuard {
                    kv: self.kv.clone(),
                    key: lock_key,
                };
                self.build_and_cache(school_id, revision, &cache_key).await
            }
            Ok(false) => self.serve_contended(school_id, revision, &cache_key).await,
            Err(err) => {
                // No coordination available at all: build inline rather than
                // blank every screen of the school.
                warn!(school_id, error = %err, "build lock unavailable; building without it");
                self.build_and_cache(school_id, revision, &cache_key).await
            }
        }
    }

    async fn build_and_cache(
        &self,
        school_id: i64,
        revision: i64,
        cache_key: &str,
    ) -> Result<ServedSnapshot, ServiceError> {
        let now = self.local_now();
        let doc = self.builder.build(school_id, revision, now).await?;
        let bytes = doc
            .canonical_bytes()
            .map_err(|err| ServiceError::InvalidInput(err.to_string()))?;

        if let Err(err) = self
            .kv
            .set_bytes(
                cache_key,
                bytes.clone(),
                Some(self.config.snapshot_cache_ttl_duration()),
            )
            .await
        {
            warn!(school_id, revision, error = %err, "snapshot cache write failed");
        }
        info!(school_id, revision, size = bytes.len(), "snapshot built");
        Ok(ServedSnapshot::fresh(bytes, revision))
    }

    /// Somebody else is building. Prefer any stale revision over waiting;
    /// wait briefly only when the school has no cached document at all.
    async fn serve_contended(
        &self,
        school_id: i64,
        revision: i64,
        cache_key: &str,
    ) -> Result<ServedSnapshot, ServiceError> {
        if let Some(served) = self.stale_fallback(school_id, revision).await {
            return Ok(served);
        }

        let deadline = tokio::time::Instant::now() + LOCK_WAIT;
        while tokio::time::Instant::now() < deadline {
            tokio::time::sleep(LOCK_WAIT_STEP).await;
            if let Some(bytes) = self.cache_read(cache_key).await {
                return Ok(ServedSnapshot::fresh(bytes, revision));
            }
        }

        warn!(school_id, revision, "no cache, no stale copy, lock contended");
        Err(ServiceError::BuildUnavailable)
    }

    /// Newest cached document for the school across all revisions, flagged
    /// stale. Never rebuilds.
    async fn stale_fallback(&self, school_id: i64, revision: i64) -> Option<ServedSnapshot> {
        let prefix = keys::snapshot_prefix(school_id);
        let candidates = match self.kv.scan_prefix(&prefix).await {
            Ok(keys) => keys,
            Err(err) => {
                warn!(school_id, error = %err, "stale scan failed");
                return None;
            }
        };

        let best_key = candidates
            .into_iter()
            .filter_map(|key| keys::revision_from_snapshot_key(&key).map(|rev| (rev, key)))
            .filter(|(rev, _)| *rev != revision)
            .max_by_key(|(rev, _)| *rev)?;

        let bytes = self.cache_read(&best_key.1).await?;
        let mut doc: SnapshotDoc = serde_json::from_slice(&bytes).ok()?;
        doc.mark_stale(STALE_WARNING);
        let bytes = doc.canonical_bytes().ok()?;
        let etag = etag_for(&bytes);

        debug!(
            school_id,
            wanted = revision,
            served = best_key.0,
            "serving stale snapshot"
        );
        Some(ServedSnapshot {
            bytes,
            etag,
            revision: best_key.0,
            is_stale: true,
        })
    }

    async fn cache_read(&self, key: &str) -> Option<Vec<u8>> {
        match self.kv.get_bytes(key).await {
            Ok(hit) => hit,
            Err(err) => {
                warn!(key, error = %err, "snapshot cache read failed");
                None
            }
        }
    }

    fn local_now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.config.utc_offset)
    }
}

/// Releases the build lock on every exit path, including panics. The delete
/// is spawned because `Drop` cannot await; lock TTL covers the residual race.
struct LockGuard {
    kv: Arc<dyn KeyValueStore>,
    key: String,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let kv = self.kv.clone();
        let key = std::mem::take(&mut self.key);
        tokio::spawn(async move {
            if let Err(err) = kv.delete(&key).await {
                warn!(key = %key, error = %err, "build lock release failed; TTL will expire it");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{MemoryDirectory, MemoryKv};
    use crate::store::models::{BlockKind, DayBlockRow};
    use chrono::NaiveTime;

    fn coordinator_with_schedule() -> (SnapshotCoordinator, Arc<MemoryKv>, RevisionRegistry) {
        let kv = MemoryKv::new();
        let directory = MemoryDirectory::new();
        // Schedule for every weekday so tests are date-independent.
        for weekday in 1..=7 {
            directory.insert_day_blocks(
                40,
                weekday,
                vec![DayBlockRow {
                    kind: BlockKind::Period,
                    index: Some(1),
                    label: None,
                    subject: Some("قرآن".into()),
                    class_name: Some("أ/1".into()),
                    teacher: Some("المعلم".into()),
                    starts_at: NaiveTime::from_hms_opt(0, 0, 1).unwrap(),
                    ends_at: NaiveTime::from_hms_opt(23, 59, 59).unwrap(),
                }],
            );
        }
        let config = AppConfig::for_tests();
        let registry = RevisionRegistry::new(kv.clone());
        let builder = SnapshotBuilder::new(directory, config.clone());
        (
            SnapshotCoordinator::new(kv.clone(), builder, registry.clone(), config),
            kv,
            registry,
        )
    }

    #[tokio::test]
    async fn cold_start_builds_then_serves_identical_bytes_from_cache() {
        let (coordinator, kv, registry) = coordinator_with_schedule();
        registry.set(40, 7).await;

        let first = coordinator.serve(40, false).await.unwrap();
        assert_eq!(first.revision, 7);
        assert!(!first.is_stale);
        assert!(kv.get_bytes("snap:40:7").await.unwrap().is_some());

        let second = coordinator.serve(40, false).await.unwrap();
        assert_eq!(second.bytes, first.bytes);
        assert_eq!(second.etag, first.etag);
    }

    #[tokio::test]
    async fn build_lock_is_released_after_build() {
        let (coordinator, kv, _) = coordinator_with_schedule();
        coordinator.serve(40, false).await.unwrap();
        // Drop-guard deletion is spawned; give it a tick to run.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(
            kv.add("build_lock:40", "1", Duration::from_secs(1))
                .await
                .unwrap(),
            "lock should be free after a completed build"
        );
        kv.delete("build_lock:40").await.unwrap();
    }

    #[tokio::test]
    async fn contended_miss_serves_newest_stale_revision() {
        let (coordinator, kv, registry) = coordinator_with_schedule();

        // Build and cache revisions 39, then move the registry to 42 with the
        // lock held elsewhere and no snap:40:42 in cache.
        registry.set(40, 39).await;
        coordinator.serve(40, false).await.unwrap();
        registry.set(40, 42).await;
        kv.add("build_lock:40", "1", Duration::from_secs(10))
            .await
            .unwrap();

        let served = coordinator.serve(40, false).await.unwrap();
        assert!(served.is_stale);
        assert_eq!(served.revision, 39);

        let doc: SnapshotDoc = serde_json::from_slice(&served.bytes).unwrap();
        assert_eq!(doc.meta.is_stale, Some(true));
        assert!(doc.meta.stale_warning.is_some());
        assert_eq!(doc.meta.schedule_revision, 39);
        // The stale read must not have triggered a rebuild of revision 42.
        assert!(kv.get_bytes("snap:40:42").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn contended_miss_without_stale_copy_is_unavailable() {
        let (coordinator, kv, registry) = coordinator_with_schedule();
        registry.set(40, 42).await;
        kv.add("build_lock:40", "1", Duration::from_secs(10))
            .await
            .unwrap();

        let err = coordinator.serve(40, false).await.unwrap_err();
        assert!(matches!(err, ServiceError::BuildUnavailable));
    }

    #[tokio::test]
    async fn contended_miss_picks_up_the_lock_holders_write() {
        let (coordinator, kv, registry) = coordinator_with_schedule();
        registry.set(40, 42).await;
        kv.add("build_lock:40", "1", Duration::from_secs(10))
            .await
            .unwrap();

        // Simulate the lock holder finishing shortly after we start waiting.
        let kv_writer = kv.clone();
        let payload = {
            let fresh = coordinator.build_and_cache(40, 42, "ignored").await.unwrap();
            kv_writer.delete("ignored").await.unwrap();
            fresh.bytes
        };
        let kv_bg = kv.clone();
        let bytes_bg = payload.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            kv_bg
                .set_bytes("snap:40:42", bytes_bg, None)
                .await
                .unwrap();
        });

        let served = coordinator.serve(40, false).await.unwrap();
        assert!(!served.is_stale);
        assert_eq!(served.bytes, payload);
    }

    #[tokio::test]
    async fn force_rebuild_bypasses_the_cache_hit() {
        let (coordinator, kv, registry) = coordinator_with_schedule();
        registry.set(40, 7).await;
        kv.set_bytes("snap:40:7", b"{bogus}".to_vec(), None)
            .await
            .unwrap();

        let served = coordinator.serve(40, true).await.unwrap();
        assert_ne!(served.bytes, b"{bogus}".to_vec());
        let doc: SnapshotDoc = serde_json::from_slice(&served.bytes).unwrap();
        assert_eq!(doc.meta.schedule_revision, 7);
    }
}
