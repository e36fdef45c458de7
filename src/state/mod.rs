pub mod groups;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::services::broadcaster::Broadcaster;
use crate::services::builder::SnapshotBuilder;
use crate::services::coordinator::SnapshotCoordinator;
use crate::services::metrics::DisplayMetrics;
use crate::services::ratelimit::RateLimiter;
use crate::services::revision::RevisionRegistry;
use crate::store::{DirectoryStore, KeyValueStore};

pub use self::groups::SchoolGroups;

pub type SharedState = Arc<AppState>;

/// Per-school event buffer. Invalidations are tiny and loss-tolerant
/// (polling recovers), so the hubs stay small.
const GROUP_EVENT_BUFFER: usize = 64;

/// Bookkeeping for one live display socket, kept only for capacity control
/// and diagnostics; fan-out rides the group hubs.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub screen_id: i64,
    pub school_id: i64,
    pub device_id: String,
    pub opened_at: DateTime<Utc>,
}

/// Central application state: configuration, both stores, metrics, the local
/// fan-out hubs and the live-connection registry.
pub struct AppState {
    config: Arc<AppConfig>,
    kv: Arc<dyn KeyValueStore>,
    directory: Arc<dyn DirectoryStore>,
    metrics: Arc<DisplayMetrics>,
    groups: SchoolGroups,
    connections: DashMap<Uuid, ConnectionInfo>,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        kv: Arc<dyn KeyValueStore>,
        directory: Arc<dyn DirectoryStore>,
    ) -> SharedState {
        let groups = SchoolGroups::new(GROUP_EVENT_BUFFER);
        Arc::new(Self {
            config,
            kv,
            directory,
            metrics: Arc::new(DisplayMetrics::default()),
            groups,
            connections: DashMap::new(),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn kv(&self) -> Arc<dyn KeyValueStore> {
        self.kv.clone()
    }

    pub fn directory(&self) -> Arc<dyn DirectoryStore> {
        self.directory.clone()
    }

    pub fn metrics(&self) -> &Arc<DisplayMetrics> {
        &self.metrics
    }

    pub fn groups(&self) -> &SchoolGroups {
        &self.groups
    }

    /// Registry of live sockets keyed by a per-connection id.
    pub fn connections(&self) -> &DashMap<Uuid, ConnectionInfo> {
        &self.connections
    }

    pub fn registry(&self) -> RevisionRegistry {
        RevisionRegistry::new(self.kv.clone())
    }

    pub fn broadcaster(&self) -> Broadcaster {
        Broadcaster::new(self.kv.clone(), self.metrics.clone(), &self.config)
    }

    pub fn rate_limiter(&self) -> RateLimiter {
        RateLimiter::new(self.kv.clone(), &self.config)
    }

    pub fn coordinator(&self) -> SnapshotCoordinator {
        let builder = SnapshotBuilder::new(self.directory.clone(), self.config.clone());
        SnapshotCoordinator::new(self.kv.clone(), builder, self.registry(), self.config.clone())
    }

    /// Epoch milliseconds for the `X-Server-Time-MS` header.
    pub fn server_time_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use crate::store::memory::{MemoryDirectory, MemoryKv};

    /// Fresh state over in-memory stores, returning the concrete stores for
    /// fixture loading and assertions.
    pub fn memory_state() -> (SharedState, Arc<MemoryKv>, Arc<MemoryDirectory>) {
        let kv = MemoryKv::new();
        let directory = MemoryDirectory::new();
        let state = AppState::new(AppConfig::for_tests(), kv.clone(), directory.clone());
        (state, kv, directory)
    }
}
