//! Storage contracts: the coordination key-value store (Redis in production)
//! and the authoritative directory store (Postgres in production). Each trait
//! ships a production backend and an in-memory backend used by tests and by
//! storeless development runs.

pub mod keys;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod redis_kv;

use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDate};
use futures::future::BoxFuture;
use thiserror::Error;

use self::models::{
    AnnouncementRow, DayBlockRow, DutyRow, ExcellenceRow, SchoolSettingsRow, Screen, StandbyRow,
};

#[derive(Debug, Error)]
pub enum KvError {
    #[error("key-value store unavailable: {0}")]
    Unavailable(String),
    #[error("key-value protocol error: {0}")]
    Protocol(String),
}

pub type KvResult<T> = Result<T, KvError>;

/// Contract over the shared coordination store. Everything cross-process —
/// revisions, snapshot cache, locks, rate-limit counters, pub/sub — goes
/// through this trait.
pub trait KeyValueStore: Send + Sync {
    fn get_bytes(&self, key: &str) -> BoxFuture<'static, KvResult<Option<Vec<u8>>>>;

    fn set_bytes(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> BoxFuture<'static, KvResult<()>>;

    /// Conditional create (`SET NX EX`): succeeds only when the key is absent.
    /// This is the primitive behind both locks.
    fn add(&self, key: &str, value: &str, ttl: Duration) -> BoxFuture<'static, KvResult<bool>>;

    /// Atomic increment. When the incremented value is 1 (fresh key) the TTL
    /// is applied; an existing key keeps its expiry. Callers that need a
    /// sliding expiry follow up with [`KeyValueStore::expire`].
    fn incr(&self, key: &str, ttl_on_create: Duration) -> BoxFuture<'static, KvResult<i64>>;

    /// Reset the TTL of an existing key. Returns whether the key was there.
    fn expire(&self, key: &str, ttl: Duration) -> BoxFuture<'static, KvResult<bool>>;

    /// Unconditional write of an integer value with a TTL refresh.
    fn set_int(&self, key: &str, value: i64, ttl: Duration) -> BoxFuture<'static, KvResult<()>>;

    fn get_int(&self, key: &str) -> BoxFuture<'static, KvResult<Option<i64>>>;

    fn delete(&self, key: &str) -> BoxFuture<'static, KvResult<()>>;

    /// All live keys starting with `prefix`. Used only by the stale-snapshot
    /// scan, which is bounded per school.
    fn scan_prefix(&self, prefix: &str) -> BoxFuture<'static, KvResult<Vec<String>>>;

    fn publish(&self, channel: &str, payload: String) -> BoxFuture<'static, KvResult<()>>;
}

#[derive(Debug, Error)]
pub enum DirError {
    #[error("directory store unavailable: {0}")]
    Unavailable(String),
    #[error("directory query failed: {0}")]
    Query(String),
}

pub type DirResult<T> = Result<T, DirError>;

/// Read-mostly contract over the authoritative relational data. The snapshot
/// builder and the binding service are its only consumers; the two binding
/// columns and `last_seen` are the only writes this crate ever performs.
pub trait DirectoryStore: Send + Sync {
    fn screen_by_token(&self, token: &str) -> BoxFuture<'static, DirResult<Option<Screen>>>;

    fn screen_by_id(&self, screen_id: i64) -> BoxFuture<'static, DirResult<Option<Screen>>>;

    /// Conditional bind: `UPDATE … SET bound_device_id = $device WHERE id =
    /// $id AND bound_device_id IS NULL`. Returns whether a row was updated.
    fn bind_screen_if_unbound(
        &self,
        screen_id: i64,
        device_id: &str,
    ) -> BoxFuture<'static, DirResult<bool>>;

    fn unbind_screen(&self, screen_id: i64) -> BoxFuture<'static, DirResult<bool>>;

    /// Best-effort liveness stamp; callers ignore failures.
    fn touch_screen_seen(&self, screen_id: i64) -> BoxFuture<'static, DirResult<()>>;

    fn school_settings(
        &self,
        school_id: i64,
    ) -> BoxFuture<'static, DirResult<Option<SchoolSettingsRow>>>;

    /// Timeline rows for one weekday (Monday=1 … Sunday=7).
    fn day_blocks(
        &self,
        school_id: i64,
        weekday: u32,
    ) -> BoxFuture<'static, DirResult<Vec<DayBlockRow>>>;

    fn standby_for_date(
        &self,
        school_id: i64,
        date: NaiveDate,
    ) -> BoxFuture<'static, DirResult<Vec<StandbyRow>>>;

    fn duty_for_date(
        &self,
        school_id: i64,
        date: NaiveDate,
    ) -> BoxFuture<'static, DirResult<Vec<DutyRow>>>;

    fn announcements_at(
        &self,
        school_id: i64,
        now: DateTime<FixedOffset>,
    ) -> BoxFuture<'static, DirResult<Vec<AnnouncementRow>>>;

    fn excellence_at(
        &self,
        school_id: i64,
        now: DateTime<FixedOffset>,
    ) -> BoxFuture<'static, DirResult<Vec<ExcellenceRow>>>;
}
