//! In-memory implementations of both store contracts. Used by the test suite
//! everywhere a scenario needs Redis or Postgres semantics without the
//! servers, and by storeless development runs.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use futures::FutureExt;
use futures::future::BoxFuture;

use super::models::{
    AnnouncementRow, DayBlockRow, DutyRow, ExcellenceRow, SchoolSettingsRow, Screen, StandbyRow,
};
use super::{DirResult, DirectoryStore, KeyValueStore, KvResult};

#[derive(Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self) -> bool {
        self.expires_at.is_none_or(|at| Instant::now() < at)
    }
}

/// DashMap-backed stand-in for Redis. Atomicity of `add` and `incr` rides on
/// the shard lock held by the entry API.
#[derive(Default)]
pub struct MemoryKv {
    entries: DashMap<String, Entry>,
    published: Mutex<Vec<(String, String)>>,
    /// When set, `publish` returns an error; lets tests exercise outage paths.
    fail_publish: Mutex<bool>,
}

impl MemoryKv {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Everything published so far, in order.
    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().expect("published lock").clone()
    }

    pub fn set_fail_publish(&self, fail: bool) {
        *self.fail_publish.lock().expect("fail_publish lock") = fail;
    }

    fn read(&self, key: &str) -> Option<Vec<u8>> {
        let entry = self.entries.get(key)?;
        entry.live().then(|| entry.value.clone())
    }
}

impl KeyValueStore for MemoryKv {
    fn get_bytes(&self, key: &str) -> BoxFuture<'static, KvResult<Option<Vec<u8>>>> {
        let value = self.read(key);
        async move { Ok(value) }.boxed()
    }

    fn set_bytes(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> BoxFuture<'static, KvResult<()>> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        async move { Ok(()) }.boxed()
    }

    fn add(&self, key: &str, value: &str, ttl: Duration) -> BoxFuture<'static, KvResult<bool>> {
        let created = match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(mut occupied) if !occupied.get().live() => {
                occupied.insert(Entry {
                    value: value.as_bytes().to_vec(),
                    expires_at: Some(Instant::now() + ttl),
                });
                true
            }
            MapEntry::Occupied(_) => false,
            MapEntry::Vacant(vacant) => {
                vacant.insert(Entry {
                    value: value.as_bytes().to_vec(),
                    expires_at: Some(Instant::now() + ttl),
                });
                true
            }
        };
        async move { Ok(created) }.boxed()
    }

    fn incr(&self, key: &str, ttl_on_create: Duration) -> BoxFuture<'static, KvResult<i64>> {
        let value = match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(mut occupied) if occupied.get().live() => {
                let current: i64 = String::from_utf8_lossy(&occupied.get().value)
                    .parse()
                    .unwrap_or(0);
                let next = current + 1;
                occupied.get_mut().value = next.to_string().into_bytes();
                next
            }
            MapEntry::Occupied(mut occupied) => {
                occupied.insert(Entry {
                    value: b"1".to_vec(),
                    expires_at: Some(Instant::now() + ttl_on_create),
                });
                1
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(Entry {
                    value: b"1".to_vec(),
                    expires_at: Some(Instant::now() + ttl_on_create),
                });
                1
            }
        };
        async move { Ok(value) }.boxed()
    }

    fn expire(&self, key: &str, ttl: Duration) -> BoxFuture<'static, KvResult<bool>> {
        let refreshed = match self.entries.get_mut(key) {
            Some(mut entry) if entry.live() => {
                entry.expires_at = Some(Instant::now() + ttl);
                true
            }
            _ => false,
        };
        async move { Ok(refreshed) }.boxed()
    }

    fn set_int(&self, key: &str, value: i64, ttl: Duration) -> BoxFuture<'static, KvResult<()>> {
        self.set_bytes(key, value.to_string().into_bytes(), Some(ttl))
    }

    fn get_int(&self, key: &str) -> BoxFuture<'static, KvResult<Option<i64>>> {
        let value = self
            .read(key)
            .and_then(|bytes| String::from_utf8_lossy(&bytes).parse().ok());
        async move { Ok(value) }.boxed()
    }

    fn delete(&self, key: &str) -> BoxFuture<'static, KvResult<()>> {
        self.entries.remove(key);
        async move { Ok(()) }.boxed()
    }

    fn scan_prefix(&self, prefix: &str) -> BoxFuture<'static, KvResult<Vec<String>>> {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix) && entry.value().live())
            .map(|entry| entry.key().clone())
            .collect();
        async move { Ok(keys) }.boxed()
    }

    fn publish(&self, channel: &str, payload: String) -> BoxFuture<'static, KvResult<()>> {
        if *self.fail_publish.lock().expect("fail_publish lock") {
            return async move {
                Err(super::KvError::Unavailable(
                    "publish disabled by test".into(),
                ))
            }
            .boxed();
        }
        self.published
            .lock()
            .expect("published lock")
            .push((channel.to_string(), payload));
        async move { Ok(()) }.boxed()
    }
}

/// Fixture-backed stand-in for the authoritative relational store.
#[derive(Default)]
pub struct MemoryDirectory {
    screens: DashMap<i64, Screen>,
    settings: DashMap<i64, SchoolSettingsRow>,
    blocks: DashMap<(i64, u32), Vec<DayBlockRow>>,
    standby: DashMap<(i64, NaiveDate), Vec<StandbyRow>>,
    duty: DashMap<(i64, NaiveDate), Vec<DutyRow>>,
    announcements: DashMap<i64, Vec<AnnouncementRow>>,
    excellence: DashMap<i64, Vec<ExcellenceRow>>,
}

impl MemoryDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert_screen(&self, screen: Screen) {
        self.screens.insert(screen.id, screen);
    }

    pub fn insert_settings(&self, settings: SchoolSettingsRow) {
        self.settings.insert(settings.school_id, settings);
    }

    pub fn insert_day_blocks(&self, school_id: i64, weekday: u32, blocks: Vec<DayBlockRow>) {
        self.blocks.insert((school_id, weekday), blocks);
    }

    pub fn insert_standby(&self, school_id: i64, date: NaiveDate, rows: Vec<StandbyRow>) {
        self.standby.insert((school_id, date), rows);
    }

    pub fn insert_duty(&self, school_id: i64, date: NaiveDate, rows: Vec<DutyRow>) {
        self.duty.insert((school_id, date), rows);
    }

    pub fn insert_announcements(&self, school_id: i64, rows: Vec<AnnouncementRow>) {
        self.announcements.insert(school_id, rows);
    }

    pub fn insert_excellence(&self, school_id: i64, rows: Vec<ExcellenceRow>) {
        self.excellence.insert(school_id, rows);
    }
}

impl DirectoryStore for MemoryDirectory {
    fn screen_by_token(&self, token: &str) -> BoxFuture<'static, DirResult<Option<Screen>>> {
        let screen = self
            .screens
            .iter()
            .find(|entry| entry.value().token == token && entry.value().is_active)
            .map(|entry| entry.value().clone());
        async move { Ok(screen) }.boxed()
    }

    fn screen_by_id(&self, screen_id: i64) -> BoxFuture<'static, DirResult<Option<Screen>>> {
        let screen = self.screens.get(&screen_id).map(|s| s.clone());
        async move { Ok(screen) }.boxed()
    }

    fn bind_screen_if_unbound(
        &self,
        screen_id: i64,
        device_id: &str,
    ) -> BoxFuture<'static, DirResult<bool>> {
        // get_mut holds the shard lock, matching the SQL conditional UPDATE.
        let updated = match self.screens.get_mut(&screen_id) {
            Some(mut screen) if screen.bound_device_id.is_none() => {
                screen.bound_device_id = Some(device_id.to_string());
                screen.bound_at = Some(Utc::now());
                true
            }
            _ => false,
        };
        async move { Ok(updated) }.boxed()
    }

    fn unbind_screen(&self, screen_id: i64) -> BoxFuture<'static, DirResult<bool>> {
        let updated = match self.screens.get_mut(&screen_id) {
            Some(mut screen) => {
                screen.bound_device_id = None;
                screen.bound_at = None;
                true
            }
            None => false,
        };
        async move { Ok(updated) }.boxed()
    }

    fn touch_screen_seen(&self, screen_id: i64) -> BoxFuture<'static, DirResult<()>> {
        if let Some(mut screen) = self.screens.get_mut(&screen_id) {
            screen.last_seen = Some(Utc::now());
        }
        async move { Ok(()) }.boxed()
    }

    fn school_settings(
        &self,
        school_id: i64,
    ) -> BoxFuture<'static, DirResult<Option<SchoolSettingsRow>>> {
        let settings = self.settings.get(&school_id).map(|s| s.clone());
        async move { Ok(settings) }.boxed()
    }

    fn day_blocks(
        &self,
        school_id: i64,
        weekday: u32,
    ) -> BoxFuture<'static, DirResult<Vec<DayBlockRow>>> {
        let blocks = self
            .blocks
            .get(&(school_id, weekday))
            .map(|b| b.clone())
            .unwrap_or_default();
        async move { Ok(blocks) }.boxed()
    }

    fn standby_for_date(
        &self,
        school_id: i64,
        date: NaiveDate,
    ) -> BoxFuture<'static, DirResult<Vec<StandbyRow>>> {
        let rows = self
            .standby
            .get(&(school_id, date))
            .map(|r| r.clone())
            .unwrap_or_default();
        async move { Ok(rows) }.boxed()
    }

    fn duty_for_date(
        &self,
        school_id: i64,
        date: NaiveDate,
    ) -> BoxFuture<'static, DirResult<Vec<DutyRow>>> {
        let rows = self
            .duty
            .get(&(school_id, date))
            .map(|r| r.clone())
            .unwrap_or_default();
        async move { Ok(rows) }.boxed()
    }

    fn announcements_at(
        &self,
        school_id: i64,
        _now: DateTime<FixedOffset>,
    ) -> BoxFuture<'static, DirResult<Vec<AnnouncementRow>>> {
        let rows = self
            .announcements
            .get(&school_id)
            .map(|r| r.clone())
            .unwrap_or_default();
        async move { Ok(rows) }.boxed()
    }

    fn excellence_at(
        &self,
        school_id: i64,
        _now: DateTime<FixedOffset>,
    ) -> BoxFuture<'static, DirResult<Vec<ExcellenceRow>>> {
        let rows = self
            .excellence
            .get(&school_id)
            .map(|r| r.clone())
            .unwrap_or_default();
        async move { Ok(rows) }.boxed()
    }
}
