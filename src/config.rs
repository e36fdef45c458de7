//! Application-level configuration loaded once from the environment at startup.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use chrono::FixedOffset;
use tracing::warn;

/// Default local offset: UTC+3 (Riyadh), the deployment's school timezone.
const DEFAULT_UTC_OFFSET_MINUTES: i32 = 180;
/// Debounce window for revision bumps; bursts of edits inside it bump once.
pub const BUMP_DEBOUNCE: Duration = Duration::from_secs(2);
/// Single-flight build lock lifetime; a crashed builder frees it by expiry.
pub const BUILD_LOCK_TTL: Duration = Duration::from_secs(10);
/// Revision counters are refreshed with this TTL on every write.
pub const REVISION_TTL: Duration = Duration::from_secs(60 * 60 * 24 * 7);

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Feature flag: push invalidation plane on/off.
    pub ws_enabled: bool,
    /// Skip device-binding enforcement entirely.
    pub allow_multi_device: bool,
    /// `s-maxage` advertised to the edge cache for fresh snapshots.
    pub snapshot_edge_max_age: u64,
    /// Snapshot cache entry lifetime in the key-value store.
    pub snapshot_cache_ttl: u64,
    /// Maximum concurrent WebSocket connections per instance.
    pub ws_channel_capacity: usize,
    /// Expected client keepalive ping interval, seconds.
    pub ws_ping_interval_seconds: u64,
    /// Minimum spacing between metrics summary log lines, seconds.
    pub ws_metrics_log_interval: u64,
    /// Fixed-window rate limit: window length, seconds.
    pub rate_limit_window_seconds: u64,
    /// Fixed-window rate limit: requests allowed per window per (token, device).
    pub rate_limit_max_requests: u64,
    /// Local civil offset used for all schedule arithmetic.
    pub utc_offset: FixedOffset,
    /// Debug mode honors `nocache=1` on the snapshot endpoint.
    pub debug: bool,
    pub redis_url: String,
    pub database_url: String,
}

impl AppConfig {
    /// Read every knob from the environment, warning on malformed values.
    pub fn from_env() -> Arc<Self> {
        let mut config = Self {
            ws_enabled: env_bool("WS_ENABLED", true),
            allow_multi_device: env_bool("ALLOW_MULTI_DEVICE", false),
            snapshot_edge_max_age: env_parse("SNAPSHOT_EDGE_MAX_AGE", 10),
            snapshot_cache_ttl: env_parse("SNAPSHOT_CACHE_TTL_SECONDS", 600),
            ws_channel_capacity: env_parse("WS_CHANNEL_CAPACITY", 2000),
            ws_ping_interval_seconds: env_parse("WS_PING_INTERVAL_SECONDS", 30),
            ws_metrics_log_interval: env_parse("WS_METRICS_LOG_INTERVAL", 300),
            rate_limit_window_seconds: env_parse("RATE_LIMIT_WINDOW_SECONDS", 10),
            rate_limit_max_requests: env_parse("RATE_LIMIT_MAX_REQUESTS", 12),
            utc_offset: env_offset("UTC_OFFSET_MINUTES"),
            debug: env_bool("DEBUG", false),
            redis_url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into()),
            database_url: env::var("DATABASE_URL").unwrap_or_default(),
        };
        config.clamp_edge_ttl();
        Arc::new(config)
    }

    /// The edge must never serve a snapshot beyond its authoritative lifetime,
    /// so `s-maxage` is clamped down to the internal cache TTL.
    fn clamp_edge_ttl(&mut self) {
        if self.snapshot_edge_max_age > self.snapshot_cache_ttl {
            warn!(
                edge = self.snapshot_edge_max_age,
                internal = self.snapshot_cache_ttl,
                "SNAPSHOT_EDGE_MAX_AGE exceeds cache TTL; clamping"
            );
            self.snapshot_edge_max_age = self.snapshot_cache_ttl;
        }
    }

    pub fn snapshot_cache_ttl_duration(&self) -> Duration {
        Duration::from_secs(self.snapshot_cache_ttl)
    }

    #[cfg(test)]
    pub fn for_tests() -> Arc<Self> {
        Arc::new(Self {
            ws_enabled: true,
            allow_multi_device: false,
            snapshot_edge_max_age: 10,
            snapshot_cache_ttl: 600,
            ws_channel_capacity: 2000,
            ws_ping_interval_seconds: 30,
            ws_metrics_log_interval: 300,
            rate_limit_window_seconds: 10,
            rate_limit_max_requests: 12,
            utc_offset: FixedOffset::east_opt(DEFAULT_UTC_OFFSET_MINUTES * 60).unwrap(),
            debug: false,
            redis_url: String::new(),
            database_url: String::new(),
        })
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(raw) => matches!(
            raw.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

fn env_parse<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(var = name, value = %raw, "malformed value; using default");
            default
        }),
        Err(_) => default,
    }
}

fn env_offset(name: &str) -> FixedOffset {
    let minutes: i32 = env_parse(name, DEFAULT_UTC_OFFSET_MINUTES);
    FixedOffset::east_opt(minutes * 60).unwrap_or_else(|| {
        warn!(var = name, minutes, "offset out of range; using default");
        FixedOffset::east_opt(DEFAULT_UTC_OFFSET_MINUTES * 60).expect("default offset valid")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_ttl_is_clamped_to_cache_ttl() {
        let mut config = (*AppConfig::for_tests()).clone();
        config.snapshot_edge_max_age = 3600;
        config.snapshot_cache_ttl = 60;
        config.clamp_edge_ttl();
        assert_eq!(config.snapshot_edge_max_age, 60);
    }
}
