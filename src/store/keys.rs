//! Centralized key and channel naming for the coordination store. Revision is
//! the sole cache-busting axis: snapshot keys deliberately omit the calendar
//! date so tenants never expire in lockstep at midnight.

pub fn revision(school_id: i64) -> String {
    format!("rev:{school_id}")
}

pub fn bump_lock(school_id: i64) -> String {
    format!("bump_lock:{school_id}")
}

pub fn build_lock(school_id: i64) -> String {
    format!("build_lock:{school_id}")
}

pub fn snapshot(school_id: i64, revision: i64) -> String {
    format!("snap:{school_id}:{revision}")
}

/// Prefix matching every cached snapshot of a school, any revision.
pub fn snapshot_prefix(school_id: i64) -> String {
    format!("snap:{school_id}:")
}

pub fn rate_limit(token: &str, device_id: &str) -> String {
    format!("ratelimit:{token}:{device_id}")
}

pub fn school_channel(school_id: i64) -> String {
    format!("school:{school_id}")
}

/// Pattern covering every school channel, for the process-wide subscriber.
pub const SCHOOL_CHANNEL_PATTERN: &str = "school:*";

/// Parse the school id back out of a channel name.
pub fn school_from_channel(channel: &str) -> Option<i64> {
    channel.strip_prefix("school:")?.parse().ok()
}

/// Parse the revision out of a snapshot key produced by [`snapshot`].
pub fn revision_from_snapshot_key(key: &str) -> Option<i64> {
    key.rsplit(':').next()?.parse().ok()
}
