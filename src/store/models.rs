//! Row projections returned by the directory store. Each carries exactly the
//! fields the snapshot document serializes; wider selects are not allowed on
//! the read path.

use chrono::{DateTime, NaiveTime, Utc};

/// One physical display, resolved by its opaque token.
#[derive(Debug, Clone)]
pub struct Screen {
    pub id: i64,
    pub school_id: i64,
    pub name: String,
    pub token: String,
    pub bound_device_id: Option<String>,
    pub bound_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct SchoolSettingsRow {
    pub school_id: i64,
    pub name: String,
    pub logo_url: Option<String>,
    pub theme: String,
    pub school_type: String,
    pub display_accent_color: Option<String>,
    pub refresh_interval_sec: i64,
    pub standby_scroll_speed: f64,
    pub periods_scroll_speed: f64,
    pub featured_panel: String,
    /// School-level opt-out from the push plane, AND-ed with the global flag.
    pub ws_enabled: bool,
}

impl SchoolSettingsRow {
    /// Neutral defaults used when a school has no settings row yet.
    pub fn fallback(school_id: i64) -> Self {
        Self {
            school_id,
            name: String::new(),
            logo_url: None,
            theme: "indigo".into(),
            school_type: String::new(),
            display_accent_color: None,
            refresh_interval_sec: 30,
            standby_scroll_speed: 0.8,
            periods_scroll_speed: 0.5,
            featured_panel: "excellence".into(),
            ws_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Period,
    Break,
}

/// One timeline row for a weekday: a period with its lesson fields, or a
/// break with just a label.
#[derive(Debug, Clone)]
pub struct DayBlockRow {
    pub kind: BlockKind,
    pub index: Option<i64>,
    pub label: Option<String>,
    pub subject: Option<String>,
    pub class_name: Option<String>,
    pub teacher: Option<String>,
    pub starts_at: NaiveTime,
    pub ends_at: NaiveTime,
}

#[derive(Debug, Clone)]
pub struct StandbyRow {
    pub period_index: i64,
    pub class_name: String,
    pub subject: String,
    pub teacher: String,
}

#[derive(Debug, Clone)]
pub struct DutyRow {
    pub teacher: String,
    pub duty_type: String,
    pub duty_label: String,
    pub location: String,
}

#[derive(Debug, Clone)]
pub struct AnnouncementRow {
    pub id: i64,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct ExcellenceRow {
    pub name: String,
    pub reason: String,
    pub image: String,
}
