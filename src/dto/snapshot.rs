//! The snapshot document: the entire per-school bundle a display renders.
//! Field order is the canonical wire order; the strong ETag is a hash of the
//! serialized bytes, so serialization must stay deterministic.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum StateKind {
    Before,
    Period,
    Break,
    Off,
    After,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
/// What the school is doing right now, as derived from today's timeline.
pub struct ScheduleState {
    #[serde(rename = "type")]
    pub kind: StateKind,
    pub label: String,
    pub from: Option<String>,
    pub to: Option<String>,
    pub remaining_seconds: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DisplaySettings {
    pub name: String,
    pub logo_url: Option<String>,
    pub theme: String,
    pub school_type: String,
    pub display_accent_color: Option<String>,
    pub refresh_interval_sec: i64,
    pub standby_scroll_speed: f64,
    pub periods_scroll_speed: f64,
    pub featured_panel: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
/// A period reference as shown in the headline area: the running period or
/// the upcoming block.
pub struct PeriodRef {
    pub index: Option<i64>,
    #[serde(rename = "class")]
    pub class_name: Option<String>,
    pub subject: Option<String>,
    pub teacher: Option<String>,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DayPathEntry {
    pub from: String,
    pub to: String,
    pub label: String,
    pub kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StandbyItem {
    pub period_index: i64,
    #[serde(rename = "class")]
    pub class_name: String,
    pub subject: String,
    pub teacher: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PeriodClassItem {
    pub period_index: i64,
    #[serde(rename = "class")]
    pub class_name: String,
    pub subject: String,
    pub teacher: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DutyItem {
    pub teacher: String,
    pub duty_type: String,
    pub duty_label: String,
    pub location: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct DutyPanel {
    pub items: Vec<DutyItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Announcement {
    pub id: String,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ExcellenceItem {
    pub name: String,
    pub reason: String,
    pub image: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GregorianDate {
    pub date: String,
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub weekday: u32,
    pub weekday_label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HijriDate {
    pub date: String,
    pub year: i64,
    pub month: i64,
    pub day: i64,
    pub month_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DateInfo {
    pub gregorian: GregorianDate,
    pub hijri: HijriDate,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SnapshotMeta {
    pub schedule_revision: i64,
    pub ws_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_stale: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stale_warning: Option<String>,
    pub local_date: String,
    pub is_school_day: bool,
    pub is_active_window: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
/// The full per-school bundle. Immutable once built for a given
/// `(school_id, revision)`; two concurrent builds may differ only in
/// `now` and `meta.schedule_revision`.
pub struct SnapshotDoc {
    pub settings: DisplaySettings,
    pub state: ScheduleState,
    pub current_period: Option<PeriodRef>,
    pub next_period: Option<PeriodRef>,
    pub day_path: Vec<DayPathEntry>,
    pub standby: Vec<StandbyItem>,
    pub period_classes: Vec<PeriodClassItem>,
    pub duty: DutyPanel,
    pub announcements: Vec<Announcement>,
    pub excellence: Vec<ExcellenceItem>,
    pub date_info: DateInfo,
    pub now: DateTime<FixedOffset>,
    pub meta: SnapshotMeta,
}

impl SnapshotDoc {
    /// Serialize to the canonical wire bytes the ETag is derived from.
    pub fn canonical_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Flag this document as a stale fallback before re-serializing it.
    pub fn mark_stale(&mut self, warning: &str) {
        self.meta.is_stale = Some(true);
        self.meta.stale_warning = Some(warning.to_string());
    }
}

/// Strong ETag over the canonical document bytes.
pub fn etag_for(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("\"{}\"", hex::encode(digest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_doc() -> SnapshotDoc {
        let offset = FixedOffset::east_opt(3 * 3600).unwrap();
        SnapshotDoc {
            settings: DisplaySettings {
                name: "مدرسة النموذج".into(),
                logo_url: None,
                theme: "indigo".into(),
                school_type: "boys".into(),
                display_accent_color: Some("#1E293B".into()),
                refresh_interval_sec: 30,
                standby_scroll_speed: 0.8,
                periods_scroll_speed: 0.5,
                featured_panel: "excellence".into(),
            },
            state: ScheduleState {
                kind: StateKind::Period,
                label: "الرياضيات".into(),
                from: Some("08:00".into()),
                to: Some("08:45".into()),
                remaining_seconds: Some(900),
            },
            current_period: None,
            next_period: None,
            day_path: vec![],
            standby: vec![],
            period_classes: vec![],
            duty: DutyPanel::default(),
            announcements: vec![],
            excellence: vec![],
            date_info: DateInfo {
                gregorian: GregorianDate {
                    date: "2025-09-01".into(),
                    year: 2025,
                    month: 9,
                    day: 1,
                    weekday: 1,
                    weekday_label: "الاثنين".into(),
                },
                hijri: HijriDate {
                    date: "1447-03-09".into(),
                    year: 1447,
                    month: 3,
                    day: 9,
                    month_name: "ربيع الأول".into(),
                },
            },
            now: offset.with_ymd_and_hms(2025, 9, 1, 8, 30, 0).unwrap(),
            meta: SnapshotMeta {
                schedule_revision: 7,
                ws_enabled: true,
                is_stale: None,
                stale_warning: None,
                local_date: "2025-09-01".into(),
                is_school_day: true,
                is_active_window: true,
            },
        }
    }

    #[test]
    fn canonical_bytes_are_stable_and_hash_strongly() {
        let doc = sample_doc();
        let first = doc.canonical_bytes().unwrap();
        let second = doc.canonical_bytes().unwrap();
        assert_eq!(first, second);

        let etag = etag_for(&first);
        assert!(etag.starts_with('"') && etag.ends_with('"'));
        assert_eq!(etag.len(), 66);
        assert_eq!(etag, etag_for(&second));
    }

    #[test]
    fn stale_flag_changes_bytes_and_etag() {
        let mut doc = sample_doc();
        let fresh = doc.canonical_bytes().unwrap();
        assert!(!String::from_utf8_lossy(&fresh).contains("is_stale"));

        doc.mark_stale("عرض نسخة سابقة من البيانات");
        let stale = doc.canonical_bytes().unwrap();
        assert!(String::from_utf8_lossy(&stale).contains("is_stale"));
        assert_ne!(etag_for(&fresh), etag_for(&stale));
    }

    #[test]
    fn state_type_serializes_lowercase() {
        let doc = sample_doc();
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["state"]["type"], "period");
        assert_eq!(value["meta"]["schedule_revision"], 7);
    }

    #[test]
    fn round_trips_through_json() {
        let doc = sample_doc();
        let bytes = doc.canonical_bytes().unwrap();
        let parsed: SnapshotDoc = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed.canonical_bytes().unwrap(), bytes);
    }
}
