//! One-pass snapshot builder: reads today's timeline and lists from the
//! directory store and derives the display state. Read-only, tolerant of
//! missing data, deterministic for a given store state and clock reading.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveTime, TimeZone};

use crate::config::AppConfig;
use crate::dto::snapshot::{
    Announcement, DayPathEntry, DisplaySettings, DutyItem, DutyPanel, ExcellenceItem,
    PeriodClassItem, PeriodRef, ScheduleState, SnapshotDoc, SnapshotMeta, StandbyItem, StateKind,
};
use crate::error::ServiceError;
use crate::services::dates;
use crate::store::models::{BlockKind, DayBlockRow, SchoolSettingsRow};
use crate::store::DirectoryStore;

/// Displays wake up at most this long before the first block and linger this
/// long after the last one.
const ACTIVE_WINDOW_MARGIN_MINUTES: i64 = 30;
/// Off-hours polling hint: sleep, but wake often enough to catch edits.
const OFF_HOURS_REFRESH_SECONDS: i64 = 900;

const LABEL_NO_SCHEDULE: &str = "لا يوجد جدول لليوم";
const LABEL_BEFORE_WINDOW: &str = "خارج وقت الدوام";
const LABEL_AFTER_WINDOW: &str = "انتهى الدوام";
const LABEL_BEFORE_DAY: &str = "قبل بداية اليوم الدراسي";
const LABEL_AFTER_DAY: &str = "انتهى اليوم الدراسي";
const LABEL_BREAK: &str = "استراحة";
const LABEL_PERIOD: &str = "حصة";

#[derive(Clone)]
pub struct SnapshotBuilder {
    directory: Arc<dyn DirectoryStore>,
    config: Arc<AppConfig>,
}

/// A timeline block with its times resolved onto today's date.
struct Block {
    kind: BlockKind,
    index: Option<i64>,
    label: String,
    subject: Option<String>,
    class_name: Option<String>,
    teacher: Option<String>,
    start: DateTime<FixedOffset>,
    end: DateTime<FixedOffset>,
}

impl SnapshotBuilder {
    pub fn new(directory: Arc<dyn DirectoryStore>, config: Arc<AppConfig>) -> Self {
        Self { directory, config }
    }

    /// Build the whole document a display needs in one pass.
    pub async fn build(
        &self,
        school_id: i64,
        revision: i64,
        now: DateTime<FixedOffset>,
    ) -> Result<SnapshotDoc, ServiceError> {
        let settings_row = self
            .directory
            .school_settings(school_id)
            .await?
            .unwrap_or_else(|| SchoolSettingsRow::fallback(school_id));
        let ws_enabled = self.config.ws_enabled && settings_row.ws_enabled;

        let today = now.date_naive();
        let weekday = dates::weekday_number(today);
        let rows = self.directory.day_blocks(school_id, weekday).await?;
        let timeline = resolve_timeline(rows, now);

        let mut settings = settings_payload(&settings_row);

        if timeline.is_empty() {
            settings.refresh_interval_sec = OFF_HOURS_REFRESH_SECONDS;
            return Ok(off_doc(
                settings,
                LABEL_NO_SCHEDULE,
                revision,
                ws_enabled,
                now,
                false,
            ));
        }

        let window_start = timeline.first().expect("non-empty timeline").start
            - chrono::Duration::minutes(ACTIVE_WINDOW_MARGIN_MINUTES);
        let window_end = timeline.iter().map(|b| b.end).max().expect("non-empty")
            + chrono::Duration::minutes(ACTIVE_WINDOW_MARGIN_MINUTES);

        if now < window_start {
            let wait = (window_start - now).num_seconds();
            settings.refresh_interval_sec = wait.clamp(10, OFF_HOURS_REFRESH_SECONDS);
            return Ok(off_doc(
                settings,
                LABEL_BEFORE_WINDOW,
                revision,
                ws_enabled,
                now,
                true,
            ));
        }
        if now > window_end {
            settings.refresh_interval_sec = OFF_HOURS_REFRESH_SECONDS;
            return Ok(off_doc(
                settings,
                LABEL_AFTER_WINDOW,
                revision,
                ws_enabled,
                now,
                true,
            ));
        }

        let (state, current, next) = derive_state(&timeline, now);
        let day_path = timeline
            .iter()
            .map(|block| DayPathEntry {
                from: hhmm(block.start),
                to: hhmm(block.end),
                label: block.label.clone(),
                kind: kind_str(block.kind).to_string(),
            })
            .collect();

        // Lists that only make sense while a period is running are keyed by
        // the active period index; the client filters out earlier periods.
        let active_index = current.as_ref().and_then(|b| b.index);
        let period_classes = timeline
            .iter()
            .filter(|block| block.kind == BlockKind::Period && block.index == active_index)
            .filter(|_| active_index.is_some())
            .map(|block| PeriodClassItem {
                period_index: block.index.unwrap_or_default(),
                class_name: block.class_name.clone().unwrap_or_default(),
                subject: block.subject.clone().unwrap_or_default(),
                teacher: block.teacher.clone().unwrap_or_default(),
            })
            .collect();

        let standby = self
            .directory
            .standby_for_date(school_id, today)
            .await?
            .into_iter()
            .map(|row| StandbyItem {
                period_index: row.period_index,
                class_name: row.class_name,
                subject: row.subject,
                teacher: row.teacher,
            })
            .collect();

        let duty = DutyPanel {
            items: self
                .directory
                .duty_for_date(school_id, today)
                .await?
                .into_iter()
                .map(|row| DutyItem {
                    teacher: row.teacher,
                    duty_type: row.duty_type,
                    duty_label: row.duty_label,
                    location: row.location,
                })
                .collect(),
        };

        let announcements = self
            .directory
            .announcements_at(school_id, now)
            .await?
            .into_iter()
            .map(|row| Announcement {
                id: row.id.to_string(),
                title: row.title,
                body: row.body,
            })
            .collect();

        let excellence = self
            .directory
            .excellence_at(school_id, now)
            .await?
            .into_iter()
            .map(|row| ExcellenceItem {
                name: row.name,
                reason: row.reason,
                image: row.image,
            })
            .collect();

        Ok(SnapshotDoc {
            settings,
            state,
            current_period: current.map(period_ref),
            next_period: next.map(period_ref),
            day_path,
            standby,
            period_classes,
            duty,
            announcements,
            excellence,
            date_info: dates::date_info_for(today),
            now,
            meta: SnapshotMeta {
                schedule_revision: revision,
                ws_enabled,
                is_stale: None,
                stale_warning: None,
                local_date: today.format("%Y-%m-%d").to_string(),
                is_school_day: true,
                is_active_window: true,
            },
        })
    }
}

/// Anchor raw rows on today's date and drop rows with impossible times.
fn resolve_timeline(rows: Vec<DayBlockRow>, now: DateTime<FixedOffset>) -> Vec<Block> {
    let mut timeline: Vec<Block> = rows
        .into_iter()
        .filter(|row| row.ends_at > row.starts_at)
        .map(|row| {
            let label = row.label.clone().unwrap_or_else(|| match row.kind {
                BlockKind::Period => row.subject.clone().unwrap_or_else(|| LABEL_PERIOD.into()),
                BlockKind::Break => LABEL_BREAK.into(),
            });
            Block {
                kind: row.kind,
                index: row.index,
                label,
                subject: row.subject,
                class_name: row.class_name,
                teacher: row.teacher,
                start: at_time(now, row.starts_at),
                end: at_time(now, row.ends_at),
            }
        })
        .collect();
    timeline.sort_by_key(|block| block.start);
    timeline
}

fn derive_state(
    timeline: &[Block],
    now: DateTime<FixedOffset>,
) -> (ScheduleState, Option<&Block>, Option<&Block>) {
    let current = timeline
        .iter()
        .find(|block| block.start <= now && now < block.end);
    let next = timeline.iter().find(|block| block.start > now);

    let state = if let Some(block) = current {
        ScheduleState {
            kind: match block.kind {
                BlockKind::Period => StateKind::Period,
                BlockKind::Break => StateKind::Break,
            },
            label: block.label.clone(),
            from: Some(hhmm(block.start)),
            to: Some(hhmm(block.end)),
            remaining_seconds: Some(remaining(now, block.end)),
        }
    } else if let Some(upcoming) = next {
        let first = timeline.first().expect("non-empty timeline");
        if now < first.start {
            ScheduleState {
                kind: StateKind::Before,
                label: LABEL_BEFORE_DAY.into(),
                from: Some(hhmm(first.start)),
                to: Some(hhmm(first.end)),
                remaining_seconds: Some(remaining(now, first.start)),
            }
        } else {
            // Gap between two blocks that has no explicit break row.
            ScheduleState {
                kind: StateKind::Break,
                label: LABEL_BREAK.into(),
                from: None,
                to: Some(hhmm(upcoming.start)),
                remaining_seconds: Some(remaining(now, upcoming.start)),
            }
        }
    } else {
        let last = timeline
            .iter()
            .max_by_key(|block| block.end)
            .expect("non-empty timeline");
        ScheduleState {
            kind: StateKind::After,
            label: LABEL_AFTER_DAY.into(),
            from: Some(hhmm(last.start)),
            to: Some(hhmm(last.end)),
            remaining_seconds: Some(0),
        }
    };

    // current_period is only populated while a period is actually running.
    let current_period = current.filter(|block| block.kind == BlockKind::Period);
    (state, current_period, next)
}

fn kind_str(kind: BlockKind) -> &'static str {
    match kind {
        BlockKind::Period => "period",
        BlockKind::Break => "break",
    }
}

fn period_ref(block: &Block) -> PeriodRef {
    PeriodRef {
        index: block.index,
        class_name: block.class_name.clone(),
        subject: block.subject.clone(),
        teacher: block.teacher.clone(),
        from: hhmm(block.start),
        to: hhmm(block.end),
    }
}

fn settings_payload(row: &SchoolSettingsRow) -> DisplaySettings {
    let theme = match row.theme.trim().to_lowercase().as_str() {
        "" | "default" | "dark" | "light" => "indigo".to_string(),
        other => other.to_string(),
    };
    DisplaySettings {
        name: row.name.clone(),
        logo_url: row.logo_url.clone(),
        theme,
        school_type: row.school_type.clone(),
        display_accent_color: row.display_accent_color.clone(),
        refresh_interval_sec: row.refresh_interval_sec.clamp(5, 864_000),
        standby_scroll_speed: row.standby_scroll_speed.clamp(0.15, 4.0),
        periods_scroll_speed: row.periods_scroll_speed.clamp(0.15, 4.0),
        featured_panel: row.featured_panel.clone(),
    }
}

fn off_doc(
    settings: DisplaySettings,
    label: &str,
    revision: i64,
    ws_enabled: bool,
    now: DateTime<FixedOffset>,
    is_school_day: bool,
) -> SnapshotDoc {
    let today = now.date_naive();
    SnapshotDoc {
        settings,
        state: ScheduleState {
            kind: StateKind::Off,
            label: label.to_string(),
            from: None,
            to: None,
            remaining_seconds: None,
        },
        current_period: None,
        next_period: None,
        day_path: vec![],
        standby: vec![],
        period_classes: vec![],
        duty: DutyPanel::default(),
        announcements: vec![],
        excellence: vec![],
        date_info: dates::date_info_for(today),
        now,
        meta: SnapshotMeta {
            schedule_revision: revision,
            ws_enabled,
            is_stale: None,
            stale_warning: None,
            local_date: today.format("%Y-%m-%d").to_string(),
            is_school_day,
            is_active_window: false,
        },
    }
}

fn at_time(now: DateTime<FixedOffset>, time: NaiveTime) -> DateTime<FixedOffset> {
    now.offset()
        .from_local_datetime(&now.date_naive().and_time(time))
        .single()
        .expect("fixed offset never yields ambiguous local times")
}

fn hhmm(at: DateTime<FixedOffset>) -> String {
    at.format("%H:%M").to_string()
}

/// Seconds until `until`, rounded to the nearest second and clamped at zero.
fn remaining(now: DateTime<FixedOffset>, until: DateTime<FixedOffset>) -> i64 {
    let millis = (until - now).num_milliseconds();
    ((millis as f64 / 1000.0).round() as i64).max(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryDirectory;
    use crate::store::models::{AnnouncementRow, StandbyRow};

    fn offset() -> FixedOffset {
        FixedOffset::east_opt(3 * 3600).unwrap()
    }

    fn at(h: u32, m: u32) -> DateTime<FixedOffset> {
        // 2025-09-01 is a Monday (weekday 1).
        offset().with_ymd_and_hms(2025, 9, 1, h, m, 0).unwrap()
    }

    fn period(index: i64, from: (u32, u32), to: (u32, u32)) -> DayBlockRow {
        DayBlockRow {
            kind: BlockKind::Period,
            index: Some(index),
            label: None,
            subject: Some(format!("مادة {index}")),
            class_name: Some("أ/1".into()),
            teacher: Some("المعلم".into()),
            starts_at: NaiveTime::from_hms_opt(from.0, from.1, 0).unwrap(),
            ends_at: NaiveTime::from_hms_opt(to.0, to.1, 0).unwrap(),
        }
    }

    fn break_row(from: (u32, u32), to: (u32, u32)) -> DayBlockRow {
        DayBlockRow {
            kind: BlockKind::Break,
            index: None,
            label: None,
            subject: None,
            class_name: None,
            teacher: None,
            starts_at: NaiveTime::from_hms_opt(from.0, from.1, 0).unwrap(),
            ends_at: NaiveTime::from_hms_opt(to.0, to.1, 0).unwrap(),
        }
    }

    fn builder_with_monday(blocks: Vec<DayBlockRow>) -> (SnapshotBuilder, Arc<MemoryDirectory>) {
        let directory = MemoryDirectory::new();
        directory.insert_day_blocks(40, 1, blocks);
        let builder = SnapshotBuilder::new(directory.clone(), AppConfig::for_tests());
        (builder, directory)
    }

    #[tokio::test]
    async fn no_schedule_is_off_with_sleep_hint() {
        let (builder, _) = builder_with_monday(vec![]);
        let doc = builder.build(40, 3, at(9, 0)).await.unwrap();
        assert!(matches!(doc.state.kind, StateKind::Off));
        assert_eq!(doc.state.label, LABEL_NO_SCHEDULE);
        assert_eq!(doc.settings.refresh_interval_sec, 900);
        assert!(!doc.meta.is_school_day);
        assert!(doc.day_path.is_empty());
    }

    #[tokio::test]
    async fn running_period_state_and_current_period() {
        let (builder, _) = builder_with_monday(vec![
            period(1, (8, 0), (8, 45)),
            break_row((8, 45), (9, 0)),
            period(2, (9, 0), (9, 45)),
        ]);
        let doc = builder.build(40, 7, at(8, 30)).await.unwrap();

        assert!(matches!(doc.state.kind, StateKind::Period));
        assert_eq!(doc.state.remaining_seconds, Some(900));
        assert_eq!(doc.state.from.as_deref(), Some("08:00"));
        assert_eq!(doc.state.to.as_deref(), Some("08:45"));

        let current = doc.current_period.expect("current period");
        assert_eq!(current.index, Some(1));
        let next = doc.next_period.expect("next block");
        assert_eq!(next.from, "08:45");

        assert_eq!(doc.day_path.len(), 3);
        assert_eq!(doc.meta.schedule_revision, 7);
        assert!(doc.meta.is_active_window);
    }

    #[tokio::test]
    async fn break_state_has_no_current_period() {
        let (builder, _) = builder_with_monday(vec![
            period(1, (8, 0), (8, 45)),
            break_row((8, 45), (9, 0)),
            period(2, (9, 0), (9, 45)),
        ]);
        let doc = builder.build(40, 7, at(8, 50)).await.unwrap();
        assert!(matches!(doc.state.kind, StateKind::Break));
        assert!(doc.current_period.is_none());
        assert_eq!(doc.next_period.unwrap().index, Some(2));
    }

    #[tokio::test]
    async fn before_first_block_counts_down_to_it() {
        let (builder, _) = builder_with_monday(vec![period(1, (8, 0), (8, 45))]);
        let doc = builder.build(40, 7, at(7, 45)).await.unwrap();
        assert!(matches!(doc.state.kind, StateKind::Before));
        assert_eq!(doc.state.remaining_seconds, Some(900));
    }

    #[tokio::test]
    async fn after_last_block_within_window_is_after() {
        let (builder, _) = builder_with_monday(vec![period(1, (8, 0), (8, 45))]);
        let doc = builder.build(40, 7, at(9, 0)).await.unwrap();
        assert!(matches!(doc.state.kind, StateKind::After));
        assert_eq!(doc.state.remaining_seconds, Some(0));
    }

    #[tokio::test]
    async fn outside_active_window_is_off_and_lists_are_empty() {
        let (builder, directory) = builder_with_monday(vec![period(1, (8, 0), (8, 45))]);
        directory.insert_standby(
            40,
            at(6, 0).date_naive(),
            vec![StandbyRow {
                period_index: 1,
                class_name: "أ/1".into(),
                subject: "علوم".into(),
                teacher: "بديل".into(),
            }],
        );

        let early = builder.build(40, 7, at(6, 0)).await.unwrap();
        assert!(matches!(early.state.kind, StateKind::Off));
        assert_eq!(early.state.label, LABEL_BEFORE_WINDOW);
        assert!(early.standby.is_empty());
        // Smart wake-up: sleep until the window opens, capped at 15 minutes.
        assert_eq!(early.settings.refresh_interval_sec, 900);

        let late = builder.build(40, 7, at(12, 0)).await.unwrap();
        assert_eq!(late.state.label, LABEL_AFTER_WINDOW);
    }

    #[tokio::test]
    async fn wakeup_hint_shrinks_near_window_start() {
        let (builder, _) = builder_with_monday(vec![period(1, (8, 0), (8, 45))]);
        // Window opens 07:30; at 07:25 the hint is the 5 remaining minutes.
        let doc = builder.build(40, 7, at(7, 25)).await.unwrap();
        assert_eq!(doc.settings.refresh_interval_sec, 300);
    }

    #[tokio::test]
    async fn lists_come_through_with_bounds_applied() {
        let (builder, directory) = builder_with_monday(vec![period(1, (8, 0), (8, 45))]);
        directory.insert_announcements(
            40,
            vec![AnnouncementRow {
                id: 11,
                title: "تنبيه".into(),
                body: "اجتماع بعد الدوام".into(),
            }],
        );
        let doc = builder.build(40, 7, at(8, 10)).await.unwrap();
        assert_eq!(doc.announcements.len(), 1);
        assert_eq!(doc.announcements[0].id, "11");
        assert_eq!(doc.period_classes.len(), 1);
        assert_eq!(doc.period_classes[0].period_index, 1);
    }

    #[tokio::test]
    async fn settings_are_clamped_into_recognized_ranges() {
        let directory = MemoryDirectory::new();
        let mut settings = SchoolSettingsRow::fallback(40);
        settings.refresh_interval_sec = 1;
        settings.standby_scroll_speed = 99.0;
        settings.theme = "default".into();
        directory.insert_settings(settings);
        directory.insert_day_blocks(40, 1, vec![period(1, (8, 0), (8, 45))]);

        let builder = SnapshotBuilder::new(directory, AppConfig::for_tests());
        let doc = builder.build(40, 1, at(8, 10)).await.unwrap();
        assert_eq!(doc.settings.refresh_interval_sec, 5);
        assert_eq!(doc.settings.standby_scroll_speed, 4.0);
        assert_eq!(doc.settings.theme, "indigo");
    }
}
