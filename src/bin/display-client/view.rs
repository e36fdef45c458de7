//! View state: turns the latest snapshot plus the synchronized clock into
//! what the surface paints — headline, countdown, progress arc, filtered
//! lists — including the optimistic advance at a period boundary.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone};
use classboard_back::dto::snapshot::{
    PeriodClassItem, PeriodRef, SnapshotDoc, StandbyItem, StateKind,
};

/// Local countdown targets further than this from the corrected clock are
/// rejected in favor of the server's `remaining_seconds`.
const SANITY_PAST_MS: i64 = -12 * 3600 * 1000;
const SANITY_FUTURE_MS: i64 = 24 * 3600 * 1000;

const HEADLINE_PERIOD_PREFIX: &str = "الحصة";

#[derive(Debug)]
pub struct ViewState {
    doc: SnapshotDoc,
    /// Optimistically-advanced next period after a countdown hit zero.
    advanced: Option<PeriodRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub countdown_seconds: i64,
    /// The countdown crossed zero on this tick.
    pub hit_zero: bool,
}

impl ViewState {
    pub fn new(doc: SnapshotDoc) -> Self {
        Self {
            doc,
            advanced: None,
        }
    }

    /// A fresh snapshot replaces any optimistic state.
    pub fn replace(&mut self, doc: SnapshotDoc) {
        self.doc = doc;
        self.advanced = None;
    }

    pub fn doc(&self) -> &SnapshotDoc {
        &self.doc
    }

    /// Advance the countdown. Crossing zero reports `hit_zero` exactly once;
    /// the runtime reacts by advancing optimistically and opening the
    /// transition window.
    pub fn tick(&mut self, now_ms: i64) -> Tick {
        let before = self.countdown_seconds(now_ms - 1000);
        let current = self.countdown_seconds(now_ms);
        Tick {
            countdown_seconds: current,
            hit_zero: before > 0 && current == 0,
        }
    }

    /// Seconds until the current target (block end, or first block start
    /// while in `before`), clamped at zero.
    pub fn countdown_seconds(&self, now_ms: i64) -> i64 {
        match self.countdown_target_ms(now_ms) {
            Some(target) => ((target - now_ms) as f64 / 1000.0).round().max(0.0) as i64,
            None => 0,
        }
    }

    fn countdown_target_ms(&self, now_ms: i64) -> Option<i64> {
        if let Some(next) = &self.advanced {
            return self.instant_ms(&next.to);
        }

        let state = &self.doc.state;
        let hhmm = match state.kind {
            StateKind::Before => state.from.as_deref(),
            StateKind::Period | StateKind::Break => state.to.as_deref(),
            StateKind::Off | StateKind::After => None,
        }?;

        let target = self.instant_ms(hhmm)?;
        let delta = target - now_ms;
        if !(SANITY_PAST_MS..=SANITY_FUTURE_MS).contains(&delta) {
            // Local reconstruction is implausible; trust the server bound.
            return state
                .remaining_seconds
                .map(|remaining| now_ms + remaining * 1000);
        }
        Some(target)
    }

    /// Fraction of the running block elapsed, for the progress arc.
    pub fn progress(&self, now_ms: i64) -> Option<f64> {
        let (from, to) = if let Some(next) = &self.advanced {
            (Some(next.from.as_str()), Some(next.to.as_str()))
        } else {
            match self.doc.state.kind {
                StateKind::Period | StateKind::Break => (
                    self.doc.state.from.as_deref(),
                    self.doc.state.to.as_deref(),
                ),
                _ => (None, None),
            }
        };
        let from = self.instant_ms(from?)?;
        let to = self.instant_ms(to?)?;
        if to <= from {
            return None;
        }
        Some(((now_ms - from) as f64 / (to - from) as f64).clamp(0.0, 1.0))
    }

    /// Optimistically advance onto `next_period`. Returns false when there is
    /// nothing to advance to (end of day).
    pub fn advance_to_next(&mut self) -> bool {
        match self.doc.next_period.clone() {
            Some(next) => {
                self.advanced = Some(next);
                true
            }
            None => false,
        }
    }

    pub fn is_advanced(&self) -> bool {
        self.advanced.is_some()
    }

    pub fn headline(&self) -> String {
        if let Some(next) = &self.advanced {
            return headline_for_period(next);
        }
        match self.doc.state.kind {
            StateKind::Period => self
                .doc
                .current_period
                .as_ref()
                .map(headline_for_period)
                .unwrap_or_else(|| self.doc.state.label.clone()),
            _ => self.doc.state.label.clone(),
        }
    }

    /// The period index the UI is currently on, counting the optimistic
    /// advance. Drives list filtering.
    pub fn runtime_period_index(&self) -> Option<i64> {
        if let Some(next) = &self.advanced {
            return next.index;
        }
        self.doc.current_period.as_ref().and_then(|p| p.index)
    }

    fn day_over(&self) -> bool {
        matches!(self.doc.state.kind, StateKind::After) && self.advanced.is_none()
    }

    /// Standby rows still relevant: periods earlier than the active one are
    /// hidden, and after the day is over the list is empty.
    pub fn visible_standby(&self) -> Vec<&StandbyItem> {
        if self.day_over() {
            return vec![];
        }
        let floor = self.runtime_period_index().unwrap_or(0);
        self.doc
            .standby
            .iter()
            .filter(|item| item.period_index >= floor)
            .collect()
    }

    pub fn visible_period_classes(&self) -> Vec<&PeriodClassItem> {
        if self.day_over() {
            return vec![];
        }
        let floor = self.runtime_period_index().unwrap_or(0);
        self.doc
            .period_classes
            .iter()
            .filter(|item| item.period_index >= floor)
            .collect()
    }

    fn instant_ms(&self, hhmm: &str) -> Option<i64> {
        let date = NaiveDate::parse_from_str(&self.doc.meta.local_date, "%Y-%m-%d").ok()?;
        let time = NaiveTime::parse_from_str(hhmm, "%H:%M").ok()?;
        let offset: &FixedOffset = self.doc.now.offset();
        let instant: DateTime<FixedOffset> =
            offset.from_local_datetime(&date.and_time(time)).single()?;
        Some(instant.timestamp_millis())
    }
}

fn headline_for_period(period: &PeriodRef) -> String {
    let subject = period.subject.clone().unwrap_or_default();
    match period.index {
        Some(index) if subject.is_empty() => format!("{HEADLINE_PERIOD_PREFIX} {index}"),
        Some(index) => format!("{HEADLINE_PERIOD_PREFIX} {index} — {subject}"),
        None => subject,
    }
}

/// "MM:SS", growing to "H:MM:SS" past the hour.
pub fn format_countdown(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let (h, m, s) = (seconds / 3600, (seconds % 3600) / 60, seconds % 60);
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use classboard_back::dto::snapshot::{
        DateInfo, DisplaySettings, DutyPanel, GregorianDate, HijriDate, ScheduleState,
        SnapshotMeta,
    };

    fn offset() -> FixedOffset {
        FixedOffset::east_opt(3 * 3600).unwrap()
    }

    fn ms(h: u32, m: u32, s: u32) -> i64 {
        offset()
            .with_ymd_and_hms(2025, 9, 1, h, m, s)
            .unwrap()
            .timestamp_millis()
    }

    fn doc_in_period() -> SnapshotDoc {
        SnapshotDoc {
            settings: DisplaySettings {
                name: "مدرسة".into(),
                logo_url: None,
                theme: "indigo".into(),
                school_type: String::new(),
                display_accent_color: None,
                refresh_interval_sec: 10,
                standby_scroll_speed: 0.8,
                periods_scroll_speed: 0.5,
                featured_panel: "excellence".into(),
            },
            state: ScheduleState {
                kind: StateKind::Period,
                label: "رياضيات".into(),
                from: Some("08:00".into()),
                to: Some("08:45".into()),
                remaining_seconds: Some(3),
            },
            current_period: Some(PeriodRef {
                index: Some(2),
                class_name: Some("أ/1".into()),
                subject: Some("رياضيات".into()),
                teacher: Some("المعلم".into()),
                from: "08:00".into(),
                to: "08:45".into(),
            }),
            next_period: Some(PeriodRef {
                index: Some(3),
                class_name: Some("أ/1".into()),
                subject: Some("علوم".into()),
                teacher: Some("المعلم".into()),
                from: "08:45".into(),
                to: "09:30".into(),
            }),
            day_path: vec![],
            standby: vec![
                StandbyItem {
                    period_index: 1,
                    class_name: "أ/2".into(),
                    subject: "لغتي".into(),
                    teacher: "بديل".into(),
                },
                StandbyItem {
                    period_index: 3,
                    class_name: "أ/3".into(),
                    subject: "علوم".into(),
                    teacher: "بديل".into(),
                },
            ],
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
            now: offset().with_ymd_and_hms(2025, 9, 1, 8, 44, 57).unwrap(),
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
    fn countdown_tracks_block_end_locally() {
        let view = ViewState::new(doc_in_period());
        assert_eq!(view.countdown_seconds(ms(8, 44, 57)), 3);
        assert_eq!(view.countdown_seconds(ms(8, 30, 0)), 900);
        assert_eq!(view.countdown_seconds(ms(8, 46, 0)), 0);
    }

    #[test]
    fn tick_reports_zero_crossing_once() {
        let mut view = ViewState::new(doc_in_period());
        assert!(!view.tick(ms(8, 44, 57)).hit_zero);
        let crossing = view.tick(ms(8, 45, 0));
        assert!(crossing.hit_zero);
        assert_eq!(crossing.countdown_seconds, 0);
        assert!(!view.tick(ms(8, 45, 1)).hit_zero);
    }

    #[test]
    fn optimistic_advance_rebuilds_countdown_to_next_end() {
        let mut view = ViewState::new(doc_in_period());
        assert!(view.advance_to_next());

        assert_eq!(view.headline(), "الحصة 3 — علوم");
        // Countdown now runs to 09:30.
        assert_eq!(view.countdown_seconds(ms(8, 45, 0)), 2700);
        assert_eq!(view.runtime_period_index(), Some(3));
    }

    #[test]
    fn fresh_snapshot_clears_the_optimistic_state() {
        let mut view = ViewState::new(doc_in_period());
        view.advance_to_next();
        view.replace(doc_in_period());
        assert!(!view.is_advanced());
        assert_eq!(view.headline(), "الحصة 2 — رياضيات");
    }

    #[test]
    fn progress_moves_through_the_block() {
        let view = ViewState::new(doc_in_period());
        let early = view.progress(ms(8, 0, 0)).unwrap();
        let mid = view.progress(ms(8, 22, 30)).unwrap();
        let late = view.progress(ms(8, 45, 0)).unwrap();
        assert!(early < 0.01);
        assert!((mid - 0.5).abs() < 0.01);
        assert!((late - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn implausible_target_falls_back_to_server_remaining() {
        let mut doc = doc_in_period();
        // Clock wildly wrong: pretend "now" is two days later.
        doc.state.remaining_seconds = Some(120);
        let view = ViewState::new(doc);
        let two_days_later = ms(8, 0, 0) + 48 * 3600 * 1000;
        assert_eq!(view.countdown_seconds(two_days_later), 120);
    }

    #[test]
    fn standby_hides_periods_already_passed() {
        let view = ViewState::new(doc_in_period());
        let visible = view.visible_standby();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].period_index, 3);
    }

    #[test]
    fn day_over_empties_the_lists() {
        let mut doc = doc_in_period();
        doc.state.kind = StateKind::After;
        doc.current_period = None;
        let view = ViewState::new(doc);
        assert!(view.visible_standby().is_empty());
        assert!(view.visible_period_classes().is_empty());
    }

    #[test]
    fn countdown_formatting() {
        assert_eq!(format_countdown(59), "00:59");
        assert_eq!(format_countdown(605), "10:05");
        assert_eq!(format_countdown(3725), "1:02:05");
        assert_eq!(format_countdown(-5), "00:00");
    }
}
