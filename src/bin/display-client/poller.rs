//! The polling planner: a pure state machine deciding what to fetch next and
//! when. Status-first, adaptive backoff on 304 streaks, an aggressive
//! snapshot cadence inside the transition window, and a 500ms nudge when the
//! socket reports an invalidation.

use std::time::{Duration, Instant};

use crate::backoff;

/// Length of the transition window entered when a countdown reaches zero.
pub const TRANSITION_WINDOW: Duration = Duration::from_secs(15);
/// Snapshot cadence inside the transition window.
pub const TRANSITION_POLL_INTERVAL: Duration = Duration::from_millis(1200);
/// Fetch delay after a push invalidation.
pub const INVALIDATE_NUDGE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollAction {
    Status,
    Snapshot { transition: bool },
}

#[derive(Debug)]
pub struct PollPlanner {
    revision: Option<i64>,
    etag: Option<String>,
    base_interval: Duration,
    idle: bool,
    status_304_streak: u32,
    transition_until: Option<Instant>,
    pending_revision: Option<i64>,
    first_snapshot_done: bool,
}

impl PollPlanner {
    pub fn new() -> Self {
        Self {
            revision: None,
            etag: None,
            base_interval: Duration::from_secs(10),
            idle: false,
            status_304_streak: 0,
            transition_until: None,
            pending_revision: None,
            first_snapshot_done: false,
        }
    }

    /// What the next fetch should be. Time-based transitions do not bump the
    /// revision, so inside the window we go straight for the snapshot.
    pub fn next_action(&self, now: Instant) -> PollAction {
        if !self.first_snapshot_done {
            return PollAction::Snapshot { transition: false };
        }
        if self.in_transition(now) {
            return PollAction::Snapshot { transition: true };
        }
        if self.pending_revision.is_some() {
            return PollAction::Snapshot { transition: false };
        }
        PollAction::Status
    }

    /// Base delay before the next fetch; the runtime applies jitter on top.
    pub fn next_interval(&self, now: Instant) -> Duration {
        if !self.first_snapshot_done {
            return Duration::ZERO;
        }
        if self.in_transition(now) {
            return TRANSITION_POLL_INTERVAL;
        }
        if self.pending_revision.is_some() {
            return INVALIDATE_NUDGE;
        }
        backoff::poll_interval(self.base_interval, self.status_304_streak, self.idle)
    }

    pub fn in_transition(&self, now: Instant) -> bool {
        self.transition_until.is_some_and(|until| now < until)
    }

    /// The countdown on screen reached zero: fetch snapshots aggressively
    /// until the server confirms the next block started.
    pub fn enter_transition(&mut self, now: Instant) {
        self.transition_until = Some(now + TRANSITION_WINDOW);
    }

    /// A snapshot landed. `remaining_seconds` > 0 confirms the boundary was
    /// crossed and closes the window.
    pub fn on_snapshot(
        &mut self,
        revision: i64,
        etag: Option<String>,
        refresh_interval_sec: i64,
        idle: bool,
        remaining_seconds: Option<i64>,
    ) {
        self.revision = Some(revision);
        self.etag = etag;
        self.base_interval = Duration::from_secs(refresh_interval_sec.clamp(5, 864_000) as u64);
        self.idle = idle;
        self.status_304_streak = 0;
        self.first_snapshot_done = true;
        if self.pending_revision.is_some_and(|pending| revision >= pending) {
            self.pending_revision = None;
        }
        if remaining_seconds.is_some_and(|remaining| remaining > 0) {
            self.transition_until = None;
        }
    }

    /// Status said 304: lengthen the next pause.
    pub fn on_status_not_modified(&mut self, revision: i64) {
        self.status_304_streak = self.status_304_streak.saturating_add(1);
        self.revision = Some(revision);
    }

    /// Status said fetch_required: reset the backoff before the snapshot.
    pub fn on_status_fetch_required(&mut self) {
        self.status_304_streak = 0;
    }

    /// Push invalidation arrived over the socket.
    pub fn on_invalidate(&mut self, revision: i64) {
        if self.revision.is_some_and(|current| revision <= current) {
            return;
        }
        self.pending_revision = Some(revision);
    }

    pub fn revision(&self) -> Option<i64> {
        self.revision
    }

    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    pub fn first_snapshot_done(&self) -> bool {
        self.first_snapshot_done
    }

    pub fn status_304_streak(&self) -> u32 {
        self.status_304_streak
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn primed() -> PollPlanner {
        let mut planner = PollPlanner::new();
        planner.on_snapshot(7, Some("\"abc\"".into()), 10, false, Some(900));
        planner
    }

    #[test]
    fn boot_goes_straight_to_snapshot() {
        let planner = PollPlanner::new();
        assert_eq!(
            planner.next_action(Instant::now()),
            PollAction::Snapshot { transition: false }
        );
        assert_eq!(planner.next_interval(Instant::now()), Duration::ZERO);
    }

    #[test]
    fn steady_state_is_status_first() {
        let planner = primed();
        assert_eq!(planner.next_action(Instant::now()), PollAction::Status);
    }

    #[test]
    fn streak_of_304s_grows_interval_to_the_active_cap() {
        let mut planner = primed();
        let now = Instant::now();
        let mut last = Duration::ZERO;
        for _ in 0..20 {
            planner.on_status_not_modified(7);
            let interval = planner.next_interval(now);
            assert!(interval >= last);
            last = interval;
        }
        assert_eq!(last, backoff::ACTIVE_MAX_INTERVAL);
    }

    #[test]
    fn idle_mode_caps_at_five_minutes() {
        let mut planner = primed();
        planner.on_snapshot(7, None, 900, true, None);
        for _ in 0..20 {
            planner.on_status_not_modified(7);
        }
        assert_eq!(
            planner.next_interval(Instant::now()),
            backoff::IDLE_MAX_INTERVAL
        );
    }

    #[test]
    fn fetch_required_resets_the_streak() {
        let mut planner = primed();
        for _ in 0..5 {
            planner.on_status_not_modified(7);
        }
        planner.on_status_fetch_required();
        assert_eq!(planner.status_304_streak(), 0);
    }

    #[test]
    fn transition_window_prefers_snapshots_at_fast_cadence() {
        let mut planner = primed();
        let now = Instant::now();
        planner.enter_transition(now);

        assert_eq!(
            planner.next_action(now),
            PollAction::Snapshot { transition: true }
        );
        assert_eq!(planner.next_interval(now), TRANSITION_POLL_INTERVAL);

        // Confirmation of the next block closes the window.
        planner.on_snapshot(7, None, 10, false, Some(1800));
        assert!(!planner.in_transition(now));
        assert_eq!(planner.next_action(now), PollAction::Status);
    }

    #[test]
    fn transition_window_expires_on_its_own() {
        let mut planner = primed();
        let start = Instant::now();
        planner.enter_transition(start);
        assert!(planner.in_transition(start + Duration::from_secs(14)));
        assert!(!planner.in_transition(start + TRANSITION_WINDOW));
    }

    #[test]
    fn zero_remaining_keeps_the_window_open() {
        let mut planner = primed();
        let now = Instant::now();
        planner.enter_transition(now);
        planner.on_snapshot(7, None, 10, false, Some(0));
        assert!(planner.in_transition(now));
    }

    #[test]
    fn invalidate_nudges_a_snapshot_fetch() {
        let mut planner = primed();
        planner.on_invalidate(9);
        let now = Instant::now();
        assert_eq!(
            planner.next_action(now),
            PollAction::Snapshot { transition: false }
        );
        assert_eq!(planner.next_interval(now), INVALIDATE_NUDGE);

        planner.on_snapshot(9, None, 10, false, Some(100));
        assert_eq!(planner.next_action(now), PollAction::Status);
    }

    #[test]
    fn stale_invalidations_are_ignored() {
        let mut planner = primed();
        planner.on_invalidate(7);
        assert_eq!(planner.next_action(Instant::now()), PollAction::Status);
    }
}
