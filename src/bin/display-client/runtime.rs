//! The client runtime: one long-lived loop per display tab that keeps the
//! screen fresh across network, clock and server anomalies. Polling is the
//! source of truth; the socket only shortens the latency.

use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use classboard_back::dto::snapshot::{SnapshotDoc, StateKind};

use crate::backoff;
use crate::clock::ClockSync;
use crate::config::ClientConfig;
use crate::fetch::{Api, FetchError, SnapshotOutcome, StatusOutcome};
use crate::poller::{PollAction, PollPlanner, TRANSITION_POLL_INTERVAL};
use crate::render::{Frame, Surface};
use crate::scroller::{
    ANNOUNCEMENT_ROTATION, EXCELLENCE_ROTATION, Marquee, Rotator, frame_budget,
};
use crate::socket::{self, SocketEvent};
use crate::view::{ViewState, format_countdown};

/// Minimum pause after a 429 regardless of the server's hint.
const RATE_LIMIT_FLOOR: Duration = Duration::from_secs(15);
/// Marquee geometry in abstract pixels: one list row and the panel height.
const ROW_PX: f64 = 24.0;
const PANEL_PX: f64 = 240.0;
/// Configured scroll speeds are unit factors; this converts them to px/s.
const SPEED_PX_PER_UNIT: f64 = 40.0;

const BANNER_FETCH_FAILED: &str = "تعذر جلب البيانات";
const BLOCKER_BOUND: &str = "هذه الشاشة مفعلة على جهاز آخر";
const BLOCKER_DEVICE_REQUIRED: &str = "معرف الجهاز مفقود؛ أعد فتح رابط الشاشة";
const BLOCKER_UNKNOWN: &str = "رمز الشاشة غير صالح أو غير نشط";

pub struct DisplayRuntime {
    config: ClientConfig,
    api: Api,
    planner: PollPlanner,
    clock: ClockSync,
    view: Option<ViewState>,
    surface: Box<dyn Surface>,
    rng: StdRng,
    announcement_rotator: Rotator,
    excellence_rotator: Rotator,
    standby_marquee: Marquee,
    periods_marquee: Marquee,
    socket_task: Option<JoinHandle<()>>,
    socket_events: mpsc::UnboundedSender<SocketEvent>,
    socket_inbox: mpsc::UnboundedReceiver<SocketEvent>,
    first_load_attempts: u32,
    banner: Option<String>,
    blocker: Option<String>,
    last_paint: Instant,
}

impl DisplayRuntime {
    pub fn new(config: ClientConfig, surface: Box<dyn Surface>) -> Self {
        let api = Api::new(&config.server_url, &config.token, &config.device_id);
        let clock = ClockSync::load(config.state_path.clone());
        let (socket_events, socket_inbox) = mpsc::unbounded_channel();
        Self {
            api,
            clock,
            planner: PollPlanner::new(),
            view: None,
            surface,
            rng: StdRng::from_entropy(),
            announcement_rotator: Rotator::new(ANNOUNCEMENT_ROTATION),
            excellence_rotator: Rotator::new(EXCELLENCE_ROTATION),
            standby_marquee: Marquee::new(PANEL_PX, 0.8 * SPEED_PX_PER_UNIT),
            periods_marquee: Marquee::new(PANEL_PX, 0.5 * SPEED_PX_PER_UNIT),
            socket_task: None,
            socket_events,
            socket_inbox,
            first_load_attempts: 0,
            banner: None,
            blocker: None,
            last_paint: Instant::now(),
            config,
        }
    }

    /// Run forever (or until the screen is blocked and the paint loop is all
    /// that remains).
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        let mut frame_timer = tokio::time::interval(frame_budget(self.config.lite_mode));
        let mut next_poll_at = tokio::time::Instant::now();

        self.paint();

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(next_poll_at), if self.blocker.is_none() => {
                    let delay = self.execute_poll().await;
                    next_poll_at = tokio::time::Instant::now() + delay;
                }
                _ = ticker.tick() => {
                    if let Some(delay) = self.on_second_tick() {
                        let proposed = tokio::time::Instant::now() + delay;
                        next_poll_at = next_poll_at.min(proposed);
                    }
                }
                _ = frame_timer.tick() => {
                    self.paint();
                }
                Some(event) = self.socket_inbox.recv() => {
                    if let Some(delay) = self.on_socket_event(event) {
                        let proposed = tokio::time::Instant::now() + delay;
                        next_poll_at = next_poll_at.min(proposed);
                    }
                }
            }
        }
    }

    /// One scheduled fetch. Returns the delay until the next one.
    async fn execute_poll(&mut self) -> Duration {
        match self.planner.next_action(Instant::now()) {
            PollAction::Snapshot { transition } => self.fetch_snapshot(transition).await,
            PollAction::Status => self.fetch_status().await,
        }
    }

    async fn fetch_status(&mut self) -> Duration {
        match self.api.status(self.planner.revision()).await {
            Ok(reply) => {
                if let Some(server_ms) = reply.server_time_ms {
                    self.clock.apply_server_time(server_ms);
                }
                self.banner = None;
                match reply.outcome {
                    StatusOutcome::NotModified { revision } => {
                        self.planner.on_status_not_modified(revision);
                        self.jittered(self.planner.next_interval(Instant::now()))
                    }
                    StatusOutcome::FetchRequired { revision } => {
                        info!(revision, "status: snapshot fetch required");
                        self.planner.on_status_fetch_required();
                        self.fetch_snapshot(false).await
                    }
                }
            }
            Err(err) => self.on_fetch_error(err),
        }
    }

    async fn fetch_snapshot(&mut self, transition: bool) -> Duration {
        let first_load = !self.planner.first_snapshot_done();
        let result = self
            .api
            .snapshot(
                self.planner.revision(),
                self.planner.etag(),
                transition,
                first_load,
            )
            .await;

        match result {
            Ok(reply) => {
                if let Some(server_ms) = reply.server_time_ms {
                    self.clock.apply_server_time(server_ms);
                }
                self.banner = None;
                self.first_load_attempts = 0;
                match reply.outcome {
                    SnapshotOutcome::Fresh { doc, etag } => self.apply_snapshot(*doc, etag),
                    SnapshotOutcome::NotModified => {
                        // Same document; fall back to the regular cadence.
                        self.jittered(self.planner.next_interval(Instant::now()))
                    }
                }
            }
            Err(err) => self.on_fetch_error(err),
        }
    }

    fn apply_snapshot(&mut self, doc: SnapshotDoc, etag: Option<String>) -> Duration {
        let idle = matches!(doc.state.kind, StateKind::Off | StateKind::After);
        self.planner.on_snapshot(
            doc.meta.schedule_revision,
            etag,
            doc.settings.refresh_interval_sec,
            idle,
            doc.state.remaining_seconds,
        );

        if doc.meta.is_stale == Some(true) {
            // Diagnostics only; the UI renders normally.
            info!("rendering a stale snapshot while a rebuild completes");
        }

        if doc.meta.ws_enabled {
            self.ensure_socket();
        }

        self.standby_marquee
            .set_speed(doc.settings.standby_scroll_speed * SPEED_PX_PER_UNIT);
        self.periods_marquee
            .set_speed(doc.settings.periods_scroll_speed * SPEED_PX_PER_UNIT);

        match &mut self.view {
            Some(view) => view.replace(doc),
            None => self.view = Some(ViewState::new(doc)),
        }
        self.sync_panel_sizes();
        self.paint();

        self.jittered(self.planner.next_interval(Instant::now()))
    }

    fn on_fetch_error(&mut self, err: FetchError) -> Duration {
        match err {
            FetchError::Blocked { code } => {
                warn!(code = %code, "screen blocked; polling stopped");
                self.blocker = Some(
                    match code.as_str() {
                        "screen_bound" => BLOCKER_BOUND,
                        "device_required" => BLOCKER_DEVICE_REQUIRED,
                        _ => BLOCKER_UNKNOWN,
                    }
                    .to_string(),
                );
                self.paint();
                // Unused: the poll branch is gated off while blocked.
                Duration::from_secs(3600)
            }
            FetchError::RateLimited { retry_after } => {
                warn!(?retry_after, "rate limited");
                retry_after.max(RATE_LIMIT_FLOOR)
            }
            FetchError::Transient(reason) => {
                warn!(reason = %reason, "fetch failed");
                self.banner = Some(BANNER_FETCH_FAILED.to_string());
                self.paint();
                if self.planner.first_snapshot_done() {
                    // Keep the last good snapshot on screen and retry on the
                    // regular cadence, never tighter than the retry floor.
                    let interval = self
                        .planner
                        .next_interval(Instant::now())
                        .max(backoff::first_load_retry(0));
                    self.jittered(interval)
                } else {
                    let delay = backoff::first_load_retry(self.first_load_attempts);
                    self.first_load_attempts = self.first_load_attempts.saturating_add(1);
                    backoff::with_jitter(delay, &mut self.rng)
                }
            }
        }
    }

    /// 1s cadence: countdown, boundary crossing, local drift.
    fn on_second_tick(&mut self) -> Option<Duration> {
        if self.blocker.is_some() {
            return None;
        }

        let mut wake: Option<Duration> = None;

        if self.clock.drift_check() {
            // Re-sync through an immediate status round-trip.
            wake = Some(Duration::ZERO);
        }

        let now_ms = self.clock.now_ms();
        let boundary = match &mut self.view {
            Some(view) => {
                if view.tick(now_ms).hit_zero {
                    Some(view.advance_to_next())
                } else {
                    None
                }
            }
            None => None,
        };
        match boundary {
            Some(true) => {
                info!("countdown hit zero; advancing optimistically");
                self.planner.enter_transition(Instant::now());
                wake = Some(min_opt(wake, TRANSITION_POLL_INTERVAL));
            }
            Some(false) => {
                // Nothing to advance to: spread the boundary refresh so a
                // whole fleet does not fire in the same instant.
                let school_key = self.school_key();
                let delay = backoff::boundary_fetch_delay(school_key, &mut self.rng);
                info!(?delay, "day boundary; scheduling spread refresh");
                wake = Some(min_opt(wake, delay));
            }
            None => {}
        }
        wake
    }

    fn on_socket_event(&mut self, event: SocketEvent) -> Option<Duration> {
        match event {
            SocketEvent::Invalidate { revision } => {
                self.planner.on_invalidate(revision);
                // Small jitter on the nudge: one edit wakes a whole school.
                Some(backoff::with_jitter(
                    crate::poller::INVALIDATE_NUDGE,
                    &mut self.rng,
                ))
            }
            SocketEvent::PermanentlyRejected { code } => {
                warn!(code, "socket rejected permanently");
                if code == 4408 {
                    self.blocker = Some(BLOCKER_BOUND.to_string());
                    self.paint();
                }
                self.socket_task = None;
                None
            }
            SocketEvent::GaveUp => {
                self.socket_task = None;
                None
            }
        }
    }

    fn ensure_socket(&mut self) {
        if self.socket_task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        let url = socket::socket_url(
            &self.config.server_url,
            &self.config.token,
            &self.config.device_id,
        );
        let events = self.socket_events.clone();
        self.socket_task = Some(tokio::spawn(socket::run(url, events)));
    }

    fn sync_panel_sizes(&mut self) {
        let Some(view) = &self.view else {
            return;
        };
        self.standby_marquee
            .set_content(view.visible_standby().len() as f64 * ROW_PX);
        self.periods_marquee
            .set_content(view.visible_period_classes().len() as f64 * ROW_PX);
        self.announcement_rotator
            .set_len(view.doc().announcements.len());
        self.excellence_rotator.set_len(view.doc().excellence.len());
    }

    fn paint(&mut self) {
        let frame = self.compose_frame();
        self.surface.paint(&frame);
    }

    fn compose_frame(&mut self) -> Frame {
        let now = Instant::now();
        let dt = now.duration_since(self.last_paint);
        self.last_paint = now;

        if let Some(blocker) = &self.blocker {
            return Frame {
                blocker: Some(blocker.clone()),
                ..Frame::default()
            };
        }

        let Some(view) = &self.view else {
            return Frame {
                headline: "جاري التحميل…".into(),
                banner: self.banner.clone(),
                ..Frame::default()
            };
        };

        let now_ms = self.clock.now_ms();
        let doc = view.doc();

        let announcement = self
            .announcement_rotator
            .tick(now)
            .and_then(|i| doc.announcements.get(i))
            .map(|a| format!("{}: {}", a.title, a.body));
        // The featured panel setting picks which side panel gets the slot.
        let featured_duty = doc.settings.featured_panel == "duty";
        let excellence = if featured_duty {
            None
        } else {
            self.excellence_rotator
                .tick(now)
                .and_then(|i| doc.excellence.get(i))
                .map(|e| format!("{} — {}", e.name, e.reason))
        };

        let standby_offset = self.standby_marquee.tick(dt);
        let periods_offset = self.periods_marquee.tick(dt);

        Frame {
            school_name: doc.settings.name.clone(),
            headline: view.headline(),
            state_label: doc.state.label.clone(),
            countdown: format_countdown(view.countdown_seconds(now_ms)),
            progress: view.progress(now_ms),
            date_line: format!(
                "{} — {} ({} {})",
                doc.date_info.gregorian.weekday_label,
                doc.date_info.gregorian.date,
                doc.date_info.hijri.day,
                doc.date_info.hijri.month_name,
            ),
            mini_schedule: doc
                .day_path
                .iter()
                .map(|b| format!("{} {}–{}", b.label, b.from, b.to))
                .collect(),
            standby: view
                .visible_standby()
                .iter()
                .map(|s| format!("حصة {} — {} — {} ({})", s.period_index, s.class_name, s.subject, s.teacher))
                .collect(),
            period_classes: view
                .visible_period_classes()
                .iter()
                .map(|p| format!("{} — {} ({})", p.class_name, p.subject, p.teacher))
                .collect(),
            duty: if featured_duty {
                doc.duty
                    .items
                    .iter()
                    .map(|d| format!("{} — {} ({})", d.teacher, d.duty_label, d.location))
                    .collect()
            } else {
                vec![]
            },
            announcement,
            excellence,
            standby_offset,
            periods_offset,
            banner: self.banner.clone(),
            blocker: None,
            is_stale: doc.meta.is_stale.unwrap_or(false),
        }
    }

    fn jittered(&mut self, interval: Duration) -> Duration {
        backoff::with_jitter(interval, &mut self.rng)
    }

    /// Deterministic per-school spread key: the configured school id when the
    /// operator provided one, a stable hash of the token otherwise.
    fn school_key(&self) -> i64 {
        match self.config.school_id_hint {
            Some(id) => id,
            None => {
                let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
                for byte in self.config.token.bytes() {
                    hash ^= u64::from(byte);
                    hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
                }
                (hash % 30) as i64
            }
        }
    }
}

fn min_opt(current: Option<Duration>, candidate: Duration) -> Duration {
    match current {
        Some(existing) => existing.min(candidate),
        None => candidate,
    }
}
