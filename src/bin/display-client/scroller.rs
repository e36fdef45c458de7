//! Scrolling and rotation primitives: dual-copy marquees for the long lists,
//! fixed-cadence rotators for announcements and excellence cards, and the
//! frame pacing that caps lite-mode displays at ~20 FPS.

use std::time::{Duration, Instant};

/// Announcements rotate on this cadence.
pub const ANNOUNCEMENT_ROTATION: Duration = Duration::from_millis(6500);
/// Excellence cards rotate on this cadence.
pub const EXCELLENCE_ROTATION: Duration = Duration::from_secs(7);
/// Frame budget in lite mode (~20 FPS).
pub const LITE_FRAME_BUDGET: Duration = Duration::from_millis(50);
/// Frame budget on capable hardware (~60 FPS).
pub const FULL_FRAME_BUDGET: Duration = Duration::from_millis(16);

/// A dual-copy marquee. Content scrolls upward at a configured speed; when
/// the content is shorter than the viewport it does not move at all, and a
/// clone is appended only when it overflows.
#[derive(Debug)]
pub struct Marquee {
    content_px: f64,
    viewport_px: f64,
    speed_px_s: f64,
    offset_px: f64,
}

impl Marquee {
    pub fn new(viewport_px: f64, speed_px_s: f64) -> Self {
        Self {
            content_px: 0.0,
            viewport_px,
            speed_px_s,
            offset_px: 0.0,
        }
    }

    /// Replace the measured content size, resetting the scroll position.
    pub fn set_content(&mut self, content_px: f64) {
        if (content_px - self.content_px).abs() > f64::EPSILON {
            self.content_px = content_px;
            self.offset_px = 0.0;
        }
    }

    pub fn set_speed(&mut self, speed_px_s: f64) {
        self.speed_px_s = speed_px_s;
    }

    /// Whether the dual copy is needed at all.
    pub fn overflows(&self) -> bool {
        self.content_px > self.viewport_px
    }

    /// Advance by a frame delta and return the current offset in pixels.
    pub fn tick(&mut self, dt: Duration) -> f64 {
        if !self.overflows() {
            self.offset_px = 0.0;
            return 0.0;
        }
        self.offset_px += self.speed_px_s * dt.as_secs_f64();
        // With the clone appended, wrapping at content length is seamless.
        if self.offset_px >= self.content_px {
            self.offset_px -= self.content_px;
        }
        self.offset_px
    }

    pub fn offset(&self) -> f64 {
        self.offset_px
    }
}

/// Rotates an index through a list on a fixed cadence; suspended while the
/// list is empty.
#[derive(Debug)]
pub struct Rotator {
    cadence: Duration,
    len: usize,
    index: usize,
    last_advance: Option<Instant>,
}

impl Rotator {
    pub fn new(cadence: Duration) -> Self {
        Self {
            cadence,
            len: 0,
            index: 0,
            last_advance: None,
        }
    }

    pub fn set_len(&mut self, len: usize) {
        self.len = len;
        if len == 0 {
            self.index = 0;
            self.last_advance = None;
        } else if self.index >= len {
            self.index = 0;
        }
    }

    /// Current index, advancing when the cadence elapsed. `None` while empty.
    pub fn tick(&mut self, now: Instant) -> Option<usize> {
        if self.len == 0 {
            return None;
        }
        match self.last_advance {
            None => self.last_advance = Some(now),
            Some(at) if now.duration_since(at) >= self.cadence => {
                self.index = (self.index + 1) % self.len;
                self.last_advance = Some(now);
            }
            Some(_) => {}
        }
        Some(self.index)
    }
}

/// Pick the frame budget for the detected hardware tier.
pub fn frame_budget(lite_mode: bool) -> Duration {
    if lite_mode {
        LITE_FRAME_BUDGET
    } else {
        FULL_FRAME_BUDGET
    }
}
