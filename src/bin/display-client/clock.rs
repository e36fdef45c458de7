//! Server clock synchronization. Every HTTP response carries
//! `X-Server-Time-MS`; the client keeps a smoothed offset so countdowns are
//! correct even on displays with wildly wrong wall clocks.

use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Corrections beyond this are applied at once instead of smoothed.
const SNAP_THRESHOLD_MS: f64 = 30_000.0;
/// EMA weight of a new sample.
const EMA_NEW_WEIGHT: f64 = 0.2;
/// Local drift beyond this triggers a re-sync request.
const DRIFT_THRESHOLD: Duration = Duration::from_secs(1);
/// Re-sync requests are throttled to one per this window.
const RESYNC_THROTTLE: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize, Deserialize, Default)]
struct PersistedClock {
    server_clock_offset_ms: f64,
}

pub struct ClockSync {
    offset_ms: f64,
    synced: bool,
    state_path: Option<PathBuf>,
    last_resync_request: Option<Instant>,
    /// Wall/ticker pair from the previous drift check.
    drift_anchor: Option<(SystemTime, Instant)>,
}

impl ClockSync {
    /// Start from the persisted offset when available so the first second
    /// after a reload is not off by seconds.
    pub fn load(state_path: Option<PathBuf>) -> Self {
        let mut clock = Self {
            offset_ms: 0.0,
            synced: false,
            state_path,
            last_resync_request: None,
            drift_anchor: None,
        };
        if let Some(path) = clock.state_path.clone()
            && let Ok(raw) = std::fs::read_to_string(&path)
            && let Ok(persisted) = serde_json::from_str::<PersistedClock>(&raw)
        {
            clock.offset_ms = persisted.server_clock_offset_ms;
            clock.synced = true;
            info!(offset_ms = clock.offset_ms, "restored persisted clock offset");
        }
        clock
    }

    /// Fold a server timestamp into the offset: EMA smoothing for small
    /// corrections, a hard snap beyond the threshold.
    pub fn apply_server_time(&mut self, server_time_ms: i64) {
        let sample = server_time_ms as f64 - local_epoch_ms();
        let correction = (sample - self.offset_ms).abs();

        if !self.synced || correction > SNAP_THRESHOLD_MS {
            debug!(sample, "clock offset snapped");
            self.offset_ms = sample;
            self.synced = true;
        } else {
            self.offset_ms = EMA_NEW_WEIGHT * sample + (1.0 - EMA_NEW_WEIGHT) * self.offset_ms;
        }
        self.persist();
    }

    /// Server-corrected epoch milliseconds.
    pub fn now_ms(&self) -> i64 {
        (local_epoch_ms() + self.offset_ms).round() as i64
    }

    pub fn offset_ms(&self) -> f64 {
        self.offset_ms
    }

    /// Called from the 1s ticker: compare elapsed wall time with elapsed
    /// ticker time and report whether a throttled re-sync should be issued.
    pub fn drift_check(&mut self) -> bool {
        let wall_now = SystemTime::now();
        let tick_now = Instant::now();
        let Some((wall_then, tick_then)) = self.drift_anchor.replace((wall_now, tick_now)) else {
            return false;
        };

        let wall_elapsed = wall_now
            .duration_since(wall_then)
            .unwrap_or(Duration::ZERO);
        let tick_elapsed = tick_now.duration_since(tick_then);
        let divergence = wall_elapsed.abs_diff(tick_elapsed);
        if divergence <= DRIFT_THRESHOLD {
            return false;
        }

        warn!(?divergence, "local clock drift detected");
        if self
            .last_resync_request
            .is_some_and(|at| at.elapsed() < RESYNC_THROTTLE)
        {
            return false;
        }
        self.last_resync_request = Some(Instant::now());
        true
    }

    fn persist(&self) {
        let Some(path) = &self.state_path else {
            return;
        };
        let persisted = PersistedClock {
            server_clock_offset_ms: self.offset_ms,
        };
        if let Ok(raw) = serde_json::to_string(&persisted)
            && let Err(err) = std::fs::write(path, raw)
        {
            debug!(path = %path.display(), error = %err, "clock offset persist failed");
        }
    }
}

fn local_epoch_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_ms(offset: f64) -> i64 {
        (local_epoch_ms() + offset) as i64
    }

    #[test]
    fn first_sample_snaps_regardless_of_size() {
        let mut clock = ClockSync::load(None);
        clock.apply_server_time(server_ms(500.0));
        assert!((clock.offset_ms() - 500.0).abs() < 50.0);
    }

    #[test]
    fn small_corrections_are_smoothed() {
        let mut clock = ClockSync::load(None);
        clock.apply_server_time(server_ms(0.0));
        clock.apply_server_time(server_ms(1000.0));
        // 20% of the 1s correction lands on the first smoothed sample.
        assert!(clock.offset_ms() > 100.0 && clock.offset_ms() < 400.0);
    }

    #[test]
    fn converges_within_five_responses() {
        let mut clock = ClockSync::load(None);
        clock.apply_server_time(server_ms(5000.0));
        for _ in 0..5 {
            clock.apply_server_time(server_ms(6000.0));
        }
        assert!(
            (clock.offset_ms() - 6000.0).abs() < 1000.0,
            "offset {} should be within 1s of 6000",
            clock.offset_ms()
        );
    }

    #[test]
    fn huge_corrections_snap_instead_of_smoothing() {
        let mut clock = ClockSync::load(None);
        clock.apply_server_time(server_ms(0.0));
        clock.apply_server_time(server_ms(120_000.0));
        assert!((clock.offset_ms() - 120_000.0).abs() < 1000.0);
    }

    #[test]
    fn offset_round_trips_through_the_state_file() {
        let path = std::env::temp_dir().join(format!("clock-sync-test-{}.json", std::process::id()));
        {
            let mut clock = ClockSync::load(Some(path.clone()));
            clock.apply_server_time(server_ms(2500.0));
        }
        let restored = ClockSync::load(Some(path.clone()));
        assert!((restored.offset_ms() - 2500.0).abs() < 100.0);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn steady_ticker_reports_no_drift() {
        let mut clock = ClockSync::load(None);
        assert!(!clock.drift_check());
        assert!(!clock.drift_check());
    }
}
