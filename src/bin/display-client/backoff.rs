//! Interval arithmetic for the polling loop, first-load retries and socket
//! reconnects. All functions are pure; jitter is applied by the caller's rng.

use std::time::Duration;

use rand::Rng;

/// Growth factor while the schedule is live on screen.
pub const ACTIVE_BACKOFF_FACTOR: f64 = 1.7;
/// Growth factor while the school is off-hours.
pub const IDLE_BACKOFF_FACTOR: f64 = 2.0;
/// Poll interval ceiling during school hours.
pub const ACTIVE_MAX_INTERVAL: Duration = Duration::from_secs(45);
/// Poll interval ceiling off-hours.
pub const IDLE_MAX_INTERVAL: Duration = Duration::from_secs(300);
/// Jitter applied to every scheduled fetch: ±25%.
pub const JITTER_FRACTION: f64 = 0.25;

/// First-load retry delay: `2 * 1.5^attempt`, capped at 30s.
pub fn first_load_retry(attempt: u32) -> Duration {
    let seconds = 2.0 * 1.5_f64.powi(attempt.min(16) as i32);
    Duration::from_secs_f64(seconds.min(30.0))
}

/// Socket reconnect delay: `1s * 2^attempt`, capped at 60s.
pub fn ws_reconnect_delay(attempt: u32) -> Duration {
    let seconds = 2.0_f64.powi(attempt.min(16) as i32);
    Duration::from_secs_f64(seconds.min(60.0))
}

/// Poll interval after `streak` consecutive 304s: `base * factor^streak`,
/// bounded by the mode's ceiling.
pub fn poll_interval(base: Duration, streak: u32, idle: bool) -> Duration {
    let (factor, cap) = if idle {
        (IDLE_BACKOFF_FACTOR, IDLE_MAX_INTERVAL)
    } else {
        (ACTIVE_BACKOFF_FACTOR, ACTIVE_MAX_INTERVAL)
    };
    let scaled = base.as_secs_f64() * factor.powi(streak.min(32) as i32);
    Duration::from_secs_f64(scaled.min(cap.as_secs_f64()))
}

/// Apply ±`JITTER_FRACTION` of random spread to an interval.
pub fn with_jitter<R: Rng>(interval: Duration, rng: &mut R) -> Duration {
    let spread = rng.gen_range(-JITTER_FRACTION..=JITTER_FRACTION);
    Duration::from_secs_f64((interval.as_secs_f64() * (1.0 + spread)).max(0.05))
}

/// Spacing for the boundary refresh so a whole fleet never fires in the same
/// instant: 1–15s random plus a deterministic per-school offset.
pub fn boundary_fetch_delay<R: Rng>(school_id: i64, rng: &mut R) -> Duration {
    let random = rng.gen_range(1.0..=15.0);
    let deterministic = (school_id.rem_euclid(30)) as f64;
    Duration::from_secs_f64(random + deterministic)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn first_load_retry_grows_and_caps_at_thirty() {
        assert_eq!(first_load_retry(0), Duration::from_secs(2));
        assert_eq!(first_load_retry(1), Duration::from_secs(3));
        assert!(first_load_retry(7) <= Duration::from_secs(30));
        assert_eq!(first_load_retry(20), Duration::from_secs(30));
    }

    #[test]
    fn ws_reconnect_doubles_to_sixty() {
        assert_eq!(ws_reconnect_delay(0), Duration::from_secs(1));
        assert_eq!(ws_reconnect_delay(1), Duration::from_secs(2));
        assert_eq!(ws_reconnect_delay(5), Duration::from_secs(32));
        assert_eq!(ws_reconnect_delay(10), Duration::from_secs(60));
    }

    #[test]
    fn poll_interval_is_bounded_by_mode_caps() {
        let base = Duration::from_secs(10);
        assert_eq!(poll_interval(base, 0, false), base);
        for streak in 0..50 {
            assert!(poll_interval(base, streak, false) <= ACTIVE_MAX_INTERVAL);
            assert!(poll_interval(base, streak, true) <= IDLE_MAX_INTERVAL);
        }
        assert_eq!(poll_interval(base, 40, false), ACTIVE_MAX_INTERVAL);
        assert_eq!(poll_interval(base, 40, true), IDLE_MAX_INTERVAL);
    }

    #[test]
    fn jitter_stays_within_a_quarter() {
        let mut rng = StdRng::seed_from_u64(7);
        let base = Duration::from_secs(40);
        for _ in 0..200 {
            let jittered = with_jitter(base, &mut rng);
            assert!(jittered >= Duration::from_secs(30));
            assert!(jittered <= Duration::from_secs(50));
        }
    }

    #[test]
    fn boundary_delay_spreads_by_school() {
        let mut rng = StdRng::seed_from_u64(7);
        let d = boundary_fetch_delay(61, &mut rng);
        // school 61 => +1s deterministic, 1..=15s random.
        assert!(d >= Duration::from_secs(2));
        assert!(d <= Duration::from_secs(16));
    }
}
