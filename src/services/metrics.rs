//! Process-local metrics for the push plane: connection and broadcast
//! counters behind a mutex, an aggregate health verdict, and a throttled
//! summary log line.

use std::sync::Mutex;
use std::time::Instant;

use tracing::info;

use crate::dto::health::{HealthVerdict, WsMetricsResponse};

#[derive(Debug, Default, Clone)]
struct Counters {
    connections_active: u64,
    connections_total: u64,
    connections_failed: u64,
    broadcasts_sent: u64,
    broadcasts_failed: u64,
    broadcast_latency_sum_ms: f64,
    broadcast_latency_count: u64,
}

#[derive(Debug)]
pub struct DisplayMetrics {
    inner: Mutex<Counters>,
    last_logged: Mutex<Option<Instant>>,
}

impl Default for DisplayMetrics {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Counters::default()),
            last_logged: Mutex::new(None),
        }
    }
}

impl DisplayMetrics {
    pub fn connection_opened(&self) {
        let mut counters = self.inner.lock().expect("metrics lock");
        counters.connections_active += 1;
        counters.connections_total += 1;
    }

    pub fn connection_closed(&self) {
        let mut counters = self.inner.lock().expect("metrics lock");
        counters.connections_active = counters.connections_active.saturating_sub(1);
    }

    /// A connection that never made it past the handshake.
    pub fn connection_failed(&self) {
        self.inner.lock().expect("metrics lock").connections_failed += 1;
    }

    pub fn broadcast_sent(&self, latency_ms: f64) {
        let mut counters = self.inner.lock().expect("metrics lock");
        counters.broadcasts_sent += 1;
        if latency_ms > 0.0 {
            counters.broadcast_latency_sum_ms += latency_ms;
            counters.broadcast_latency_count += 1;
        }
    }

    pub fn broadcast_failed(&self) {
        self.inner.lock().expect("metrics lock").broadcasts_failed += 1;
    }

    pub fn snapshot(&self) -> WsMetricsResponse {
        let counters = self.inner.lock().expect("metrics lock").clone();
        let avg_latency = if counters.broadcast_latency_count > 0 {
            counters.broadcast_latency_sum_ms / counters.broadcast_latency_count as f64
        } else {
            0.0
        };
        WsMetricsResponse {
            connections_active: counters.connections_active,
            connections_total: counters.connections_total,
            connections_failed: counters.connections_failed,
            broadcasts_sent: counters.broadcasts_sent,
            broadcasts_failed: counters.broadcasts_failed,
            avg_broadcast_latency_ms: avg_latency,
            health: verdict(&counters, avg_latency),
        }
    }

    /// Emit a summary line at most once per `interval_seconds`.
    pub fn log_if_needed(&self, interval_seconds: u64) {
        let mut last = self.last_logged.lock().expect("metrics log lock");
        if last.is_some_and(|at| at.elapsed().as_secs() < interval_seconds) {
            return;
        }
        *last = Some(Instant::now());
        drop(last);

        let snapshot = self.snapshot();
        info!(
            active = snapshot.connections_active,
            total = snapshot.connections_total,
            failed = snapshot.connections_failed,
            broadcasts = snapshot.broadcasts_sent,
            broadcasts_failed = snapshot.broadcasts_failed,
            avg_latency_ms = snapshot.avg_broadcast_latency_ms,
            health = ?snapshot.health,
            "ws metrics"
        );
    }
}

fn verdict(counters: &Counters, avg_latency_ms: f64) -> HealthVerdict {
    if counters.connections_total > 0 {
        let failure_rate = counters.connections_failed as f64 / counters.connections_total as f64;
        if failure_rate > 0.10 {
            return HealthVerdict::Critical;
        }
    }

    let broadcast_attempts = counters.broadcasts_sent + counters.broadcasts_failed;
    let broadcast_failure_rate = if broadcast_attempts > 0 {
        counters.broadcasts_failed as f64 / broadcast_attempts as f64
    } else {
        0.0
    };

    if (counters.connections_active == 0 && counters.connections_total > 10)
        || broadcast_failure_rate > 0.05
        || avg_latency_ms > 100.0
    {
        return HealthVerdict::Warning;
    }

    HealthVerdict::Ok
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_by_default() {
        let metrics = DisplayMetrics::default();
        assert_eq!(metrics.snapshot().health, HealthVerdict::Ok);
    }

    #[test]
    fn connection_failures_over_ten_percent_are_critical() {
        let metrics = DisplayMetrics::default();
        for _ in 0..20 {
            metrics.connection_opened();
        }
        for _ in 0..3 {
            metrics.connection_failed();
        }
        assert_eq!(metrics.snapshot().health, HealthVerdict::Critical);
    }

    #[test]
    fn all_connections_gone_after_real_traffic_warns() {
        let metrics = DisplayMetrics::default();
        for _ in 0..12 {
            metrics.connection_opened();
            metrics.connection_closed();
        }
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connections_active, 0);
        assert_eq!(snapshot.health, HealthVerdict::Warning);
    }

    #[test]
    fn broadcast_failure_rate_and_latency_warn() {
        let metrics = DisplayMetrics::default();
        for _ in 0..94 {
            metrics.broadcast_sent(1.0);
        }
        for _ in 0..6 {
            metrics.broadcast_failed();
        }
        assert_eq!(metrics.snapshot().health, HealthVerdict::Warning);

        let slow = DisplayMetrics::default();
        slow.broadcast_sent(250.0);
        assert_eq!(slow.snapshot().health, HealthVerdict::Warning);
    }

    #[test]
    fn active_count_never_underflows() {
        let metrics = DisplayMetrics::default();
        metrics.connection_closed();
        assert_eq!(metrics.snapshot().connections_active, 0);
    }
}
