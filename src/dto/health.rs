use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthVerdict {
    Ok,
    Warning,
    Critical,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
/// Public counters for the push plane plus an aggregate health verdict.
pub struct WsMetricsResponse {
    pub connections_active: u64,
    pub connections_total: u64,
    pub connections_failed: u64,
    pub broadcasts_sent: u64,
    pub broadcasts_failed: u64,
    pub avg_broadcast_latency_ms: f64,
    pub health: HealthVerdict,
}
