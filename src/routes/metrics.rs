//! Public, unauthenticated metrics endpoint for the push plane.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use crate::dto::health::WsMetricsResponse;
use crate::error::{AppError, codes};
use crate::state::SharedState;

#[utoipa::path(
    get,
    path = "/api/display/ws-metrics/",
    responses(
        (status = 200, description = "Connection and broadcast counters", body = WsMetricsResponse),
        (status = 503, description = "Push plane is not configured"),
    )
)]
/// Counters plus an aggregate health verdict. Non-sensitive by design.
pub async fn ws_metrics(
    State(state): State<SharedState>,
) -> Result<Json<WsMetricsResponse>, AppError> {
    if !state.config().ws_enabled {
        return Err(AppError::ServiceUnavailable {
            code: codes::WS_UNAVAILABLE,
            message: "WebSocket infrastructure is not configured.".into(),
        });
    }
    Ok(Json(state.metrics().snapshot()))
}

/// Configure the metrics endpoint.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/api/display/ws-metrics", get(ws_metrics))
        .route("/api/display/ws-metrics/", get(ws_metrics))
}
