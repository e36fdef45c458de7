//! The cheap polling endpoint: "do you need a full fetch?".

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tracing::debug;

use crate::dto::status::StatusResponse;
use crate::error::AppError;
use crate::routes::common;
use crate::state::SharedState;

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct StatusQuery {
    /// Client's current schedule revision hint.
    pub v: Option<i64>,
    /// Device identifier bound to the screen token.
    pub dk: Option<String>,
    /// Cache-buster against misconfigured intermediaries; unused.
    #[serde(rename = "cb")]
    pub _cb: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/display/status/{token}",
    params(
        ("token" = String, Path, description = "Screen token"),
        StatusQuery,
    ),
    responses(
        (status = 200, description = "Client must fetch a fresh snapshot", body = StatusResponse),
        (status = 304, description = "Client revision is current"),
        (status = 403, description = "Unknown screen, missing dk, or device mismatch"),
        (status = 429, description = "Rate limited"),
    )
)]
/// Compare the client's revision hint with the registry and say whether a
/// snapshot fetch is needed. Never cacheable.
pub async fn display_status(
    State(state): State<SharedState>,
    Path(token): Path<String>,
    Query(query): Query<StatusQuery>,
) -> Result<Response, AppError> {
    let screen = common::authorize(&state, &token, query.dk.as_deref()).await?;
    let revision = state.registry().current(screen.school_id).await;

    let up_to_date = query.v.is_some_and(|v| v == revision);
    let mut response = if up_to_date {
        StatusCode::NOT_MODIFIED.into_response()
    } else {
        debug!(
            school_id = screen.school_id,
            client = query.v.unwrap_or(-1),
            server = revision,
            "status: fetch required"
        );
        Json(StatusResponse {
            schedule_revision: revision,
            fetch_required: true,
        })
        .into_response()
    };

    let headers = response.headers_mut();
    common::put_server_time(headers, state.server_time_ms());
    common::put_schedule_revision(headers, revision);
    common::put_no_store(headers);
    Ok(response)
}

/// Configure the status endpoint (trailing-slash tolerant).
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/api/display/status/{token}", get(display_status))
        .route("/api/display/status/{token}/", get(display_status))
}
