//! The snapshot endpoint: serve the full per-school bundle with ETag
//! revalidation, stale fallback semantics and edge-cache headers.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tracing::debug;

use crate::error::AppError;
use crate::routes::common;
use crate::state::SharedState;

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct SnapshotQuery {
    /// Client's current schedule revision hint; diagnostic only.
    pub rev: Option<i64>,
    /// Device identifier bound to the screen token.
    pub dk: Option<String>,
    /// Set while crossing a period boundary: bypass the edge cache.
    pub transition: Option<u8>,
    /// Force a rebuild; honored only in debug deployments.
    pub nocache: Option<u8>,
}

#[utoipa::path(
    get,
    path = "/api/display/snapshot/{token}",
    params(
        ("token" = String, Path, description = "Screen token"),
        SnapshotQuery,
    ),
    responses(
        (status = 200, description = "Snapshot document", body = crate::dto::snapshot::SnapshotDoc),
        (status = 304, description = "ETag matched, body unchanged"),
        (status = 403, description = "Unknown screen, missing dk, or device mismatch"),
        (status = 429, description = "Rate limited"),
        (status = 503, description = "Cache miss under build contention with no stale fallback"),
    )
)]
/// Serve the snapshot for the screen's school: cache hit, single-flight
/// build, or stale fallback, in that order.
pub async fn display_snapshot(
    State(state): State<SharedState>,
    Path(token): Path<String>,
    Query(query): Query<SnapshotQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let screen = common::authorize(&state, &token, query.dk.as_deref()).await?;

    // Liveness stamp is best-effort and must not delay the response.
    let directory = state.directory();
    let screen_id = screen.id;
    tokio::spawn(async move {
        let _ = directory.touch_screen_seen(screen_id).await;
    });

    let force_rebuild = state.config().debug && query.nocache == Some(1);
    let served = state
        .coordinator()
        .serve(screen.school_id, force_rebuild)
        .await?;

    let transition = query.transition == Some(1);
    // The edge may only hold a fresh, cache-path response. Transition
    // fetches race a boundary and must not be pinned by the CDN.
    let edge_cacheable = !served.is_stale && !transition && !force_rebuild;

    if common::if_none_match(&headers) == Some(served.etag.as_str()) {
        debug!(school_id = screen.school_id, "snapshot etag matched");
        let mut response = StatusCode::NOT_MODIFIED.into_response();
        decorate(&mut response, &state, &served.etag, edge_cacheable);
        return Ok(response);
    }

    let mut response = (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json; charset=utf-8")],
        served.bytes,
    )
        .into_response();
    decorate(&mut response, &state, &served.etag, edge_cacheable);
    Ok(response)
}

fn decorate(response: &mut Response, state: &SharedState, etag: &str, edge_cacheable: bool) {
    let headers = response.headers_mut();
    if let Ok(value) = axum::http::HeaderValue::from_str(etag) {
        headers.insert(header::ETAG, value);
    }
    common::put_server_time(headers, state.server_time_ms());
    if edge_cacheable {
        common::put_edge_cacheable(headers, state.config().snapshot_edge_max_age);
    } else {
        common::put_no_store(headers);
    }
}

/// Configure the snapshot endpoint (trailing-slash tolerant).
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/api/display/snapshot/{token}", get(display_snapshot))
        .route("/api/display/snapshot/{token}/", get(display_snapshot))
}
