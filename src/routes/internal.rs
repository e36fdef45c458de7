//! Internal recovery and hook surface, meant for the private listener only:
//! the post-commit change hook for the admin application, administrative
//! revision override, and screen unbinding.

use axum::extract::{Path, State};
use axum::routing::{post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::services::{binding, signals};
use crate::state::SharedState;

#[derive(Debug, Serialize)]
pub struct BumpResponse {
    pub school_id: i64,
    /// New revision when this call won the debounce window.
    pub revision: Option<i64>,
    pub debounced: bool,
}

/// Post-commit hook: the admin application calls this after any mutation of
/// a school's display-relevant data.
pub async fn bump_revision(
    State(state): State<SharedState>,
    Path(school_id): Path<i64>,
) -> Json<BumpResponse> {
    let revision = signals::school_data_changed(&state, school_id).await;
    Json(BumpResponse {
        school_id,
        debounced: revision.is_none(),
        revision,
    })
}

#[derive(Debug, Deserialize)]
pub struct SetRevisionRequest {
    pub revision: i64,
}

#[derive(Debug, Serialize)]
pub struct SetRevisionResponse {
    pub school_id: i64,
    pub revision: i64,
}

/// Administrative recovery: force the counter to a known value.
pub async fn set_revision(
    State(state): State<SharedState>,
    Path(school_id): Path<i64>,
    Json(body): Json<SetRevisionRequest>,
) -> Result<Json<SetRevisionResponse>, AppError> {
    if body.revision < 0 {
        return Err(AppError::BadRequest("revision must be non-negative".into()));
    }
    if !state.registry().set(school_id, body.revision).await {
        return Err(AppError::Internal("revision write failed".into()));
    }
    Ok(Json(SetRevisionResponse {
        school_id,
        revision: body.revision,
    }))
}

#[derive(Debug, Serialize)]
pub struct UnbindResponse {
    pub screen_id: i64,
    pub released: bool,
}

/// Release a screen's device binding so a replacement device can claim it.
pub async fn unbind_screen(
    State(state): State<SharedState>,
    Path(screen_id): Path<i64>,
) -> Result<Json<UnbindResponse>, AppError> {
    let released = binding::unbind_device(&state.directory(), screen_id).await?;
    Ok(Json(UnbindResponse {
        screen_id,
        released,
    }))
}

/// Configure the internal routes subtree.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/internal/display/revision/{school_id}/bump", post(bump_revision))
        .route("/internal/display/revision/{school_id}", put(set_revision))
        .route("/internal/display/screens/{screen_id}/unbind", post(unbind_screen))
}
