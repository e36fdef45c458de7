//! Shared plumbing for the display endpoints: the auth/binding/rate-limit
//! gauntlet and the response headers every reply carries.

use axum::http::{HeaderMap, HeaderName, HeaderValue, header};

use crate::error::{AppError, ServiceError};
use crate::services::binding;
use crate::state::SharedState;
use crate::store::models::Screen;

pub const X_SERVER_TIME_MS: HeaderName = HeaderName::from_static("x-server-time-ms");
pub const X_SCHEDULE_REVISION: HeaderName = HeaderName::from_static("x-schedule-revision");

/// Run the shared request gauntlet for a display endpoint: device id
/// presence, per-(token, device) rate limit, then atomic binding.
pub async fn authorize(
    state: &SharedState,
    token: &str,
    device_id: Option<&str>,
) -> Result<Screen, AppError> {
    let Some(device_id) = device_id.filter(|dk| !dk.is_empty()) else {
        return Err(ServiceError::DeviceRequired.into());
    };

    state.rate_limiter().check(token, device_id).await?;

    let screen = binding::bind_device_atomic(
        &state.directory(),
        token,
        device_id,
        state.config().allow_multi_device,
    )
    .await?;
    Ok(screen)
}

/// `X-Server-Time-MS` so clients can correct clock drift on every response.
pub fn put_server_time(headers: &mut HeaderMap, server_time_ms: i64) {
    if let Ok(value) = HeaderValue::from_str(&server_time_ms.to_string()) {
        headers.insert(X_SERVER_TIME_MS, value);
    }
}

pub fn put_schedule_revision(headers: &mut HeaderMap, revision: i64) {
    if let Ok(value) = HeaderValue::from_str(&revision.to_string()) {
        headers.insert(X_SCHEDULE_REVISION, value);
    }
}

pub fn put_no_store(headers: &mut HeaderMap) {
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
}

/// Fresh snapshots may be absorbed by the edge for a short window; the token
/// in the URL path is the edge cache key.
pub fn put_edge_cacheable(headers: &mut HeaderMap, s_maxage: u64) {
    if let Ok(value) =
        HeaderValue::from_str(&format!("public, max-age=0, s-maxage={s_maxage}"))
    {
        headers.insert(header::CACHE_CONTROL, value);
    }
}

pub fn if_none_match(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::IF_NONE_MATCH)?.to_str().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::codes;
    use crate::state::test_support::memory_state;
    use crate::store::models::Screen;

    fn seed_screen(directory: &crate::store::memory::MemoryDirectory) {
        directory.insert_screen(Screen {
            id: 1,
            school_id: 40,
            name: "شاشة المدخل".into(),
            token: "TK".into(),
            bound_device_id: None,
            bound_at: None,
            is_active: true,
            last_seen: None,
        });
    }

    #[tokio::test]
    async fn missing_device_id_is_rejected_before_anything_else() {
        let (state, _, directory) = memory_state();
        seed_screen(&directory);

        for dk in [None, Some("")] {
            let err = authorize(&state, "TK", dk).await.unwrap_err();
            match err {
                AppError::Forbidden { code, .. } => assert_eq!(code, codes::DEVICE_REQUIRED),
                other => panic!("unexpected error: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn happy_path_binds_and_returns_the_screen() {
        let (state, _, directory) = memory_state();
        seed_screen(&directory);

        let screen = authorize(&state, "TK", Some("D1")).await.unwrap();
        assert_eq!(screen.school_id, 40);
    }

    #[tokio::test]
    async fn requests_beyond_the_window_budget_are_limited() {
        let (state, _, directory) = memory_state();
        seed_screen(&directory);

        let budget = state.config().rate_limit_max_requests;
        for _ in 0..budget {
            authorize(&state, "TK", Some("D1")).await.unwrap();
        }
        let err = authorize(&state, "TK", Some("D1")).await.unwrap_err();
        assert!(matches!(err, AppError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn bound_screen_rejects_the_second_device() {
        let (state, _, directory) = memory_state();
        seed_screen(&directory);

        authorize(&state, "TK", Some("D1")).await.unwrap();
        let err = authorize(&state, "TK", Some("D2")).await.unwrap_err();
        match err {
            AppError::Forbidden { code, .. } => assert_eq!(code, codes::SCREEN_BOUND),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
