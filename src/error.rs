use axum::{Json, http::StatusCode, http::header::RETRY_AFTER, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;

use crate::store::{DirError, KvError};

/// Wire-level error codes the display client switches on.
pub mod codes {
    pub const SCREEN_UNKNOWN: &str = "screen_unknown";
    pub const SCREEN_BOUND: &str = "screen_bound";
    pub const DEVICE_REQUIRED: &str = "device_required";
    pub const RATE_LIMITED: &str = "rate_limited";
    pub const BUILD_UNAVAILABLE: &str = "build_unavailable";
    pub const BAD_REQUEST: &str = "bad_request";
    pub const WS_UNAVAILABLE: &str = "ws_unavailable";
    pub const INTERNAL: &str = "internal_error";
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("screen token not found or inactive")]
    ScreenUnknown,
    #[error("screen is already active on another device")]
    ScreenBound,
    #[error("device identifier is required")]
    DeviceRequired,
    #[error("rate limit exceeded, retry after {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },
    #[error("snapshot unavailable: cache miss and build lock contended")]
    BuildUnavailable,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("coordination store error")]
    Store(#[source] KvError),
    #[error("directory store error")]
    Directory(#[source] DirError),
}

impl From<KvError> for ServiceError {
    fn from(err: KvError) -> Self {
        ServiceError::Store(err)
    }
}

impl From<DirError> for ServiceError {
    fn from(err: DirError) -> Self {
        ServiceError::Directory(err)
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("forbidden: {code}")]
    Forbidden { code: &'static str, message: String },
    #[error("rate limited")]
    RateLimited { retry_after_seconds: u64 },
    #[error("service unavailable: {code}")]
    ServiceUnavailable { code: &'static str, message: String },
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::ScreenUnknown => AppError::Forbidden {
                code: codes::SCREEN_UNKNOWN,
                message: "Screen token not found or inactive.".into(),
            },
            ServiceError::ScreenBound => AppError::Forbidden {
                code: codes::SCREEN_BOUND,
                message: "This screen is already active on another device.".into(),
            },
            ServiceError::DeviceRequired => AppError::Forbidden {
                code: codes::DEVICE_REQUIRED,
                message: "Device identifier (dk) is required.".into(),
            },
            ServiceError::RateLimited {
                retry_after_seconds,
            } => AppError::RateLimited {
                retry_after_seconds,
            },
            ServiceError::BuildUnavailable => AppError::ServiceUnavailable {
                code: codes::BUILD_UNAVAILABLE,
                message: "Snapshot is being rebuilt, retry shortly.".into(),
            },
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::Store(source) => AppError::Internal(source.to_string()),
            ServiceError::Directory(source) => AppError::Internal(source.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        match self {
            AppError::BadRequest(message) => typed(
                StatusCode::BAD_REQUEST,
                codes::BAD_REQUEST,
                message,
            ),
            AppError::Forbidden { code, message } => typed(StatusCode::FORBIDDEN, code, message),
            // Rate-limited replies are intentionally empty: the client only
            // needs the status code and the Retry-After hint.
            AppError::RateLimited {
                retry_after_seconds,
            } => (
                StatusCode::TOO_MANY_REQUESTS,
                [
                    (RETRY_AFTER, retry_after_seconds.to_string()),
                    (axum::http::header::CACHE_CONTROL, "no-store".to_string()),
                ],
            )
                .into_response(),
            AppError::ServiceUnavailable { code, message } => {
                typed(StatusCode::SERVICE_UNAVAILABLE, code, message)
            }
            AppError::Internal(message) => {
                typed(StatusCode::INTERNAL_SERVER_ERROR, codes::INTERNAL, message)
            }
        }
    }
}

fn typed(status: StatusCode, code: &'static str, message: String) -> axum::response::Response {
    let mut response = (status, Json(ErrorBody { code, message })).into_response();
    response.headers_mut().insert(
        axum::http::header::CACHE_CONTROL,
        axum::http::HeaderValue::from_static("no-store"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_errors_map_to_forbidden_with_wire_codes() {
        let err: AppError = ServiceError::ScreenBound.into();
        match err {
            AppError::Forbidden { code, .. } => assert_eq!(code, codes::SCREEN_BOUND),
            other => panic!("unexpected mapping: {other:?}"),
        }
    }

    #[test]
    fn rate_limit_carries_retry_hint() {
        let err: AppError = ServiceError::RateLimited {
            retry_after_seconds: 15,
        }
        .into();
        match err {
            AppError::RateLimited {
                retry_after_seconds,
            } => assert_eq!(retry_after_seconds, 15),
            other => panic!("unexpected mapping: {other:?}"),
        }
    }
}
