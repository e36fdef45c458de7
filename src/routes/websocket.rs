//! WebSocket upgrade endpoint for the push invalidation plane.

use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;

use crate::services::websocket_service::{self, WsParams};
use crate::state::SharedState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
    pub dk: Option<String>,
}

#[utoipa::path(
    get,
    path = "/ws/display/",
    responses((status = 101, description = "Switching protocols to WebSocket"))
)]
/// Upgrade into a display push session. Validation happens post-upgrade so
/// failures surface as the documented close codes (4400/4403/4408).
pub async fn ws_handler(
    State(state): State<SharedState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let params = WsParams {
        token: query.token,
        device_id: query.dk,
    };
    ws.on_upgrade(move |socket| websocket_service::handle_socket(state, socket, params))
}

/// Configure the WebSocket endpoint.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/ws/display", get(ws_handler))
        .route("/ws/display/", get(ws_handler))
}
