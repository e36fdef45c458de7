use axum::Router;

use crate::state::SharedState;

pub mod common;
pub mod docs;
pub mod internal;
pub mod metrics;
pub mod snapshot;
pub mod status;
pub mod websocket;

/// Compose all route trees, wiring in shared state and documentation routes.
pub fn router(state: SharedState) -> Router<()> {
    let api_router = status::router()
        .merge(snapshot::router())
        .merge(websocket::router())
        .merge(metrics::router())
        .merge(internal::router());

    let docs_router = docs::router(state.clone());

    api_router.merge(docs_router).with_state(state)
}
