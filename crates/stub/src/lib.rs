pub mod api;
pub mod demo;
pub mod error;
pub mod state;
pub mod ws;

use axum::{
    routing::{get, post, put},
    Router,
};
use state::StubState;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Routes:
/// - `GET  /health`
/// - `GET  /api/runs/{id}/status`
/// - `POST /api/runs/{id}/confirm-action`
/// - `PUT  /api/runs/{id}`
/// - `GET  /ws/runs/{id}?token=`
pub fn app(state: StubState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/runs/{id}", put(api::put_run))
        .route("/api/runs/{id}/status", get(api::get_status))
        .route("/api/runs/{id}/confirm-action", post(api::confirm_action))
        .route("/ws/runs/{id}", get(ws::ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
