use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handler;
use crate::state::AppState;

/// Build the axum router with all Graft endpoints.
pub fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = state.config().max_request_size;
    Router::new()
        .route("/v1/health", get(handler::health_handler))
        .route("/v1/info", get(handler::info_handler))
        .route("/objects/:namespace", post(handler::upload_handler))
        .route(
            "/objects/:namespace/:hash/single",
            get(handler::single_handler),
        )
        .route("/api/getobjects/:namespace", post(handler::get_objects_handler))
        .route("/api/diff/:namespace", post(handler::diff_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
