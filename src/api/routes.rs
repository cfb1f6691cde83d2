//! Console route definitions.

use axum::{
    Router,
    routing::{delete, get, post},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use super::handlers;
use super::state::AppState;

/// Create the console router.
pub fn create_router(state: AppState) -> Router {
    // The console binds to loopback; CORS stays permissive so a local
    // frontend served from another port can reach it.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::DEBUG));

    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/conversations",
            get(handlers::list_conversations).delete(handlers::clear_all_conversations),
        )
        .route(
            "/conversations/{peer}/messages",
            get(handlers::get_messages),
        )
        .route(
            "/conversations/{peer}",
            delete(handlers::clear_conversation),
        )
        .route("/calls", get(handlers::list_calls))
        .route("/replies", get(handlers::list_replies))
        .route(
            "/config",
            get(handlers::get_config).put(handlers::update_config),
        )
        .route("/config/test", post(handlers::test_config))
        .layer(cors)
        .layer(trace_layer)
        .with_state(state)
}
