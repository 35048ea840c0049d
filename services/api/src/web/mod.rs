pub mod middleware;
pub mod protocol;
pub mod rest;
pub mod state;
pub mod ws_handler;

pub use middleware::require_patient;
pub use rest::ApiDoc;
pub use state::AppState;
pub use ws_handler::ws_handler;

use axum::{
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, put},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Builds the API router (without CORS or Swagger UI, which the binary adds).
///
/// `/health`, `/audio/{clip_id}` and `/video/placeholder` are public so media
/// elements can load them directly. Everything else requires the patient header.
pub fn router(state: Arc<AppState>) -> Router {
    // Base64 inflates images by 4/3; leave headroom for the JSON envelope.
    let body_limit = state.config.max_image_bytes / 3 * 4 + 64 * 1024;

    let public_routes = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/audio/{clip_id}", get(rest::get_audio_handler))
        .route("/video/placeholder", get(rest::video_placeholder_handler));

    let protected_routes = Router::new()
        .route(
            "/sessions",
            get(rest::list_sessions_handler).post(rest::create_session_handler),
        )
        .route(
            "/sessions/{id}",
            get(rest::get_session_handler)
                .patch(rest::rename_session_handler)
                .delete(rest::delete_session_handler),
        )
        .route(
            "/video/conversations",
            axum::routing::post(rest::create_video_handler),
        )
        .route(
            "/video/conversations/{id}",
            axum::routing::delete(rest::end_video_handler),
        )
        .route(
            "/video/conversations/{id}/context",
            put(rest::update_video_context_handler),
        )
        .route("/ws", get(ws_handler))
        .layer(axum_middleware::from_fn(require_patient));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
