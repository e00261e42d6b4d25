//! Router configuration for the HTTP service.

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::AppState;

/// Multipart framing on top of the file itself.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Create the main router with all routes.
pub fn create_router(state: AppState) -> Router {
    let body_limit = state.service.settings().max_upload_bytes + MULTIPART_OVERHEAD_BYTES;

    Router::new()
        // Documents
        .route("/api/files/process", post(handlers::process_file))
        .route("/api/files/list", get(handlers::list_files))
        .route("/api/files/delete", delete(handlers::delete_file))
        .route("/api/files/:id/resume", post(handlers::resume_file))
        // Flashcards
        .route(
            "/api/flashcards",
            get(handlers::list_flashcards)
                .patch(handlers::update_flashcard)
                .delete(handlers::delete_flashcard),
        )
        .route("/api/flashcards/reorder", post(handlers::reorder_flashcards))
        .route("/api/flashcards/:id/review", post(handlers::review_flashcard))
        // Learning paths
        .route(
            "/api/paths",
            get(handlers::list_paths).post(handlers::create_path),
        )
        .route("/api/paths/next", get(handlers::next_path))
        // Signed object downloads
        .route("/objects/*key", get(handlers::serve_object))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
