use axum::{
    extract::{DefaultBodyLimit, Request},
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::Span;

use super::handlers;
use crate::AppState;

/// Room for multipart boundaries and the small form fields next to the file.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub fn create_router(state: Arc<AppState>) -> Router {
    let upload_limit = state.config.max_upload_size as usize + MULTIPART_OVERHEAD;

    let mut router = Router::new()
        // Files (authenticated)
        .route(
            "/api/files/upload",
            post(handlers::upload_file).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/api/files", get(handlers::list_files))
        .route("/api/files/search", get(handlers::search_files))
        .route("/api/files/share/:id", get(handlers::share_file))
        .route("/api/files/:id", delete(handlers::delete_file))
        // Public share links
        .route("/api/files/shared/:token", get(handlers::get_shared_file))
        .route("/health", get(handlers::health));

    // Signed blob links exist only when this process serves the bytes itself
    if state.local_links.is_some() {
        router = router.route("/blobs/:key", get(handlers::serve_blob));
    }

    router
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
        .with_state(state)
}

/// Request span with a per-request id, so compensation and cleanup logs
/// emitted under it can be tied back to the request.
fn request_span(req: &Request) -> Span {
    tracing::info_span!(
        "request",
        request_id = %uuid::Uuid::new_v4(),
        method = %req.method(),
        uri = %req.uri().path(),
    )
}
