//! Web server setup and routing

use anyhow::Result;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::info;

use crate::api;
use crate::config::StoreKind;
use crate::state::{AppState, LIBRARY_PREFIX};
use crate::ws;

/// Largest model accepted by the upload route
const MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

pub fn router(state: Arc<AppState>) -> Router {
    let mut app = Router::new()
        // View state and library
        .route("/api/state", get(api::get_state))
        .route("/api/library", get(api::get_library))
        .route("/api/library/refresh", post(api::refresh_library))
        .route("/api/metadata/refresh", post(api::refresh_metadata))
        // Viewer controls
        .route(
            "/api/upload",
            post(api::upload).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/api/select", post(api::select))
        .route("/api/ar", post(api::view_in_ar))
        .route("/api/narration/toggle", post(api::toggle_narration))
        .route("/api/narration/finished", post(api::narration_finished))
        .route("/api/lighting/ambient", put(api::set_ambient))
        .route("/api/lighting/directional", put(api::set_directional))
        .route("/api/lighting/spot", put(api::set_spot))
        .route("/api/lighting/mode", put(api::set_mode))
        // Browser answers for the client bridge
        .route("/api/xr/capability", post(api::xr_capability))
        .route("/api/xr/session", post(api::xr_session))
        .route("/api/xr/session/{id}/end", post(api::xr_session_end))
        // WebSocket for state pushes and client commands
        .route("/ws", get(ws::websocket_handler))
        // Uploaded models
        .route("/blobs/{id}", get(api::get_blob));

    if state.config.store.kind == StoreKind::Directory {
        app = app.nest_service(LIBRARY_PREFIX, ServeDir::new(&state.config.store.directory));
    }

    app
        // Static frontend - must be fallback for root
        .fallback_service(ServeDir::new(&state.config.daemon.static_dir))
        // CORS
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        // State
        .with_state(state)
}

/// Serve until `shutdown` resolves
pub async fn run(
    state: Arc<AppState>,
    bind: &str,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(address = %bind, protocol = "HTTP", "Starting web server");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
