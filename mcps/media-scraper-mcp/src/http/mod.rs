//! HTTP front door for the hosted UI
//!
//! REST endpoints under `/api` plus static serving of the storage tree
//! under `/storage`.

pub mod api;
pub mod state;

use std::future::Future;
use std::net::SocketAddr;

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Bind and serve until `shutdown` resolves
pub async fn serve(state: AppState, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
    state.dispatcher.storage().ensure_layout().await?;

    let addr = SocketAddr::from(([0, 0, 0, 0], state.port));
    let app = create_router(state);

    tracing::info!("Starting HTTP server on http://localhost:{}", addr.port());
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

/// Create the router with all routes
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/status", get(api::status))
        // Search
        .route("/search/video", post(api::search_video))
        .route("/search/image", post(api::search_image))
        .route("/search/music", post(api::search_music))
        .route("/search/media", post(api::search_media))
        // Downloads
        .route("/download", post(api::download))
        .route("/ytdlp", post(api::ytdlp_download))
        .route("/ytdlp/info", post(api::ytdlp_info))
        // Files
        .route("/files/:type", get(api::list_files))
        .route("/files/:type/:filename", axum::routing::delete(api::delete_file));

    let storage = ServeDir::new(state.dispatcher.storage().root());

    Router::new()
        .nest("/api", api_routes)
        .nest_service("/storage", storage)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
