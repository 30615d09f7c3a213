//! HTTP and WebSocket server
//!
//! - `GET /api/connections`: active connections
//! - `GET|POST /api/connections/:webrtc_id/input-data`: test input
//! - `GET /ws`: media and control transport

pub mod api;
pub mod wire;
pub mod ws;

use crate::config::AppConfig;
use crate::encode::video::VideoSinkFactory;
use crate::session::ConnectionRegistry;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info_span;

/// State shared by every route
pub struct ServerState {
    pub config: Arc<AppConfig>,
    pub video_sinks: Arc<dyn VideoSinkFactory>,
    pub registry: ConnectionRegistry,
}

impl ServerState {
    pub fn new(config: Arc<AppConfig>, video_sinks: Arc<dyn VideoSinkFactory>) -> Self {
        Self {
            config,
            video_sinks,
            registry: ConnectionRegistry::new(),
        }
    }
}

pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/api/connections", get(api::list_connections))
        .route(
            "/api/connections/:webrtc_id/input-data",
            get(api::get_input_data).post(api::set_input_data),
        )
        .route("/ws", get(ws::ws_upgrade))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<axum::body::Body>| {
                    info_span!("request", method = %req.method(), uri = %req.uri())
                }),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until the process is stopped
pub async fn serve(state: Arc<ServerState>) -> anyhow::Result<()> {
    let addr = state.config.bind_addr;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("listening on http://{}", addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}
