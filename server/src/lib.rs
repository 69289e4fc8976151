pub mod config;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod session;
pub mod validation;

use std::sync::Arc;

use axum::{
    extract::{State, WebSocketUpgrade},
    http::{HeaderValue, Method},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tts_core::SynthesisGateway;

use crate::config::SessionSettings;
use crate::metrics::{MetricsSnapshot, SessionMetrics};

#[derive(Clone)]
pub struct AppState {
    pub gateway: SynthesisGateway,
    pub settings: Arc<SessionSettings>,
    pub metrics: Arc<SessionMetrics>,
}

impl AppState {
    pub fn new(gateway: SynthesisGateway, settings: SessionSettings) -> Self {
        Self {
            gateway,
            settings: Arc::new(settings),
            metrics: SessionMetrics::new(),
        }
    }
}

/// Build the application router
pub fn build_router(state: AppState, cors_allowed_origins: Option<&[String]>) -> Router {
    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(cors_allowed_origins))
        .into_inner();

    Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(health_check))
        .route("/metrics", get(metrics_endpoint))
        .route("/tts-stream", get(tts_stream))
        .layer(middleware_stack)
        .with_state(state)
}

/// CORS configuration - environment-aware
pub fn cors_layer(allowed_origins: Option<&[String]>) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any)
        .allow_credentials(false);

    let Some(allowed_origins) = allowed_origins else {
        // Development: Allow all origins (with warning)
        warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (development mode)");
        return base.allow_origin(Any);
    };

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();

    if origins.is_empty() {
        warn!("CORS_ALLOWED_ORIGINS is empty, falling back to permissive CORS");
        base.allow_origin(Any)
    } else {
        info!("CORS configured for {} origin(s)", origins.len());
        base.allow_origin(AllowOrigin::list(origins))
    }
}

pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

pub async fn tts_stream(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    // Leave room for the voice reference plus framing overhead
    let max_message = state.settings.max_voice_reference_bytes.saturating_add(64 * 1024);
    ws.max_message_size(max_message)
        .on_upgrade(move |socket| {
            session::handle_socket(socket, state.gateway, state.settings, state.metrics)
        })
}
