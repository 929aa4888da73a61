pub mod config;
pub mod error;
pub mod metrics;
pub mod routes;
pub mod validation;

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::Request,
    http::{HeaderValue, Method},
    middleware::Next,
    response::Response,
    routing::{get, post},
    Router,
};
use llm_core::LlmClient;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};
use tts_core::SpeechPipeline;

use crate::config::ServerConfig;
use crate::metrics::AppMetrics;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<SpeechPipeline>,
    pub llm: Arc<LlmClient>,
    pub metrics: AppMetrics,
    pub config: ServerConfig,
    pub started: Instant,
}

impl AppState {
    pub fn new(pipeline: SpeechPipeline, llm: LlmClient, config: ServerConfig) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            llm: Arc::new(llm),
            metrics: AppMetrics::new(),
            config,
            started: Instant::now(),
        }
    }
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let methods = [Method::GET, Method::POST, Method::DELETE, Method::OPTIONS];
    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .flatten()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();

    if origins.is_empty() {
        warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (development mode)");
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(Any)
    } else {
        info!("CORS configured for {} origin(s)", origins.len());
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(methods)
            .allow_headers(Any)
    }
}

// Request ID middleware for tracing
async fn add_request_id(mut request: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let header = HeaderValue::from_str(&request_id).ok();
    if let Some(value) = &header {
        request.headers_mut().insert("x-request-id", value.clone());
    }
    let mut response = next.run(request).await;
    if let Some(value) = header {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Build the HTTP application.
pub fn app(state: AppState) -> Router {
    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(state.config.request_timeout()))
        .layer(cors_layer(&state.config))
        .into_inner();

    let api = Router::new()
        .route("/health", get(routes::health_check))
        .route("/voices", get(routes::list_voices))
        .route("/tts", post(routes::tts_endpoint))
        .route("/tts/stream", get(routes::tts_stream_ws))
        .route("/chat", post(routes::chat_endpoint))
        .route(
            "/chat/{id}/history",
            get(routes::chat_history).delete(routes::clear_chat_history),
        )
        .route("/metrics", get(routes::metrics_endpoint));

    Router::new()
        .merge(api.clone())
        .nest("/api", api)
        .layer(axum::middleware::from_fn(add_request_id))
        .layer(middleware_stack)
        .with_state(state)
}
