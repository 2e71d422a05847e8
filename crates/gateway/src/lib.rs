//! HTTP gateway for reasonflow.
//!
//! Exposes an OpenAI-compatible chat endpoint backed by the reasoning loop,
//! plus a health check. Conversations are kept in memory, keyed by
//! `conversation_id`.
//!
//! Built on Axum.

pub mod chat;

use axum::extract::DefaultBodyLimit;
use axum::{
    Router,
    http::HeaderValue,
    response::Json,
    routing::{get, post},
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tracing::info;

use reasonflow_agent::ReasoningLoop;
use reasonflow_config::AppConfig;
use reasonflow_core::message::Conversation;

/// Maximum number of in-memory conversations before oldest are evicted.
const MAX_CONVERSATIONS: usize = 1_000;

/// Shared state for the gateway.
pub struct GatewayState {
    pub reasoning: Arc<ReasoningLoop>,
    pub model: String,
    pub min_flush_size: usize,
    pub conversations: RwLock<HashMap<String, Conversation>>,
}

pub type SharedState = Arc<GatewayState>;

impl GatewayState {
    pub fn new(reasoning: Arc<ReasoningLoop>, model: impl Into<String>, min_flush_size: usize) -> Self {
        Self {
            reasoning,
            model: model.into(),
            min_flush_size,
            conversations: RwLock::new(HashMap::new()),
        }
    }

    /// Store a conversation, evicting the oldest when at capacity.
    pub async fn store(&self, conversation: Conversation) {
        let id = conversation.id.to_string();
        let mut conversations = self.conversations.write().await;

        if conversations.len() >= MAX_CONVERSATIONS && !conversations.contains_key(&id) {
            if let Some(oldest_key) = conversations
                .iter()
                .min_by_key(|(_, c)| c.created_at)
                .map(|(k, _)| k.clone())
            {
                conversations.remove(&oldest_key);
            }
        }

        conversations.insert(id, conversation);
    }
}

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("http://localhost:8080"))
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers([axum::http::header::CONTENT_TYPE])
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/chat/completions", post(chat::chat_completions_handler))
        .with_state(state)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let router = reasonflow_providers::build_from_config(&config)?;
    let provider = router
        .default_provider()
        .ok_or_else(|| format!("provider '{}' is not configured", config.default_provider))?;
    let tools = reasonflow_tools::default_registry(&config.tools).map(Arc::new);

    let reasoning = Arc::new(ReasoningLoop::from_config(provider, tools, &config));
    let state = Arc::new(GatewayState::new(
        reasoning,
        &config.default_model,
        config.reasoning.min_flush_size,
    ));

    let app = build_router(state);

    info!(addr = %addr, model = %config.default_model, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
