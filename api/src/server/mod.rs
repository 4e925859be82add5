//! Server setup: router construction and the accept loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tracing::info;

use slovo_agents::Orchestrator;
use slovo_core::Settings;
use slovo_memory::MemoryManager;

use crate::handlers::{
    chat, chat_stream, delete_memory, get_conversation, get_memory, get_profile,
    health_check, list_memories, memory_health, reset_memory, update_memory,
    update_profile, ApiState,
};

/// Versioned path prefix for everything except the root health check.
const API_PREFIX: &str = "/api/v1";

pub struct ApiServer {
    settings: Settings,
    state: Arc<ApiState>,
}

impl ApiServer {
    pub fn new(
        settings: Settings,
        orchestrator: Arc<Orchestrator>,
        memory: Option<Arc<MemoryManager>>,
    ) -> Self {
        let state = Arc::new(ApiState {
            orchestrator,
            memory,
            version: settings.version.clone(),
            started_at: Instant::now(),
        });
        Self { settings, state }
    }

    pub fn router(&self) -> Router {
        let api = Router::new()
            // Chat
            .route("/chat", post(chat))
            .route("/chat/stream", post(chat_stream))
            .route("/conversation/:id", get(get_conversation))
            // Memory inspector
            .route("/memory", get(list_memories))
            .route("/memory/reset", post(reset_memory))
            .route("/memory/profile", get(get_profile).put(update_profile))
            .route("/memory/health", get(memory_health))
            .route(
                "/memory/:id",
                get(get_memory).put(update_memory).delete(delete_memory),
            );

        Router::new()
            .route("/health", get(health_check))
            .nest(API_PREFIX, api)
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Bind and serve until the process exits.
    pub async fn start(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.settings.host, self.settings.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid listen address: {e}"))?;

        info!("Slovo API server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, self.router())
            .await
            .map_err(|e| anyhow::anyhow!("API server failed: {e}"))?;

        Ok(())
    }
}
