//! Request handlers for the HTTP surface.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::Json;
use futures::stream::Stream;
use uuid::Uuid;

use slovo_agents::Orchestrator;
use slovo_core::models::{
    MemoryDetailResponse, MemoryKind, MemoryListRequest, MemoryListResponse,
    MemoryResetRequest, MemoryResetResponse, MemorySource, MemoryUpdateRequest, UserProfile,
};
use slovo_memory::{MemoryHealth, MemoryManager};

use crate::models::{
    ChatRequest, ChatResponse, ConversationHistoryResponse, ConversationMessage,
    HealthResponse, MemoryDeleteRequest, MemoryListQuery, ProfileUpdateRequest,
    SuccessResponse,
};

/// Shared state handed to every handler.
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
    pub memory: Option<Arc<MemoryManager>>,
    pub version: String,
    pub started_at: Instant,
}

impl ApiState {
    fn memory(&self) -> Result<&Arc<MemoryManager>, StatusCode> {
        self.memory.as_ref().ok_or(StatusCode::SERVICE_UNAVAILABLE)
    }
}

// =============================================================================
// Health
// =============================================================================

pub async fn health_check(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: state.version.clone(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

// =============================================================================
// Chat
// =============================================================================

pub async fn chat(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<ChatRequest>,
) -> Json<ChatResponse> {
    tracing::info!(message_length = request.message.len(), "Chat request received");

    let conversation_id = request
        .conversation_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let result = state
        .orchestrator
        .process_message(&request.message, &conversation_id)
        .await;

    Json(ChatResponse {
        id: Uuid::new_v4().to_string(),
        response: result.response,
        conversation_id,
        reasoning: result.reasoning,
    })
}

/// Streamed variant: the completed response is re-emitted word by word.
pub async fn chat_stream(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<ChatRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    tracing::info!(
        message_length = request.message.len(),
        "Chat stream request received"
    );

    let conversation_id = request
        .conversation_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let result = state
        .orchestrator
        .process_message(&request.message, &conversation_id)
        .await;

    let words: Vec<String> = result
        .response
        .split_whitespace()
        .map(str::to_string)
        .collect();

    let stream = async_stream::stream! {
        for (i, word) in words.into_iter().enumerate() {
            let chunk = if i > 0 {
                format!(" {word}")
            } else {
                word
            };
            yield Ok(Event::default().data(chunk));
        }
    };

    Sse::new(stream)
}

pub async fn get_conversation(
    State(state): State<Arc<ApiState>>,
    Path(conversation_id): Path<String>,
) -> Result<Json<ConversationHistoryResponse>, StatusCode> {
    let memory = state.memory()?;

    let turns = memory
        .get_recent_turns(&conversation_id, 100)
        .await
        .map_err(|e| {
            tracing::error!("Failed to fetch conversation: {e}");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(ConversationHistoryResponse {
        conversation_id,
        messages: turns
            .into_iter()
            .map(|turn| ConversationMessage {
                role: turn.role.as_str().to_string(),
                content: turn.content,
                timestamp: turn.timestamp,
            })
            .collect(),
    }))
}

// =============================================================================
// Memory inspector
// =============================================================================

pub async fn list_memories(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<MemoryListQuery>,
) -> Result<Json<MemoryListResponse>, StatusCode> {
    let memory = state.memory()?;

    let request = MemoryListRequest {
        memory_type: query.memory_type.as_deref().and_then(MemoryKind::parse),
        source: query.source.as_deref().and_then(MemorySource::parse),
        include_deleted: query.include_deleted,
        limit: query.limit,
        offset: query.offset,
    };

    memory.list_memories(&request).await.map(Json).map_err(|e| {
        tracing::error!("Failed to list memories: {e}");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

pub async fn get_memory(
    State(state): State<Arc<ApiState>>,
    Path(memory_id): Path<Uuid>,
) -> Result<Json<MemoryDetailResponse>, StatusCode> {
    let memory = state.memory()?;

    match memory.get_memory_detail(memory_id).await {
        Ok(Some(detail)) => Ok(Json(detail)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("Failed to fetch memory detail: {e}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub async fn update_memory(
    State(state): State<Arc<ApiState>>,
    Path(memory_id): Path<Uuid>,
    Json(update): Json<MemoryUpdateRequest>,
) -> Result<Json<SuccessResponse>, StatusCode> {
    let memory = state.memory()?;

    match memory.update_memory(memory_id, &update).await {
        Ok(true) => Ok(Json(SuccessResponse { success: true })),
        // Distinguish an absent id (404) from an entry that refused the
        // update, e.g. an immutable episodic log.
        Ok(false) => match memory.get_memory_detail(memory_id).await {
            Ok(Some(_)) => Ok(Json(SuccessResponse { success: false })),
            Ok(None) => Err(StatusCode::NOT_FOUND),
            Err(e) => {
                tracing::error!("Failed to check memory existence: {e}");
                Err(StatusCode::INTERNAL_SERVER_ERROR)
            }
        },
        Err(e) => {
            tracing::error!("Failed to update memory: {e}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub async fn delete_memory(
    State(state): State<Arc<ApiState>>,
    Path(memory_id): Path<Uuid>,
    Json(request): Json<MemoryDeleteRequest>,
) -> Result<Json<SuccessResponse>, StatusCode> {
    if !request.confirm {
        return Err(StatusCode::BAD_REQUEST);
    }
    let memory = state.memory()?;

    match memory.delete_memory(memory_id).await {
        Ok(true) => Ok(Json(SuccessResponse { success: true })),
        Ok(false) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("Failed to delete memory: {e}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub async fn reset_memory(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<MemoryResetRequest>,
) -> Result<Json<MemoryResetResponse>, StatusCode> {
    if !request.confirm_full_reset {
        return Err(StatusCode::BAD_REQUEST);
    }
    let memory = state.memory()?;

    Ok(Json(memory.full_reset(&request).await))
}

// =============================================================================
// Profile
// =============================================================================

pub async fn get_profile(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<UserProfile>, StatusCode> {
    let memory = state.memory()?;

    memory.get_user_profile().await.map(Json).map_err(|e| {
        tracing::error!("Failed to fetch profile: {e}");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

pub async fn update_profile(
    State(state): State<Arc<ApiState>>,
    Json(update): Json<ProfileUpdateRequest>,
) -> Result<Json<UserProfile>, StatusCode> {
    let memory = state.memory()?;

    memory
        .update_user_profile(
            update.preferred_languages,
            update.communication_style,
            update.privacy_level,
            update.memory_capture_enabled,
        )
        .await
        .map(Json)
        .map_err(|e| {
            tracing::error!("Failed to update profile: {e}");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

// =============================================================================
// Memory health
// =============================================================================

pub async fn memory_health(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<MemoryHealth>, StatusCode> {
    let memory = state.memory()?;
    Ok(Json(memory.health_check().await))
}
