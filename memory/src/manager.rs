//! Memory manager: single facade over the three stores, the retrieval
//! pipeline and the write service. Aggregates but owns nothing; each entry
//! is owned by its physical store, with the durable store holding the
//! metadata index.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info, warn};
use uuid::Uuid;

use slovo_core::llm::EmbeddingProvider;
use slovo_core::models::{
    ConversationTurn, MemoryContext, MemoryDetailResponse, MemoryKind, MemoryListItem,
    MemoryListRequest, MemoryListResponse, MemoryResetRequest, MemoryResetResponse,
    MemoryUpdateRequest, RetrievalRequest, StoreLocation, TurnRole, UserProfile,
    VerifierApproval, WriteRequest, WriteResult,
};

use crate::postgres_store::PostgresRepository;
use crate::qdrant_store::QdrantRepository;
use crate::redis_store::RedisRepository;
use crate::retrieval::RetrievalPipeline;
use crate::writer::MemoryWriter;

/// Health of the three stores.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MemoryHealth {
    pub ephemeral: bool,
    pub vector: bool,
    pub durable: bool,
}

pub struct MemoryManager {
    redis: Arc<RedisRepository>,
    qdrant: Arc<QdrantRepository>,
    postgres: Arc<PostgresRepository>,
    retrieval: RetrievalPipeline,
    writer: MemoryWriter,
}

impl MemoryManager {
    pub fn new(
        redis: Arc<RedisRepository>,
        qdrant: Arc<QdrantRepository>,
        postgres: Arc<PostgresRepository>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
    ) -> Self {
        let retrieval = RetrievalPipeline::new(
            redis.clone(),
            qdrant.clone(),
            postgres.clone(),
            embedder.clone(),
        );
        let writer = MemoryWriter::new(qdrant.clone(), postgres.clone(), embedder);

        info!("Memory manager initialized");
        Self {
            redis,
            qdrant,
            postgres,
            retrieval,
            writer,
        }
    }

    // =========================================================================
    // Retrieval
    // =========================================================================

    /// Token-budgeted context bundle for prompt injection.
    pub async fn retrieve_context(
        &self,
        user_message: &str,
        conversation_id: Option<&str>,
        token_limit: usize,
    ) -> MemoryContext {
        let request = RetrievalRequest {
            user_message: user_message.to_string(),
            conversation_id: conversation_id.map(str::to_string),
            token_limit,
            ..RetrievalRequest::new("")
        };
        self.retrieval.retrieve(&request).await
    }

    // =========================================================================
    // Conversation turns
    // =========================================================================

    pub async fn store_turn(
        &self,
        conversation_id: &str,
        role: TurnRole,
        content: &str,
    ) -> Result<()> {
        let turn = ConversationTurn::new(role, content);
        self.redis.add_turn(conversation_id, &turn).await
    }

    pub async fn get_recent_turns(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>> {
        self.redis.get_recent_turns(conversation_id, limit).await
    }

    pub async fn clear_conversation_turns(&self, conversation_id: &str) -> Result<bool> {
        self.redis.clear_conversation(conversation_id).await
    }

    // =========================================================================
    // Writes
    // =========================================================================

    pub async fn write_memory(
        &self,
        request: &WriteRequest,
        approval: &VerifierApproval,
    ) -> WriteResult {
        self.writer.write(request, approval).await
    }

    /// Direct write for inspector edits; bypasses the verifier only.
    pub async fn write_memory_direct(&self, request: &WriteRequest) -> WriteResult {
        self.writer.write_without_approval(request).await
    }

    // =========================================================================
    // Profile
    // =========================================================================

    pub async fn get_user_profile(&self) -> Result<UserProfile> {
        self.postgres.get_user_profile().await
    }

    pub async fn update_user_profile(
        &self,
        preferred_languages: Option<Vec<String>>,
        communication_style: Option<String>,
        privacy_level: Option<String>,
        memory_capture_enabled: Option<bool>,
    ) -> Result<UserProfile> {
        self.postgres
            .update_user_profile(
                preferred_languages,
                communication_style,
                privacy_level,
                memory_capture_enabled,
            )
            .await
    }

    // =========================================================================
    // Inspector
    // =========================================================================

    pub async fn list_memories(&self, request: &MemoryListRequest) -> Result<MemoryListResponse> {
        let limit = request.limit.unwrap_or(50);
        let offset = request.offset.unwrap_or(0);

        let (metadata, total) = self
            .postgres
            .list_memory_metadata(
                request.memory_type,
                request.source,
                request.include_deleted,
                limit,
                offset,
            )
            .await?;

        let items = metadata
            .into_iter()
            .map(|m| MemoryListItem {
                id: m.id,
                memory_type: m.memory_type,
                summary: m.summary,
                source: m.source,
                confidence: m.confidence,
                created_at: m.created_at,
                is_deleted: m.is_deleted,
            })
            .collect();

        Ok(MemoryListResponse {
            items,
            total_count: total,
            limit,
            offset,
        })
    }

    pub async fn get_memory_detail(&self, memory_id: Uuid) -> Result<Option<MemoryDetailResponse>> {
        let Some(metadata) = self.postgres.get_memory_metadata(memory_id).await? else {
            return Ok(None);
        };

        let mut content = String::new();
        let mut extra: HashMap<String, String> = HashMap::new();

        match metadata.store_location {
            StoreLocation::Vector => {
                if let Some(entry) = self.qdrant.get(memory_id).await? {
                    content = entry.summary;
                    if let Some(conversation_id) = entry.conversation_id {
                        extra.insert("conversation_id".to_string(), conversation_id);
                    }
                    if let Some(tool_name) = entry.tool_name {
                        extra.insert("tool_name".to_string(), tool_name);
                    }
                }
            }
            StoreLocation::Durable => match metadata.memory_type {
                MemoryKind::Preference => {
                    for preference in self.postgres.list_preferences().await? {
                        if preference.id == memory_id {
                            content = format!("{}: {}", preference.key, preference.value);
                            extra.insert("preference_key".to_string(), preference.key);
                            break;
                        }
                    }
                }
                MemoryKind::Episodic => {
                    if let Some(log) = self.postgres.get_episodic_log(memory_id).await? {
                        content = log.summary;
                        extra.insert("agent".to_string(), log.agent);
                        extra.insert(
                            "action_type".to_string(),
                            log.action_type.as_str().to_string(),
                        );
                    }
                }
                MemoryKind::Semantic => {}
            },
            StoreLocation::Ephemeral => {}
        }

        Ok(Some(MemoryDetailResponse {
            id: metadata.id,
            memory_type: metadata.memory_type,
            content,
            summary: metadata.summary,
            source: metadata.source,
            confidence: metadata.confidence,
            store_location: metadata.store_location,
            created_at: metadata.created_at,
            updated_at: metadata.updated_at,
            metadata: extra,
        }))
    }

    /// Update an entry in its physical store. Episodic entries are
    /// immutable and reject updates.
    pub async fn update_memory(
        &self,
        memory_id: Uuid,
        update: &MemoryUpdateRequest,
    ) -> Result<bool> {
        let Some(mut metadata) = self.postgres.get_memory_metadata(memory_id).await? else {
            return Ok(false);
        };

        match (metadata.store_location, metadata.memory_type) {
            (StoreLocation::Vector, _) => {
                let updated = self
                    .qdrant
                    .update(memory_id, update.content.as_deref(), update.confidence)
                    .await?;
                if updated {
                    if let Some(content) = &update.content {
                        metadata.summary = content.chars().take(200).collect();
                    }
                    if let Some(confidence) = update.confidence {
                        metadata.confidence = confidence;
                    }
                    self.postgres.track_memory(&metadata).await?;
                }
                Ok(updated)
            }
            (StoreLocation::Durable, MemoryKind::Preference) => {
                let Some(content) = &update.content else {
                    return Ok(false);
                };
                let Some((key, value)) = content.split_once(':') else {
                    return Ok(false);
                };
                self.postgres
                    .set_preference(
                        key.trim(),
                        value.trim(),
                        slovo_core::models::PreferenceSource::UserEdit,
                        update.confidence.unwrap_or(metadata.confidence),
                    )
                    .await?;
                Ok(true)
            }
            // Episodic logs are immutable.
            (StoreLocation::Durable, MemoryKind::Episodic) => Ok(false),
            _ => Ok(false),
        }
    }

    /// Delete an entry. Semantic entries are removed from the vector
    /// store; preferences are unset; episodic entries are only hidden via
    /// the metadata soft-delete flag, keeping their audit trail.
    pub async fn delete_memory(&self, memory_id: Uuid) -> Result<bool> {
        let Some(metadata) = self.postgres.get_memory_metadata(memory_id).await? else {
            return Ok(false);
        };

        match (metadata.store_location, metadata.memory_type) {
            (StoreLocation::Vector, _) => {
                self.qdrant.delete(memory_id).await?;
            }
            (StoreLocation::Durable, MemoryKind::Preference) => {
                if let Some(detail) = self.get_memory_detail(memory_id).await? {
                    if let Some(key) = detail.metadata.get("preference_key") {
                        self.postgres.delete_preference(key).await?;
                    }
                }
            }
            _ => {}
        }

        self.postgres.soft_delete_memory(memory_id).await
    }

    // =========================================================================
    // Full reset
    // =========================================================================

    /// Clear ephemeral, vector and durable stores in that order. Each step
    /// is independent; aggregate success requires all three.
    pub async fn full_reset(&self, request: &MemoryResetRequest) -> MemoryResetResponse {
        if !request.confirm_full_reset {
            return MemoryResetResponse {
                success: false,
                ephemeral_cleared: false,
                vector_cleared: false,
                durable_cleared: false,
                error: Some("Reset not confirmed".to_string()),
            };
        }

        warn!("Starting full memory reset");
        let mut errors: Vec<String> = Vec::new();

        let ephemeral_cleared = match self.redis.clear_all().await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to clear ephemeral store: {e}");
                errors.push(format!("ephemeral: {e}"));
                false
            }
        };

        let vector_cleared = match self.qdrant.clear_all().await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to clear vector store: {e}");
                errors.push(format!("vector: {e}"));
                false
            }
        };

        let durable_cleared = match self
            .postgres
            .clear_all(request.preserve_user_profile)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to clear durable store: {e}");
                errors.push(format!("durable: {e}"));
                false
            }
        };

        let success = ephemeral_cleared && vector_cleared && durable_cleared;
        if success {
            warn!("Full memory reset completed");
        } else {
            error!("Full memory reset completed with errors: {:?}", errors);
        }

        MemoryResetResponse {
            success,
            ephemeral_cleared,
            vector_cleared,
            durable_cleared,
            error: if errors.is_empty() {
                None
            } else {
                Some(errors.join("; "))
            },
        }
    }

    // =========================================================================
    // Health
    // =========================================================================

    pub async fn health_check(&self) -> MemoryHealth {
        let (ephemeral, vector, durable) = tokio::join!(
            self.redis.health_check(),
            self.qdrant.health_check(),
            self.postgres.health_check(),
        );
        MemoryHealth {
            ephemeral,
            vector,
            durable,
        }
    }
}
