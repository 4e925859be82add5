//! Memory write service.
//!
//! Writes are never automatic. Three gates, checked in order: the verifier
//! approved, the effective confidence clears the threshold, and the user
//! has not disabled memory capture. A rejected request leaves every store
//! untouched; a semantic write whose metadata insert fails is compensated
//! by deleting the vector point again.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use slovo_core::llm::EmbeddingProvider;
use slovo_core::models::{
    EpisodicActionType, EpisodicLogEntry, EpisodicMetadata, MemoryKind, MemoryMetadata,
    MemorySource, PreferenceSource, SemanticEntry, StoreLocation, VerifierApproval, WriteRequest,
    WriteResult,
};

use crate::postgres_store::PostgresRepository;
use crate::qdrant_store::QdrantRepository;

/// Minimum effective confidence for any persisted write.
pub const MIN_CONFIDENCE_THRESHOLD: f64 = 0.7;

const SEMANTIC_SUMMARY_MAX: usize = 500;
const METADATA_SUMMARY_MAX: usize = 200;

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("Embedding function not configured")]
    NoEmbeddingFunction,
    #[error("Preference key not provided")]
    MissingPreferenceKey,
}

pub struct MemoryWriter {
    qdrant: Arc<QdrantRepository>,
    postgres: Arc<PostgresRepository>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    confidence_threshold: f64,
}

impl MemoryWriter {
    pub fn new(
        qdrant: Arc<QdrantRepository>,
        postgres: Arc<PostgresRepository>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
    ) -> Self {
        Self {
            qdrant,
            postgres,
            embedder,
            confidence_threshold: MIN_CONFIDENCE_THRESHOLD,
        }
    }

    /// Write a memory entry under verifier approval.
    pub async fn write(&self, request: &WriteRequest, approval: &VerifierApproval) -> WriteResult {
        debug!(
            memory_type = request.memory_type.as_str(),
            approved = approval.approved,
            "Processing memory write request"
        );

        // Gate 1: verifier approval.
        if !approval.approved {
            info!(reason = %approval.reason, "Memory write rejected by verifier");
            return WriteResult::rejected(format!("Verifier rejected: {}", approval.reason), false);
        }

        // Gate 2: effective confidence. Exactly at the threshold passes.
        let effective_confidence = request.confidence.min(approval.confidence);
        if effective_confidence < self.confidence_threshold {
            info!(
                confidence = effective_confidence,
                threshold = self.confidence_threshold,
                "Memory write rejected: low confidence"
            );
            return WriteResult::rejected(
                format!(
                    "Confidence {:.2} below threshold {:.2}",
                    effective_confidence, self.confidence_threshold
                ),
                true,
            );
        }

        // Gate 3: user consent. Unreachable profile fails open for this
        // single-user local system.
        match self.postgres.get_user_profile().await {
            Ok(profile) if !profile.memory_capture_enabled => {
                info!("Memory write skipped: user disabled memory capture");
                return WriteResult::rejected("Memory capture is disabled by user", true);
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to check user profile: {e}"),
        }

        let content = approval
            .adjusted_content
            .clone()
            .unwrap_or_else(|| request.content.clone());

        match request.memory_type {
            MemoryKind::Semantic => {
                self.write_semantic(request, &content, effective_confidence)
                    .await
            }
            MemoryKind::Preference => {
                self.write_preference(request, &content, effective_confidence)
                    .await
            }
            MemoryKind::Episodic => {
                self.write_episodic(request, &content, effective_confidence)
                    .await
            }
        }
    }

    /// System-only entry point for inspector edits; synthesises an approval
    /// at the request's own confidence.
    pub async fn write_without_approval(&self, request: &WriteRequest) -> WriteResult {
        let approval = VerifierApproval {
            approved: true,
            confidence: request.confidence,
            reason: "System-level write (no verifier required)".to_string(),
            adjusted_content: None,
        };
        self.write(request, &approval).await
    }

    async fn write_semantic(
        &self,
        request: &WriteRequest,
        content: &str,
        confidence: f64,
    ) -> WriteResult {
        let Some(embedder) = &self.embedder else {
            return WriteResult::rejected(WriteError::NoEmbeddingFunction.to_string(), true);
        };

        let vector = match embedder.embed(content).await {
            Ok(vector) => vector,
            Err(e) => {
                error!("Failed to embed content: {e}");
                return WriteResult::rejected(e.to_string(), true);
            }
        };

        let memory_id = Uuid::new_v4();
        let entry = SemanticEntry {
            id: memory_id,
            vector,
            summary: truncate_chars(content, SEMANTIC_SUMMARY_MAX),
            source: request.source,
            confidence,
            conversation_id: request.conversation_id.clone(),
            tool_name: request.metadata.get("tool_name").cloned(),
            created_at: Utc::now(),
        };

        if let Err(e) = self.qdrant.store(&entry).await {
            error!("Failed to write semantic memory: {e}");
            return WriteResult::rejected(e.to_string(), true);
        }

        if let Err(e) = self
            .track(memory_id, request, content, confidence, StoreLocation::Vector)
            .await
        {
            // Keep the one-metadata-row-per-entry invariant: undo the
            // vector write.
            error!("Metadata insert failed, compensating vector write: {e}");
            if let Err(delete_err) = self.qdrant.delete(memory_id).await {
                error!("Compensation delete failed: {delete_err}");
            }
            return WriteResult::rejected(e.to_string(), true);
        }

        info!(memory_id = %memory_id, source = request.source.as_str(), "Semantic memory written");
        WriteResult {
            success: true,
            memory_id: Some(memory_id),
            memory_type: Some(MemoryKind::Semantic),
            error: None,
            verifier_approved: true,
        }
    }

    async fn write_preference(
        &self,
        request: &WriteRequest,
        content: &str,
        confidence: f64,
    ) -> WriteResult {
        // Key from metadata, else from "key:value" content.
        let (key, value) = match request.metadata.get("preference_key") {
            Some(key) => (key.clone(), content.to_string()),
            None => match content.split_once(':') {
                Some((key, value)) => (key.trim().to_string(), value.trim().to_string()),
                None => {
                    return WriteResult::rejected(
                        WriteError::MissingPreferenceKey.to_string(),
                        true,
                    )
                }
            },
        };

        let pref_source = if request.source == MemorySource::UserEdit {
            PreferenceSource::UserEdit
        } else {
            PreferenceSource::VerifierApproved
        };

        let preference = match self
            .postgres
            .set_preference(&key, &value, pref_source, confidence)
            .await
        {
            Ok(preference) => preference,
            Err(e) => {
                error!("Failed to write preference: {e}");
                return WriteResult::rejected(e.to_string(), true);
            }
        };

        let summary = format!("{key}: {}", truncate_chars(&value, 100));
        if let Err(e) = self
            .track(
                preference.id,
                request,
                &summary,
                confidence,
                StoreLocation::Durable,
            )
            .await
        {
            error!("Failed to track preference metadata: {e}");
            return WriteResult::rejected(e.to_string(), true);
        }

        info!(preference_id = %preference.id, key, "Preference written");
        WriteResult {
            success: true,
            memory_id: Some(preference.id),
            memory_type: Some(MemoryKind::Preference),
            error: None,
            verifier_approved: true,
        }
    }

    async fn write_episodic(
        &self,
        request: &WriteRequest,
        content: &str,
        confidence: f64,
    ) -> WriteResult {
        let memory_id = Uuid::new_v4();
        let action_type = request
            .metadata
            .get("action_type")
            .map(|s| EpisodicActionType::parse_or_default(s))
            .unwrap_or(EpisodicActionType::MemoryWritten);
        let agent = request
            .metadata
            .get("agent")
            .cloned()
            .unwrap_or_else(|| "unknown".to_string());
        let now = Utc::now();

        let entry = EpisodicLogEntry {
            id: memory_id,
            agent,
            action_type,
            summary: content.to_string(),
            confidence,
            metadata: EpisodicMetadata {
                conversation_id: request.conversation_id.clone(),
                step_index: request
                    .metadata
                    .get("step_index")
                    .and_then(|s| s.parse().ok()),
                tool_name: request.metadata.get("tool_name").cloned(),
                error_type: request.metadata.get("error_type").cloned(),
                correction_reason: request.metadata.get("correction_reason").cloned(),
            },
            occurred_at: now,
            created_at: now,
        };

        if let Err(e) = self.postgres.add_episodic_log(&entry).await {
            error!("Failed to write episodic log: {e}");
            return WriteResult::rejected(e.to_string(), true);
        }

        if let Err(e) = self
            .track(memory_id, request, content, confidence, StoreLocation::Durable)
            .await
        {
            error!("Failed to track episodic metadata: {e}");
            return WriteResult::rejected(e.to_string(), true);
        }

        info!(log_id = %memory_id, action_type = entry.action_type.as_str(), "Episodic log written");
        WriteResult {
            success: true,
            memory_id: Some(memory_id),
            memory_type: Some(MemoryKind::Episodic),
            error: None,
            verifier_approved: true,
        }
    }

    async fn track(
        &self,
        memory_id: Uuid,
        request: &WriteRequest,
        summary: &str,
        confidence: f64,
        store_location: StoreLocation,
    ) -> anyhow::Result<()> {
        let now = Utc::now();
        self.postgres
            .track_memory(&MemoryMetadata {
                id: memory_id,
                memory_type: request.memory_type,
                store_location,
                summary: truncate_chars(summary, METADATA_SUMMARY_MAX),
                source: request.source,
                confidence,
                is_deleted: false,
                created_at: now,
                updated_at: now,
            })
            .await
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("abcdef", 3), "abc");
        // Multi-byte characters must not be split.
        assert_eq!(truncate_chars("привет мир", 6), "привет");
    }

    #[test]
    fn effective_confidence_is_the_minimum() {
        // The gate math itself, without stores: min(request, approval).
        let request_confidence: f64 = 0.9;
        let approval_confidence: f64 = 0.7;
        let effective = request_confidence.min(approval_confidence);
        assert!(effective >= MIN_CONFIDENCE_THRESHOLD);

        let low: f64 = 0.69;
        assert!(low.min(request_confidence) < MIN_CONFIDENCE_THRESHOLD);
    }
}
