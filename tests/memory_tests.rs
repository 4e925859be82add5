//! Memory subsystem scenarios against live stores. These require Redis,
//! Qdrant and PostgreSQL running locally, so they are ignored by default.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use slovo_core::llm::{EmbeddingProvider, LlmError, EMBEDDING_DIMENSION};
use slovo_core::models::{
    MemoryKind, MemoryListRequest, MemoryResetRequest, MemorySource, StoreLocation, TurnRole,
    VerifierApproval, WriteRequest,
};
use slovo_core::EncryptionService;
use slovo_memory::{MemoryManager, PostgresRepository, QdrantRepository, RedisRepository};

/// Deterministic embedder so semantic writes work without a provider key.
struct HashEmbedder;

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let mut vector = vec![0.0f32; EMBEDDING_DIMENSION];
        for (i, byte) in text.bytes().enumerate() {
            vector[i % EMBEDDING_DIMENSION] += byte as f32 / 255.0;
        }
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        Ok(vector)
    }
}

async fn manager() -> MemoryManager {
    let encryption = Arc::new(EncryptionService::from_master_key(&[5u8; 32]).unwrap());

    let redis = Arc::new(
        RedisRepository::connect("redis://localhost:6379", Some(120))
            .await
            .expect("redis must be running"),
    );
    let qdrant = Arc::new(QdrantRepository::new(
        "http://localhost:6333",
        encryption.clone(),
    ));
    let postgres = Arc::new(
        PostgresRepository::connect("postgresql://localhost:5432/slovo_test", encryption)
            .await
            .expect("postgres must be running"),
    );

    MemoryManager::new(redis, qdrant, postgres, Some(Arc::new(HashEmbedder)))
}

fn write_request(kind: MemoryKind, content: &str, confidence: f64) -> WriteRequest {
    WriteRequest {
        memory_type: kind,
        content: content.to_string(),
        source: MemorySource::Verifier,
        confidence,
        conversation_id: Some("test-conversation".to_string()),
        metadata: HashMap::new(),
    }
}

fn approval(approved: bool, confidence: f64) -> VerifierApproval {
    VerifierApproval {
        approved,
        confidence,
        reason: "test".to_string(),
        adjusted_content: None,
    }
}

#[tokio::test]
#[ignore]
async fn rejected_writes_leave_stores_unchanged() {
    let manager = manager().await;
    manager
        .full_reset(&MemoryResetRequest {
            confirm_full_reset: true,
            preserve_user_profile: true,
        })
        .await;

    // Gate 1: verifier rejection.
    let result = manager
        .write_memory(
            &write_request(MemoryKind::Semantic, "user likes tea", 0.9),
            &approval(false, 0.9),
        )
        .await;
    assert!(!result.success);
    assert!(!result.verifier_approved);

    // Gate 2: strictly below the threshold.
    let result = manager
        .write_memory(
            &write_request(MemoryKind::Semantic, "user likes tea", 0.69),
            &approval(true, 0.9),
        )
        .await;
    assert!(!result.success);

    let listing = manager
        .list_memories(&MemoryListRequest::default())
        .await
        .unwrap();
    assert_eq!(listing.total_count, 0, "a rejected write must not persist");
}

#[tokio::test]
#[ignore]
async fn threshold_confidence_is_accepted_and_tracked() {
    let manager = manager().await;
    manager
        .full_reset(&MemoryResetRequest {
            confirm_full_reset: true,
            preserve_user_profile: true,
        })
        .await;

    // Exactly 0.7 passes.
    let result = manager
        .write_memory(
            &write_request(MemoryKind::Semantic, "user name is Alex", 0.7),
            &approval(true, 0.7),
        )
        .await;
    assert!(result.success, "error: {:?}", result.error);
    let memory_id = result.memory_id.unwrap();

    // Exactly one metadata row, pointing at the vector store.
    let listing = manager
        .list_memories(&MemoryListRequest::default())
        .await
        .unwrap();
    let rows: Vec<_> = listing.items.iter().filter(|m| m.id == memory_id).collect();
    assert_eq!(rows.len(), 1);

    let detail = manager.get_memory_detail(memory_id).await.unwrap().unwrap();
    assert_eq!(detail.store_location, StoreLocation::Vector);
    assert_eq!(detail.content, "user name is Alex");
}

#[tokio::test]
#[ignore]
async fn preference_upsert_is_idempotent() {
    let manager = manager().await;

    let request = WriteRequest {
        memory_type: MemoryKind::Preference,
        content: "units: metric".to_string(),
        source: MemorySource::Verifier,
        confidence: 0.9,
        conversation_id: None,
        metadata: HashMap::new(),
    };

    let first = manager
        .write_memory(&request, &approval(true, 0.9))
        .await;
    let second = manager
        .write_memory(&request, &approval(true, 0.9))
        .await;

    assert!(first.success && second.success);
    assert_eq!(first.memory_id, second.memory_id);
}

#[tokio::test]
#[ignore]
async fn retrieval_respects_token_limit_and_missing_conversation() {
    let manager = manager().await;

    for i in 0..20 {
        manager
            .store_turn(
                "budget-conversation",
                TurnRole::User,
                &format!("a reasonably long message number {i} about many topics"),
            )
            .await
            .unwrap();
    }

    let context = manager
        .retrieve_context("what did we discuss", Some("budget-conversation"), 100)
        .await;
    assert!(context.total_token_estimate <= 100);

    // No conversation id: the conversation section is empty and the rest
    // completes normally.
    let context = manager.retrieve_context("anything", None, 500).await;
    assert!(context.conversation_summary.is_empty());
}

#[tokio::test]
#[ignore]
async fn full_reset_is_idempotent_and_preserves_profile() {
    let manager = manager().await;

    manager
        .store_turn("reset-conversation", TurnRole::User, "hello")
        .await
        .unwrap();

    let first = manager
        .full_reset(&MemoryResetRequest {
            confirm_full_reset: true,
            preserve_user_profile: true,
        })
        .await;
    assert!(first.success);
    assert!(first.ephemeral_cleared && first.vector_cleared && first.durable_cleared);

    // Resetting an already clean system succeeds identically.
    let second = manager
        .full_reset(&MemoryResetRequest {
            confirm_full_reset: true,
            preserve_user_profile: true,
        })
        .await;
    assert!(second.success);

    let profile = manager.get_user_profile().await.unwrap();
    assert!(profile.memory_capture_enabled);

    let listing = manager
        .list_memories(&MemoryListRequest::default())
        .await
        .unwrap();
    assert_eq!(listing.total_count, 0);
}

#[tokio::test]
#[ignore]
async fn unconfirmed_reset_is_refused() {
    let manager = manager().await;
    let result = manager
        .full_reset(&MemoryResetRequest {
            confirm_full_reset: false,
            preserve_user_profile: true,
        })
        .await;
    assert!(!result.success);
    assert!(!result.ephemeral_cleared);
}
