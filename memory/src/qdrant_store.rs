//! Qdrant repository for long-term semantic memory.
//!
//! Single collection `semantic_memory` under cosine similarity, reached
//! over the Qdrant HTTP API. Summaries are encrypted before they enter a
//! point payload and decrypted on every read; a payload that no longer
//! decrypts fails the call rather than being skipped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use slovo_core::llm::EMBEDDING_DIMENSION;
use slovo_core::models::{MemorySource, SemanticEntry, SemanticSearchResult};
use slovo_core::EncryptionService;

pub const COLLECTION_NAME: &str = "semantic_memory";

pub struct QdrantRepository {
    client: Client,
    base_url: String,
    encryption: Arc<EncryptionService>,
    vector_size: usize,
    collection_ready: AtomicBool,
}

impl QdrantRepository {
    pub fn new(base_url: &str, encryption: Arc<EncryptionService>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            encryption,
            vector_size: EMBEDDING_DIMENSION,
            collection_ready: AtomicBool::new(false),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Create the collection on first use.
    async fn ensure_collection(&self) -> Result<()> {
        if self.collection_ready.load(Ordering::Acquire) {
            return Ok(());
        }

        let info = self
            .client
            .get(self.url(&format!("/collections/{COLLECTION_NAME}")))
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Qdrant unreachable: {e}"))?;

        if info.status() == reqwest::StatusCode::NOT_FOUND {
            let body = json!({
                "vectors": {
                    "size": self.vector_size,
                    "distance": "Cosine",
                }
            });
            let response = self
                .client
                .put(self.url(&format!("/collections/{COLLECTION_NAME}")))
                .json(&body)
                .send()
                .await
                .map_err(|e| anyhow::anyhow!("Qdrant unreachable: {e}"))?;
            if !response.status().is_success() {
                return Err(anyhow::anyhow!(
                    "Failed to create collection: {}",
                    response.text().await.unwrap_or_default()
                ));
            }
            info!("Created {} collection", COLLECTION_NAME);
        } else if !info.status().is_success() {
            return Err(anyhow::anyhow!(
                "Qdrant collection check failed: {}",
                info.status()
            ));
        }

        self.collection_ready.store(true, Ordering::Release);
        Ok(())
    }

    // =========================================================================
    // Memory operations
    // =========================================================================

    /// Upsert a semantic entry; the summary is encrypted into the payload.
    pub async fn store(&self, entry: &SemanticEntry) -> Result<()> {
        self.ensure_collection().await?;

        let encrypted_summary = self.encryption.encrypt(&entry.summary)?;
        let payload = json!({
            "summary_encrypted": encrypted_summary,
            "source": entry.source.as_str(),
            "confidence": entry.confidence,
            "conversation_id": entry.conversation_id,
            "tool_name": entry.tool_name,
            "reference_id": entry.id.to_string(),
            "created_at": entry.created_at.to_rfc3339(),
        });

        let body = json!({
            "points": [{
                "id": entry.id.to_string(),
                "vector": entry.vector,
                "payload": payload,
            }]
        });

        let response = self
            .client
            .put(self.url(&format!("/collections/{COLLECTION_NAME}/points?wait=true")))
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Qdrant unreachable: {e}"))?;
        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Qdrant upsert failed: {}",
                response.text().await.unwrap_or_default()
            ));
        }

        debug!(memory_id = %entry.id, source = entry.source.as_str(), "Semantic memory stored");
        Ok(())
    }

    /// Nearest-neighbour search. Results come back in descending
    /// similarity; ties are broken by creation timestamp, newest first.
    pub async fn search(
        &self,
        query_vector: &[f32],
        limit: usize,
        source_filter: Option<MemorySource>,
        min_confidence: f64,
    ) -> Result<Vec<SemanticSearchResult>> {
        self.ensure_collection().await?;

        let mut must: Vec<serde_json::Value> = Vec::new();
        if let Some(source) = source_filter {
            must.push(json!({"key": "source", "match": {"value": source.as_str()}}));
        }
        if min_confidence > 0.0 {
            must.push(json!({"key": "confidence", "range": {"gte": min_confidence}}));
        }

        let mut body = json!({
            "vector": query_vector,
            "limit": limit,
            "with_payload": true,
        });
        if !must.is_empty() {
            body["filter"] = json!({"must": must});
        }

        let response = self
            .client
            .post(self.url(&format!("/collections/{COLLECTION_NAME}/points/search")))
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Qdrant unreachable: {e}"))?;
        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Qdrant search failed: {}",
                response.text().await.unwrap_or_default()
            ));
        }

        let json: serde_json::Value = response.json().await?;
        let hits = json["result"].as_array().cloned().unwrap_or_default();

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let score = hit["score"].as_f64().unwrap_or(0.0) as f32;
            let result = self.parse_point(&hit, score)?;
            results.push(result);
        }

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        Ok(results)
    }

    pub async fn get(&self, memory_id: Uuid) -> Result<Option<SemanticEntry>> {
        self.ensure_collection().await?;

        let body = json!({
            "ids": [memory_id.to_string()],
            "with_payload": true,
            "with_vector": true,
        });
        let response = self
            .client
            .post(self.url(&format!("/collections/{COLLECTION_NAME}/points")))
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Qdrant unreachable: {e}"))?;
        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Qdrant retrieve failed: {}",
                response.text().await.unwrap_or_default()
            ));
        }

        let json: serde_json::Value = response.json().await?;
        let Some(point) = json["result"].as_array().and_then(|points| points.first()) else {
            return Ok(None);
        };

        let parsed = self.parse_point(point, 1.0)?;
        let vector = point["vector"]
            .as_array()
            .map(|values| {
                values
                    .iter()
                    .filter_map(|v| v.as_f64().map(|f| f as f32))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Some(SemanticEntry {
            id: parsed.id,
            vector,
            summary: parsed.summary,
            source: parsed.source,
            confidence: parsed.confidence,
            conversation_id: parsed.conversation_id,
            tool_name: parsed.tool_name,
            created_at: parsed.created_at,
        }))
    }

    /// Update the payload of an existing point; the new summary is
    /// re-encrypted.
    pub async fn update(
        &self,
        memory_id: Uuid,
        summary: Option<&str>,
        confidence: Option<f64>,
    ) -> Result<bool> {
        self.ensure_collection().await?;

        let mut payload = serde_json::Map::new();
        if let Some(summary) = summary {
            payload.insert(
                "summary_encrypted".to_string(),
                json!(self.encryption.encrypt(summary)?),
            );
        }
        if let Some(confidence) = confidence {
            payload.insert("confidence".to_string(), json!(confidence));
        }
        if payload.is_empty() {
            return Ok(false);
        }

        let body = json!({
            "payload": payload,
            "points": [memory_id.to_string()],
        });
        let response = self
            .client
            .post(self.url(&format!(
                "/collections/{COLLECTION_NAME}/points/payload?wait=true"
            )))
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Qdrant unreachable: {e}"))?;
        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Qdrant payload update failed: {}",
                response.text().await.unwrap_or_default()
            ));
        }

        debug!(memory_id = %memory_id, "Semantic memory updated");
        Ok(true)
    }

    pub async fn delete(&self, memory_id: Uuid) -> Result<bool> {
        self.ensure_collection().await?;

        let body = json!({"points": [memory_id.to_string()]});
        let response = self
            .client
            .post(self.url(&format!(
                "/collections/{COLLECTION_NAME}/points/delete?wait=true"
            )))
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Qdrant unreachable: {e}"))?;
        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Qdrant delete failed: {}",
                response.text().await.unwrap_or_default()
            ));
        }

        debug!(memory_id = %memory_id, "Semantic memory deleted");
        Ok(true)
    }

    /// Paginated listing for the memory inspector.
    pub async fn list_all(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<SemanticSearchResult>, usize)> {
        self.ensure_collection().await?;

        let info = self
            .client
            .get(self.url(&format!("/collections/{COLLECTION_NAME}")))
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Qdrant unreachable: {e}"))?;
        let info_json: serde_json::Value = info.json().await?;
        let total = info_json["result"]["points_count"].as_u64().unwrap_or(0) as usize;

        // Scroll paginates by point id; fetch offset+limit and skip locally.
        let body = json!({
            "limit": offset + limit,
            "with_payload": true,
            "with_vector": false,
        });
        let response = self
            .client
            .post(self.url(&format!("/collections/{COLLECTION_NAME}/points/scroll")))
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Qdrant unreachable: {e}"))?;
        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Qdrant scroll failed: {}",
                response.text().await.unwrap_or_default()
            ));
        }

        let json: serde_json::Value = response.json().await?;
        let points = json["result"]["points"].as_array().cloned().unwrap_or_default();

        let mut results = Vec::new();
        for point in points.iter().skip(offset) {
            results.push(self.parse_point(point, 1.0)?);
        }
        Ok((results, total))
    }

    /// Drop and recreate the collection.
    pub async fn clear_all(&self) -> Result<()> {
        warn!("Clearing semantic memory collection");

        let response = self
            .client
            .delete(self.url(&format!("/collections/{COLLECTION_NAME}")))
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Qdrant unreachable: {e}"))?;
        if !response.status().is_success() && response.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(anyhow::anyhow!(
                "Qdrant collection drop failed: {}",
                response.status()
            ));
        }

        self.collection_ready.store(false, Ordering::Release);
        self.ensure_collection().await
    }

    pub async fn health_check(&self) -> bool {
        match self.client.get(self.url("/collections")).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    fn parse_point(
        &self,
        point: &serde_json::Value,
        score: f32,
    ) -> Result<SemanticSearchResult> {
        let payload = &point["payload"];

        let id = point["id"]
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| anyhow::anyhow!("Qdrant point has no UUID id"))?;

        let encrypted = payload["summary_encrypted"].as_str().unwrap_or_default();
        let summary = if encrypted.is_empty() {
            String::new()
        } else {
            // Cryptographic failure here means the key is wrong or the
            // store is corrupt; it must surface.
            self.encryption.decrypt(encrypted)?
        };

        let source = payload["source"]
            .as_str()
            .and_then(MemorySource::parse)
            .unwrap_or(MemorySource::Conversation);
        let created_at = payload["created_at"]
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        Ok(SemanticSearchResult {
            id,
            score,
            summary,
            source,
            confidence: payload["confidence"].as_f64().unwrap_or(0.5),
            conversation_id: payload["conversation_id"].as_str().map(str::to_string),
            tool_name: payload["tool_name"].as_str().map(str::to_string),
            created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> QdrantRepository {
        let encryption =
            Arc::new(EncryptionService::from_master_key(&[1u8; 32]).unwrap());
        QdrantRepository::new("http://localhost:6333", encryption)
    }

    #[test]
    fn parse_point_decrypts_payload() {
        let repo = repo();
        let id = Uuid::new_v4();
        let encrypted = repo.encryption.encrypt("likes rust").unwrap();
        let point = json!({
            "id": id.to_string(),
            "payload": {
                "summary_encrypted": encrypted,
                "source": "verifier",
                "confidence": 0.9,
                "created_at": "2026-01-01T00:00:00Z",
            }
        });

        let parsed = repo.parse_point(&point, 0.42).unwrap();
        assert_eq!(parsed.id, id);
        assert_eq!(parsed.summary, "likes rust");
        assert_eq!(parsed.source, MemorySource::Verifier);
        assert_eq!(parsed.score, 0.42);
    }

    #[test]
    fn parse_point_surfaces_decrypt_failure() {
        let repo = repo();
        let point = json!({
            "id": Uuid::new_v4().to_string(),
            "payload": {
                "summary_encrypted": "bm90LXJlYWwtY2lwaGVydGV4dA",
                "source": "conversation",
            }
        });
        assert!(repo.parse_point(&point, 1.0).is_err());
    }

    // Integration tests require a running Qdrant instance.
    #[tokio::test]
    #[ignore]
    async fn test_store_search_round_trip() {
        let repo = repo();
        let entry = SemanticEntry {
            id: Uuid::new_v4(),
            vector: vec![0.1; EMBEDDING_DIMENSION],
            summary: "user name is Alex".to_string(),
            source: MemorySource::Verifier,
            confidence: 0.9,
            conversation_id: Some("c1".to_string()),
            tool_name: None,
            created_at: Utc::now(),
        };
        repo.store(&entry).await.unwrap();

        let results = repo
            .search(&vec![0.1; EMBEDDING_DIMENSION], 5, None, 0.25)
            .await
            .unwrap();
        assert!(results.iter().any(|r| r.id == entry.id));

        repo.delete(entry.id).await.unwrap();
    }
}
