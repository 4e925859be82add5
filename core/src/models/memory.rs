//! Memory entries, cross-store metadata and the retrieval/write contracts.
//!
//! Entries live in one of three physical stores (ephemeral, vector,
//! durable); every persisted entry has exactly one `MemoryMetadata` row in
//! the durable store pointing at its physical location.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fixed id for the singleton user profile row.
pub const PROFILE_ID: Uuid = Uuid::from_u128(0x534c_4f56_4f00_0000_0000_0000_0000_0001);

/// Kind discriminant for the memory entry sum type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    Semantic,
    Episodic,
    Preference,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::Semantic => "semantic",
            MemoryKind::Episodic => "episodic",
            MemoryKind::Preference => "preference",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "semantic" => Some(MemoryKind::Semantic),
            "episodic" => Some(MemoryKind::Episodic),
            "preference" => Some(MemoryKind::Preference),
            _ => None,
        }
    }
}

/// Where a memory entry originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemorySource {
    Conversation,
    Tool,
    UserEdit,
    Verifier,
}

impl MemorySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemorySource::Conversation => "conversation",
            MemorySource::Tool => "tool",
            MemorySource::UserEdit => "user_edit",
            MemorySource::Verifier => "verifier",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "conversation" => Some(MemorySource::Conversation),
            "tool" => Some(MemorySource::Tool),
            "user_edit" => Some(MemorySource::UserEdit),
            "verifier" => Some(MemorySource::Verifier),
            _ => None,
        }
    }
}

/// Physical store holding an entry's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreLocation {
    Vector,
    Durable,
    Ephemeral,
}

impl StoreLocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreLocation::Vector => "vector",
            StoreLocation::Durable => "durable",
            StoreLocation::Ephemeral => "ephemeral",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "vector" => Some(StoreLocation::Vector),
            "durable" => Some(StoreLocation::Durable),
            "ephemeral" => Some(StoreLocation::Ephemeral),
            _ => None,
        }
    }
}

/// Provenance of a stored preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreferenceSource {
    UserEdit,
    VerifierApproved,
    SystemDefault,
}

impl PreferenceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreferenceSource::UserEdit => "user_edit",
            PreferenceSource::VerifierApproved => "verifier_approved",
            PreferenceSource::SystemDefault => "system_default",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user_edit" => Some(PreferenceSource::UserEdit),
            "verifier_approved" => Some(PreferenceSource::VerifierApproved),
            "system_default" => Some(PreferenceSource::SystemDefault),
            _ => None,
        }
    }
}

/// Action recorded by an episodic log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodicActionType {
    ToolExecuted,
    MemoryWritten,
    PlanExecuted,
    CorrectionApplied,
    ClarificationRequested,
}

impl EpisodicActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EpisodicActionType::ToolExecuted => "tool_executed",
            EpisodicActionType::MemoryWritten => "memory_written",
            EpisodicActionType::PlanExecuted => "plan_executed",
            EpisodicActionType::CorrectionApplied => "correction_applied",
            EpisodicActionType::ClarificationRequested => "clarification_requested",
        }
    }

    /// Parses an action tag, defaulting to `memory_written`.
    pub fn parse_or_default(s: &str) -> Self {
        match s {
            "tool_executed" => EpisodicActionType::ToolExecuted,
            "plan_executed" => EpisodicActionType::PlanExecuted,
            "correction_applied" => EpisodicActionType::CorrectionApplied,
            "clarification_requested" => EpisodicActionType::ClarificationRequested,
            _ => EpisodicActionType::MemoryWritten,
        }
    }
}

/// Optional context attached to an episodic entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EpisodicMetadata {
    pub conversation_id: Option<String>,
    pub step_index: Option<i32>,
    pub tool_name: Option<String>,
    pub error_type: Option<String>,
    pub correction_reason: Option<String>,
}

/// Append-only record of an agent action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodicLogEntry {
    pub id: Uuid,
    pub agent: String,
    pub action_type: EpisodicActionType,
    pub summary: String,
    pub confidence: f64,
    #[serde(default)]
    pub metadata: EpisodicMetadata,
    pub occurred_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Entry in the vector store: a fixed-dimension embedding plus its payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticEntry {
    pub id: Uuid,
    pub vector: Vec<f32>,
    /// Free-text summary, at most 500 characters.
    pub summary: String,
    pub source: MemorySource,
    pub confidence: f64,
    pub conversation_id: Option<String>,
    pub tool_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One nearest-neighbour hit with its decrypted payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticSearchResult {
    pub id: Uuid,
    pub score: f32,
    pub summary: String,
    pub source: MemorySource,
    pub confidence: f64,
    pub conversation_id: Option<String>,
    pub tool_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Keyed user preference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preference {
    pub id: Uuid,
    pub key: String,
    pub value: String,
    pub source: PreferenceSource,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Cross-store index row; exactly one exists per persisted entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryMetadata {
    pub id: Uuid,
    pub memory_type: MemoryKind,
    pub store_location: StoreLocation,
    /// Short summary, at most 200 characters.
    pub summary: String,
    pub source: MemorySource,
    pub confidence: f64,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Singleton user profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub preferred_languages: Vec<String>,
    pub communication_style: String,
    pub privacy_level: String,
    /// Gate for the memory write path; when false nothing is persisted.
    pub memory_capture_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for UserProfile {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: PROFILE_ID,
            preferred_languages: vec!["en".to_string()],
            communication_style: "balanced".to_string(),
            privacy_level: "standard".to_string(),
            memory_capture_enabled: true,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
        }
    }
}

/// One message in a conversation, stored in the ephemeral store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: Uuid,
    pub role: TurnRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Session state kept in the ephemeral store under a TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_id: Uuid,
    pub conversation_id: String,
    #[serde(default)]
    pub turns: Vec<ConversationTurn>,
    pub active_plan_id: Option<Uuid>,
    #[serde(default)]
    pub agent_state: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub tool_outputs: HashMap<String, serde_json::Value>,
    pub ttl_seconds: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionContext {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            conversation_id: conversation_id.into(),
            turns: Vec::new(),
            active_plan_id: None,
            agent_state: HashMap::new(),
            tool_outputs: HashMap::new(),
            ttl_seconds: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Input to the retrieval pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalRequest {
    pub user_message: String,
    pub conversation_id: Option<String>,
    pub max_semantic_results: usize,
    pub max_episodic_results: usize,
    pub token_limit: usize,
}

impl RetrievalRequest {
    pub fn new(user_message: impl Into<String>) -> Self {
        Self {
            user_message: user_message.into(),
            conversation_id: None,
            max_semantic_results: 5,
            max_episodic_results: 5,
            token_limit: 2000,
        }
    }
}

/// Token-budgeted summary bundle produced by the retrieval pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryContext {
    pub profile_summary: String,
    pub conversation_summary: String,
    pub semantic_summary: String,
    pub episodic_summary: String,
    pub total_token_estimate: usize,
}

impl MemoryContext {
    pub fn is_empty(&self) -> bool {
        self.profile_summary.is_empty()
            && self.conversation_summary.is_empty()
            && self.semantic_summary.is_empty()
            && self.episodic_summary.is_empty()
    }
}

/// Request to persist a memory entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteRequest {
    pub memory_type: MemoryKind,
    pub content: String,
    pub source: MemorySource,
    pub confidence: f64,
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Verifier decision gating a memory write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifierApproval {
    pub approved: bool,
    pub confidence: f64,
    pub reason: String,
    pub adjusted_content: Option<String>,
}

/// Outcome of a write request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteResult {
    pub success: bool,
    pub memory_id: Option<Uuid>,
    pub memory_type: Option<MemoryKind>,
    pub error: Option<String>,
    pub verifier_approved: bool,
}

impl WriteResult {
    pub fn rejected(error: impl Into<String>, verifier_approved: bool) -> Self {
        Self {
            success: false,
            memory_id: None,
            memory_type: None,
            error: Some(error.into()),
            verifier_approved,
        }
    }
}

/// Inspector list filters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryListRequest {
    pub memory_type: Option<MemoryKind>,
    pub source: Option<MemorySource>,
    #[serde(default)]
    pub include_deleted: bool,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryListItem {
    pub id: Uuid,
    pub memory_type: MemoryKind,
    pub summary: String,
    pub source: MemorySource,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
    pub is_deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryListResponse {
    pub items: Vec<MemoryListItem>,
    pub total_count: usize,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryDetailResponse {
    pub id: Uuid,
    pub memory_type: MemoryKind,
    pub content: String,
    pub summary: String,
    pub source: MemorySource,
    pub confidence: f64,
    pub store_location: StoreLocation,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryUpdateRequest {
    pub content: Option<String>,
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryResetRequest {
    pub confirm_full_reset: bool,
    #[serde(default = "default_preserve_profile")]
    pub preserve_user_profile: bool,
}

fn default_preserve_profile() -> bool {
    true
}

/// Per-store outcome of a full reset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryResetResponse {
    pub success: bool,
    pub ephemeral_cleared: bool,
    pub vector_cleared: bool,
    pub durable_cleared: bool,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_type_parse_defaults_to_memory_written() {
        assert_eq!(
            EpisodicActionType::parse_or_default("tool_executed"),
            EpisodicActionType::ToolExecuted
        );
        assert_eq!(
            EpisodicActionType::parse_or_default("no_such_action"),
            EpisodicActionType::MemoryWritten
        );
    }

    #[test]
    fn default_profile_enables_capture() {
        let profile = UserProfile::default();
        assert_eq!(profile.id, PROFILE_ID);
        assert!(profile.memory_capture_enabled);
        assert_eq!(profile.preferred_languages, vec!["en".to_string()]);
    }

    #[test]
    fn store_location_round_trip() {
        for loc in [
            StoreLocation::Vector,
            StoreLocation::Durable,
            StoreLocation::Ephemeral,
        ] {
            assert_eq!(StoreLocation::parse(loc.as_str()), Some(loc));
        }
        assert_eq!(StoreLocation::parse("qdrant"), None);
    }

    #[test]
    fn reset_request_preserves_profile_by_default() {
        let req: MemoryResetRequest =
            serde_json::from_str(r#"{"confirm_full_reset": true}"#).unwrap();
        assert!(req.preserve_user_profile);
    }
}
