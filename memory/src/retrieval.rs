//! Memory retrieval pipeline.
//!
//! Runs before the model sees the prompt: four subqueries fan out
//! concurrently, each with a budget fixed up front so a slow or failing
//! section can never starve the others. The model receives short
//! summaries, never raw store content.

use std::sync::Arc;

use tracing::{debug, warn};

use slovo_core::llm::EmbeddingProvider;
use slovo_core::models::{
    ConversationTurn, EpisodicLogEntry, MemoryContext, RetrievalRequest, SemanticSearchResult,
    TurnRole, UserProfile,
};

use crate::postgres_store::PostgresRepository;
use crate::qdrant_store::QdrantRepository;
use crate::redis_store::RedisRepository;

/// Rough token estimation: ~4 chars per token.
const CHARS_PER_TOKEN: usize = 4;

/// A priori budget shares per section, in percent of the request limit.
const PROFILE_SHARE: usize = 10;
const CONVERSATION_SHARE: usize = 25;
const SEMANTIC_SHARE: usize = 40;
const EPISODIC_SHARE: usize = 15;

/// Semantic hits below this similarity are noise for the fixed embedding
/// model and are dropped.
const MIN_SEMANTIC_SCORE: f64 = 0.25;

/// Episodic entries below this confidence are not worth prompt space.
const MIN_EPISODIC_CONFIDENCE: f64 = 0.7;

pub struct RetrievalPipeline {
    redis: Arc<RedisRepository>,
    qdrant: Arc<QdrantRepository>,
    postgres: Arc<PostgresRepository>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
}

impl RetrievalPipeline {
    pub fn new(
        redis: Arc<RedisRepository>,
        qdrant: Arc<QdrantRepository>,
        postgres: Arc<PostgresRepository>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
    ) -> Self {
        Self {
            redis,
            qdrant,
            postgres,
            embedder,
        }
    }

    /// Execute all four subqueries concurrently and assemble the bundle.
    ///
    /// A failing section contributes an empty string; the pipeline itself
    /// never fails on partial outages.
    pub async fn retrieve(&self, request: &RetrievalRequest) -> MemoryContext {
        let limit = request.token_limit;
        debug!(
            conversation_id = ?request.conversation_id,
            token_limit = limit,
            "Starting memory retrieval"
        );

        let (profile, conversation, semantic, episodic) = tokio::join!(
            self.retrieve_profile(limit * PROFILE_SHARE / 100),
            self.retrieve_conversation(
                request.conversation_id.as_deref(),
                limit * CONVERSATION_SHARE / 100,
            ),
            self.retrieve_semantic(
                &request.user_message,
                request.max_semantic_results,
                limit * SEMANTIC_SHARE / 100,
            ),
            self.retrieve_episodic(
                request.max_episodic_results,
                limit * EPISODIC_SHARE / 100,
            ),
        );

        let total = estimate_tokens(&profile)
            + estimate_tokens(&conversation)
            + estimate_tokens(&semantic)
            + estimate_tokens(&episodic);

        debug!(
            total_tokens = total,
            has_profile = !profile.is_empty(),
            has_conversation = !conversation.is_empty(),
            has_semantic = !semantic.is_empty(),
            has_episodic = !episodic.is_empty(),
            "Memory retrieval complete"
        );

        MemoryContext {
            profile_summary: profile,
            conversation_summary: conversation,
            semantic_summary: semantic,
            episodic_summary: episodic,
            total_token_estimate: total,
        }
    }

    async fn retrieve_profile(&self, token_budget: usize) -> String {
        if token_budget == 0 {
            return String::new();
        }
        match self.postgres.get_user_profile().await {
            Ok(profile) => truncate_to_tokens(&summarize_profile(&profile), token_budget),
            Err(e) => {
                warn!("Failed to retrieve profile: {e}");
                String::new()
            }
        }
    }

    async fn retrieve_conversation(
        &self,
        conversation_id: Option<&str>,
        token_budget: usize,
    ) -> String {
        let Some(conversation_id) = conversation_id else {
            return String::new();
        };
        if token_budget == 0 {
            return String::new();
        }

        match self.redis.get_recent_turns(conversation_id, 10).await {
            Ok(turns) => summarize_turns(&turns, token_budget),
            Err(e) => {
                warn!("Failed to retrieve session: {e}");
                String::new()
            }
        }
    }

    async fn retrieve_semantic(
        &self,
        query: &str,
        max_results: usize,
        token_budget: usize,
    ) -> String {
        let Some(embedder) = &self.embedder else {
            return String::new();
        };
        if token_budget == 0 {
            return String::new();
        }

        let vector = match embedder.embed(query).await {
            Ok(vector) => vector,
            Err(e) => {
                warn!("Failed to embed query: {e}");
                return String::new();
            }
        };

        match self
            .qdrant
            .search(&vector, max_results, None, MIN_SEMANTIC_SCORE)
            .await
        {
            Ok(results) => summarize_semantic(&results, token_budget),
            Err(e) => {
                warn!("Failed to retrieve semantic memory: {e}");
                String::new()
            }
        }
    }

    async fn retrieve_episodic(&self, max_results: usize, token_budget: usize) -> String {
        if token_budget == 0 {
            return String::new();
        }
        match self.postgres.get_recent_episodic_logs(max_results).await {
            Ok(logs) => summarize_episodic(&logs, token_budget),
            Err(e) => {
                warn!("Failed to retrieve episodic logs: {e}");
                String::new()
            }
        }
    }
}

fn summarize_profile(profile: &UserProfile) -> String {
    let mut parts: Vec<String> = Vec::new();

    if !profile.preferred_languages.is_empty() {
        parts.push(format!(
            "Languages: {}",
            profile.preferred_languages.join(", ")
        ));
    }
    if !profile.communication_style.is_empty() {
        parts.push(format!("Style: {}", profile.communication_style));
    }
    if !profile.memory_capture_enabled {
        parts.push("Memory capture: disabled".to_string());
    }

    if parts.is_empty() {
        return String::new();
    }
    format!("User preferences: {}.", parts.join("; "))
}

fn summarize_turns(turns: &[ConversationTurn], token_budget: usize) -> String {
    if turns.is_empty() {
        return String::new();
    }

    let max_chars = token_budget * CHARS_PER_TOKEN;
    let mut lines = vec!["Recent conversation:".to_string()];
    let mut total_chars = lines[0].len();

    let start = turns.len().saturating_sub(5);
    for turn in &turns[start..] {
        let role = match turn.role {
            TurnRole::User => "User",
            TurnRole::Assistant => "Assistant",
        };
        let content = if turn.content.chars().count() > 200 {
            let truncated: String = turn.content.chars().take(200).collect();
            format!("{truncated}...")
        } else {
            turn.content.clone()
        };
        let line = format!("- {role}: {content}");

        if total_chars + line.len() > max_chars {
            break;
        }
        total_chars += line.len();
        lines.push(line);
    }

    if lines.len() == 1 {
        return String::new();
    }
    lines.join("\n")
}

fn summarize_semantic(results: &[SemanticSearchResult], token_budget: usize) -> String {
    if results.is_empty() {
        return String::new();
    }

    let max_chars = token_budget * CHARS_PER_TOKEN;
    let mut lines = vec!["Relevant context:".to_string()];
    let mut total_chars = lines[0].len();

    for result in results {
        if (result.score as f64) < MIN_SEMANTIC_SCORE {
            continue;
        }
        let line = format!("- {}", result.summary);
        if total_chars + line.len() > max_chars {
            break;
        }
        total_chars += line.len();
        lines.push(line);
    }

    if lines.len() == 1 {
        return String::new();
    }
    lines.join("\n")
}

fn summarize_episodic(logs: &[EpisodicLogEntry], token_budget: usize) -> String {
    let filtered: Vec<&EpisodicLogEntry> = logs
        .iter()
        .filter(|log| log.confidence >= MIN_EPISODIC_CONFIDENCE)
        .take(3)
        .collect();
    if filtered.is_empty() {
        return String::new();
    }

    let max_chars = token_budget * CHARS_PER_TOKEN;
    let mut lines = vec!["Recent actions:".to_string()];
    let mut total_chars = lines[0].len();

    for log in filtered {
        let line = format!("- [{}] {}", log.agent, log.summary);
        if total_chars + line.len() > max_chars {
            break;
        }
        total_chars += line.len();
        lines.push(line);
    }

    if lines.len() == 1 {
        return String::new();
    }
    lines.join("\n")
}

fn estimate_tokens(text: &str) -> usize {
    text.len() / CHARS_PER_TOKEN
}

fn truncate_to_tokens(text: &str, token_limit: usize) -> String {
    let max_chars = token_limit * CHARS_PER_TOKEN;
    if text.len() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{truncated}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use slovo_core::models::{EpisodicActionType, EpisodicMetadata, MemorySource};
    use uuid::Uuid;

    fn turn(role: TurnRole, content: &str) -> ConversationTurn {
        ConversationTurn::new(role, content)
    }

    #[test]
    fn profile_summary_mentions_disabled_capture() {
        let mut profile = UserProfile::default();
        profile.memory_capture_enabled = false;
        let summary = summarize_profile(&profile);
        assert!(summary.contains("Languages: en"));
        assert!(summary.contains("Memory capture: disabled"));
    }

    #[test]
    fn conversation_summary_keeps_last_five_turns() {
        let turns: Vec<ConversationTurn> = (0..8)
            .map(|i| turn(TurnRole::User, &format!("message number {i}")))
            .collect();
        let summary = summarize_turns(&turns, 500);
        assert!(summary.starts_with("Recent conversation:"));
        assert!(!summary.contains("message number 2"));
        assert!(summary.contains("message number 3"));
        assert!(summary.contains("message number 7"));
    }

    #[test]
    fn conversation_summary_truncates_long_turns() {
        let long = "x".repeat(300);
        let summary = summarize_turns(&[turn(TurnRole::User, &long)], 500);
        assert!(summary.contains(&format!("{}...", "x".repeat(200))));
        assert!(!summary.contains(&"x".repeat(201)));
    }

    #[test]
    fn semantic_summary_respects_budget() {
        let results: Vec<SemanticSearchResult> = (0..20)
            .map(|i| SemanticSearchResult {
                id: Uuid::new_v4(),
                score: 0.9,
                summary: format!("fact number {i} about the user"),
                source: MemorySource::Verifier,
                confidence: 0.9,
                conversation_id: None,
                tool_name: None,
                created_at: Utc::now(),
            })
            .collect();

        let summary = summarize_semantic(&results, 20);
        assert!(summary.len() <= 20 * CHARS_PER_TOKEN + "Relevant context:".len());
    }

    #[test]
    fn semantic_summary_drops_low_scores() {
        let results = vec![SemanticSearchResult {
            id: Uuid::new_v4(),
            score: 0.1,
            summary: "barely related".to_string(),
            source: MemorySource::Conversation,
            confidence: 0.9,
            conversation_id: None,
            tool_name: None,
            created_at: Utc::now(),
        }];
        assert!(summarize_semantic(&results, 100).is_empty());
    }

    #[test]
    fn episodic_summary_filters_confidence_and_caps_at_three() {
        let make = |confidence: f64, text: &str| EpisodicLogEntry {
            id: Uuid::new_v4(),
            agent: "executor".to_string(),
            action_type: EpisodicActionType::ToolExecuted,
            summary: text.to_string(),
            confidence,
            metadata: EpisodicMetadata::default(),
            occurred_at: Utc::now(),
            created_at: Utc::now(),
        };

        let logs = vec![
            make(0.9, "first"),
            make(0.5, "too uncertain"),
            make(0.8, "second"),
            make(0.95, "third"),
            make(0.99, "fourth"),
        ];

        let summary = summarize_episodic(&logs, 200);
        assert!(summary.contains("[executor] first"));
        assert!(summary.contains("second"));
        assert!(summary.contains("third"));
        assert!(!summary.contains("too uncertain"));
        assert!(!summary.contains("fourth"));
    }

    #[test]
    fn token_estimate_is_chars_over_four() {
        assert_eq!(estimate_tokens("12345678"), 2);
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn truncate_appends_ellipsis_only_when_needed() {
        assert_eq!(truncate_to_tokens("short", 10), "short");
        let long = "a".repeat(100);
        let truncated = truncate_to_tokens(&long, 10);
        assert!(truncated.ends_with("..."));
        assert!(truncated.len() <= 40);
    }
}
