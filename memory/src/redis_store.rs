//! Redis repository for short-term working memory.
//!
//! Everything here is non-authoritative and expires: conversation turns,
//! session contexts and temporary tool outputs, all namespaced by kind so a
//! reset can delete whole subtrees. Every write refreshes the TTL.

use anyhow::Result;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use tracing::{debug, info, warn};

use slovo_core::models::{ConversationTurn, SessionContext};

/// Default TTL: 2 hours.
pub const DEFAULT_TTL_SECONDS: u64 = 7200;

/// Key builders for the ephemeral namespaces.
pub struct RedisKeys;

impl RedisKeys {
    /// Turn list for a conversation: `turn:list:{conversation_id}`
    pub fn turn_list(conversation_id: &str) -> String {
        format!("turn:list:{conversation_id}")
    }

    /// Session context: `session:{session_id}`
    pub fn session(session_id: &str) -> String {
        format!("session:{session_id}")
    }

    /// Tool output: `tool_output:{session_id}:{tool_name}`
    pub fn tool_output(session_id: &str, tool_name: &str) -> String {
        format!("tool_output:{session_id}:{tool_name}")
    }
}

/// Repository over a shared Redis connection manager.
#[derive(Clone)]
pub struct RedisRepository {
    manager: ConnectionManager,
    ttl: u64,
}

impl RedisRepository {
    /// Connect and verify the server responds to PING.
    pub async fn connect(url: &str, ttl_seconds: Option<u64>) -> Result<Self> {
        let client = Client::open(url)
            .map_err(|e| anyhow::anyhow!("Failed to create Redis client: {e}"))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to Redis: {e}"))?;

        let mut conn = manager.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Redis PING failed: {e}"))?;
        if pong != "PONG" {
            return Err(anyhow::anyhow!("Redis PING returned {pong}"));
        }

        let ttl = ttl_seconds.unwrap_or(DEFAULT_TTL_SECONDS);
        info!("Redis repository connected, ttl={}s", ttl);
        Ok(Self { manager, ttl })
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }

    // =========================================================================
    // Conversation turns
    // =========================================================================

    /// Append a turn and refresh the list TTL.
    pub async fn add_turn(&self, conversation_id: &str, turn: &ConversationTurn) -> Result<()> {
        let key = RedisKeys::turn_list(conversation_id);
        let payload = serde_json::to_string(turn)?;

        let mut conn = self.conn();
        let _: () = conn
            .rpush(&key, payload)
            .await
            .map_err(|e| anyhow::anyhow!("Redis error: {e}"))?;
        let _: () = conn
            .expire(&key, self.ttl as i64)
            .await
            .map_err(|e| anyhow::anyhow!("Redis error: {e}"))?;

        debug!(
            conversation_id,
            role = turn.role.as_str(),
            "Turn appended"
        );
        Ok(())
    }

    /// Read the most recent `limit` turns, oldest first.
    pub async fn get_recent_turns(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>> {
        let key = RedisKeys::turn_list(conversation_id);

        let mut conn = self.conn();
        let raw: Vec<String> = conn
            .lrange(&key, -(limit as isize), -1)
            .await
            .map_err(|e| anyhow::anyhow!("Redis error: {e}"))?;

        let mut turns = Vec::with_capacity(raw.len());
        for item in raw {
            match serde_json::from_str::<ConversationTurn>(&item) {
                Ok(turn) => turns.push(turn),
                Err(e) => warn!("Skipping unparseable turn: {e}"),
            }
        }
        Ok(turns)
    }

    /// Delete every turn for a conversation.
    pub async fn clear_conversation(&self, conversation_id: &str) -> Result<bool> {
        let key = RedisKeys::turn_list(conversation_id);
        let mut conn = self.conn();
        let removed: i32 = conn
            .del(&key)
            .await
            .map_err(|e| anyhow::anyhow!("Redis error: {e}"))?;
        Ok(removed > 0)
    }

    // =========================================================================
    // Session contexts
    // =========================================================================

    pub async fn put_session(&self, session: &SessionContext) -> Result<()> {
        let key = RedisKeys::session(&session.session_id.to_string());
        let ttl = session.ttl_seconds.unwrap_or(self.ttl);
        let payload = serde_json::to_string(session)?;

        let mut conn = self.conn();
        let _: () = conn
            .set_ex(&key, payload, ttl)
            .await
            .map_err(|e| anyhow::anyhow!("Redis error: {e}"))?;
        Ok(())
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<SessionContext>> {
        let key = RedisKeys::session(session_id);
        let mut conn = self.conn();
        let raw: Option<String> = conn
            .get(&key)
            .await
            .map_err(|e| anyhow::anyhow!("Redis error: {e}"))?;

        match raw {
            Some(data) => {
                // Reading refreshes the TTL.
                let _: () = conn
                    .expire(&key, self.ttl as i64)
                    .await
                    .map_err(|e| anyhow::anyhow!("Redis error: {e}"))?;
                Ok(Some(serde_json::from_str(&data)?))
            }
            None => Ok(None),
        }
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<bool> {
        let key = RedisKeys::session(session_id);
        let mut conn = self.conn();
        let removed: i32 = conn
            .del(&key)
            .await
            .map_err(|e| anyhow::anyhow!("Redis error: {e}"))?;
        Ok(removed > 0)
    }

    // =========================================================================
    // Tool outputs
    // =========================================================================

    pub async fn set_tool_output(
        &self,
        session_id: &str,
        tool_name: &str,
        output: &serde_json::Value,
    ) -> Result<()> {
        let key = RedisKeys::tool_output(session_id, tool_name);
        let mut conn = self.conn();
        let _: () = conn
            .set_ex(&key, output.to_string(), self.ttl)
            .await
            .map_err(|e| anyhow::anyhow!("Redis error: {e}"))?;
        Ok(())
    }

    pub async fn get_tool_output(
        &self,
        session_id: &str,
        tool_name: &str,
    ) -> Result<Option<serde_json::Value>> {
        let key = RedisKeys::tool_output(session_id, tool_name);
        let mut conn = self.conn();
        let raw: Option<String> = conn
            .get(&key)
            .await
            .map_err(|e| anyhow::anyhow!("Redis error: {e}"))?;
        Ok(raw.map(|data| serde_json::from_str(&data)).transpose()?)
    }

    /// Scan all tool outputs recorded for a session.
    pub async fn list_tool_outputs(
        &self,
        session_id: &str,
    ) -> Result<Vec<(String, serde_json::Value)>> {
        let pattern = format!("tool_output:{session_id}:*");
        let mut conn = self.conn();
        let keys: Vec<String> = conn
            .keys(&pattern)
            .await
            .map_err(|e| anyhow::anyhow!("Redis error: {e}"))?;

        let mut outputs = Vec::with_capacity(keys.len());
        for key in keys {
            let raw: Option<String> = conn
                .get(&key)
                .await
                .map_err(|e| anyhow::anyhow!("Redis error: {e}"))?;
            if let Some(data) = raw {
                let tool_name = key
                    .rsplit(':')
                    .next()
                    .unwrap_or_default()
                    .to_string();
                match serde_json::from_str(&data) {
                    Ok(value) => outputs.push((tool_name, value)),
                    Err(e) => warn!("Skipping unparseable tool output: {e}"),
                }
            }
        }
        Ok(outputs)
    }

    // =========================================================================
    // Reset and health
    // =========================================================================

    /// Delete every key in the ephemeral namespaces.
    pub async fn clear_all(&self) -> Result<()> {
        warn!("Clearing all ephemeral memory");
        let mut conn = self.conn();

        for pattern in ["turn:list:*", "session:*", "tool_output:*"] {
            let keys: Vec<String> = conn
                .keys(pattern)
                .await
                .map_err(|e| anyhow::anyhow!("Redis error: {e}"))?;
            if !keys.is_empty() {
                let _: () = conn
                    .del(&keys)
                    .await
                    .map_err(|e| anyhow::anyhow!("Redis error: {e}"))?;
            }
        }
        Ok(())
    }

    pub async fn health_check(&self) -> bool {
        let mut conn = self.conn();
        let result: Result<String, _> = redis::cmd("PING").query_async(&mut conn).await;
        matches!(result, Ok(ref pong) if pong == "PONG")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slovo_core::models::TurnRole;

    #[test]
    fn key_namespaces_are_stable() {
        assert_eq!(RedisKeys::turn_list("c1"), "turn:list:c1");
        assert_eq!(RedisKeys::session("s1"), "session:s1");
        assert_eq!(
            RedisKeys::tool_output("s1", "weather"),
            "tool_output:s1:weather"
        );
    }

    // Integration tests require a running Redis server.
    #[tokio::test]
    #[ignore]
    async fn test_turn_round_trip() {
        let repo = RedisRepository::connect("redis://localhost:6379", Some(60))
            .await
            .unwrap();
        let cid = format!("test-{}", uuid::Uuid::new_v4());

        repo.add_turn(&cid, &ConversationTurn::new(TurnRole::User, "hello"))
            .await
            .unwrap();
        repo.add_turn(&cid, &ConversationTurn::new(TurnRole::Assistant, "hi there"))
            .await
            .unwrap();

        let turns = repo.get_recent_turns(&cid, 10).await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, TurnRole::User);
        assert_eq!(turns[1].content, "hi there");

        assert!(repo.clear_conversation(&cid).await.unwrap());
        assert!(repo.get_recent_turns(&cid, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    #[ignore]
    async fn test_tool_output_round_trip() {
        let repo = RedisRepository::connect("redis://localhost:6379", Some(60))
            .await
            .unwrap();
        let sid = format!("test-{}", uuid::Uuid::new_v4());

        repo.set_tool_output(&sid, "weather", &serde_json::json!({"temp": 21}))
            .await
            .unwrap();
        let output = repo.get_tool_output(&sid, "weather").await.unwrap();
        assert_eq!(output.unwrap()["temp"], 21);

        let all = repo.list_tool_outputs(&sid).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].0, "weather");
    }
}
