//! PostgreSQL repository for durable structured memory.
//!
//! Holds the singleton user profile, keyed preferences, the append-only
//! episodic log and the cross-store memory metadata index. Sensitive free
//! text is encrypted at this boundary; preference keys are looked up
//! through their deterministic index hash so equality search works without
//! decryption.

use anyhow::Result;
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{debug, info, warn};
use uuid::Uuid;

use slovo_core::models::{
    EpisodicActionType, EpisodicLogEntry, EpisodicMetadata, MemoryKind, MemoryMetadata,
    MemorySource, Preference, PreferenceSource, StoreLocation, UserProfile, PROFILE_ID,
};
use slovo_core::EncryptionService;

use std::sync::Arc;

/// Memory tables truncated by a full reset, profile excluded.
const MEMORY_TABLES: &[&str] = &["episodic_log", "user_preference", "memory_metadata"];

/// Tool tables live in the same database; a full reset clears them too.
const TOOL_TABLES: &[&str] = &[
    "tool_execution_log",
    "tool_permission",
    "tool_state",
    "tool_volume",
    "tool_discovery_queue",
    "tool_manifest",
];

pub struct PostgresRepository {
    pool: PgPool,
    encryption: Arc<EncryptionService>,
}

impl PostgresRepository {
    pub async fn connect(database_url: &str, encryption: Arc<EncryptionService>) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to PostgreSQL: {e}"))?;

        let repo = Self { pool, encryption };
        repo.initialize_schema().await?;
        info!("PostgreSQL repository connected");
        Ok(repo)
    }

    pub fn from_pool(pool: PgPool, encryption: Arc<EncryptionService>) -> Self {
        Self { pool, encryption }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the memory tables when they do not exist yet.
    pub async fn initialize_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS user_profile (
                id UUID PRIMARY KEY,
                preferred_languages TEXT NOT NULL,
                communication_style TEXT NOT NULL,
                privacy_level TEXT NOT NULL,
                memory_capture_enabled BOOLEAN NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS user_preference (
                id UUID PRIMARY KEY,
                key_hash TEXT NOT NULL UNIQUE,
                key_encrypted TEXT NOT NULL,
                value_encrypted TEXT NOT NULL,
                source TEXT NOT NULL,
                confidence DOUBLE PRECISION NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS episodic_log (
                id UUID PRIMARY KEY,
                agent TEXT NOT NULL,
                action_type TEXT NOT NULL,
                summary_encrypted TEXT NOT NULL,
                confidence DOUBLE PRECISION NOT NULL,
                conversation_id TEXT,
                step_index INTEGER,
                tool_name TEXT,
                error_type TEXT,
                correction_reason TEXT,
                occurred_at TIMESTAMPTZ NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS memory_metadata (
                id UUID PRIMARY KEY,
                memory_type TEXT NOT NULL,
                store_location TEXT NOT NULL,
                summary_encrypted TEXT NOT NULL,
                source TEXT NOT NULL,
                confidence DOUBLE PRECISION NOT NULL,
                is_deleted BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_episodic_occurred
             ON episodic_log (occurred_at DESC)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_metadata_type
             ON memory_metadata (memory_type)",
        )
        .execute(&self.pool)
        .await?;

        debug!("PostgreSQL schema initialized");
        Ok(())
    }

    // =========================================================================
    // User profile
    // =========================================================================

    /// Fetch the singleton profile, creating the default row on first use.
    pub async fn get_user_profile(&self) -> Result<UserProfile> {
        let row = sqlx::query("SELECT * FROM user_profile WHERE id = $1")
            .bind(PROFILE_ID)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => self.row_to_profile(&row),
            None => self.create_default_profile().await,
        }
    }

    async fn create_default_profile(&self) -> Result<UserProfile> {
        let profile = UserProfile::default();
        sqlx::query(
            "INSERT INTO user_profile
             (id, preferred_languages, communication_style, privacy_level,
              memory_capture_enabled, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(profile.id)
        .bind(serde_json::to_string(&profile.preferred_languages)?)
        .bind(&profile.communication_style)
        .bind(&profile.privacy_level)
        .bind(profile.memory_capture_enabled)
        .bind(profile.created_at)
        .bind(profile.updated_at)
        .execute(&self.pool)
        .await?;

        info!("Default user profile created");
        Ok(profile)
    }

    pub async fn update_user_profile(
        &self,
        preferred_languages: Option<Vec<String>>,
        communication_style: Option<String>,
        privacy_level: Option<String>,
        memory_capture_enabled: Option<bool>,
    ) -> Result<UserProfile> {
        let mut profile = self.get_user_profile().await?;

        if let Some(languages) = preferred_languages {
            profile.preferred_languages = languages;
        }
        if let Some(style) = communication_style {
            profile.communication_style = style;
        }
        if let Some(level) = privacy_level {
            profile.privacy_level = level;
        }
        if let Some(enabled) = memory_capture_enabled {
            profile.memory_capture_enabled = enabled;
        }
        profile.updated_at = Utc::now();

        sqlx::query(
            "UPDATE user_profile SET
                preferred_languages = $2,
                communication_style = $3,
                privacy_level = $4,
                memory_capture_enabled = $5,
                updated_at = $6
             WHERE id = $1",
        )
        .bind(profile.id)
        .bind(serde_json::to_string(&profile.preferred_languages)?)
        .bind(&profile.communication_style)
        .bind(&profile.privacy_level)
        .bind(profile.memory_capture_enabled)
        .bind(profile.updated_at)
        .execute(&self.pool)
        .await?;

        debug!("User profile updated");
        Ok(profile)
    }

    fn row_to_profile(&self, row: &sqlx::postgres::PgRow) -> Result<UserProfile> {
        let languages_json: String = row.try_get("preferred_languages")?;
        Ok(UserProfile {
            id: row.try_get("id")?,
            preferred_languages: serde_json::from_str(&languages_json).unwrap_or_default(),
            communication_style: row.try_get("communication_style")?,
            privacy_level: row.try_get("privacy_level")?,
            memory_capture_enabled: row.try_get("memory_capture_enabled")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    // =========================================================================
    // Preferences
    // =========================================================================

    /// Upsert a preference keyed by the hash of its key. Identical inputs
    /// keep the same row and refresh `updated_at`.
    pub async fn set_preference(
        &self,
        key: &str,
        value: &str,
        source: PreferenceSource,
        confidence: f64,
    ) -> Result<Preference> {
        let now = Utc::now();
        let key_hash = self.encryption.hash_for_index(key);
        let key_encrypted = self.encryption.encrypt(key)?;
        let value_encrypted = self.encryption.encrypt(value)?;

        let row = sqlx::query(
            "INSERT INTO user_preference
             (id, key_hash, key_encrypted, value_encrypted, source, confidence,
              created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (key_hash) DO UPDATE SET
                value_encrypted = EXCLUDED.value_encrypted,
                source = EXCLUDED.source,
                confidence = EXCLUDED.confidence,
                updated_at = EXCLUDED.updated_at
             RETURNING id, created_at, updated_at",
        )
        .bind(Uuid::new_v4())
        .bind(&key_hash)
        .bind(&key_encrypted)
        .bind(&value_encrypted)
        .bind(source.as_str())
        .bind(confidence)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        let preference = Preference {
            id: row.try_get("id")?,
            key: key.to_string(),
            value: value.to_string(),
            source,
            confidence,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        };

        debug!(key, "Preference upserted");
        Ok(preference)
    }

    pub async fn get_preference(&self, key: &str) -> Result<Option<Preference>> {
        let key_hash = self.encryption.hash_for_index(key);
        let row = sqlx::query("SELECT * FROM user_preference WHERE key_hash = $1")
            .bind(&key_hash)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| self.row_to_preference(&row)).transpose()
    }

    pub async fn delete_preference(&self, key: &str) -> Result<bool> {
        let key_hash = self.encryption.hash_for_index(key);
        let result = sqlx::query("DELETE FROM user_preference WHERE key_hash = $1")
            .bind(&key_hash)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_preferences(&self) -> Result<Vec<Preference>> {
        let rows = sqlx::query("SELECT * FROM user_preference ORDER BY updated_at DESC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(|row| self.row_to_preference(row)).collect()
    }

    fn row_to_preference(&self, row: &sqlx::postgres::PgRow) -> Result<Preference> {
        let key_encrypted: String = row.try_get("key_encrypted")?;
        let value_encrypted: String = row.try_get("value_encrypted")?;
        let source: String = row.try_get("source")?;

        Ok(Preference {
            id: row.try_get("id")?,
            key: self.encryption.decrypt(&key_encrypted)?,
            value: self.encryption.decrypt(&value_encrypted)?,
            source: PreferenceSource::parse(&source)
                .unwrap_or(PreferenceSource::SystemDefault),
            confidence: row.try_get("confidence")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    // =========================================================================
    // Episodic log (append-only)
    // =========================================================================

    pub async fn add_episodic_log(&self, entry: &EpisodicLogEntry) -> Result<()> {
        let summary_encrypted = self.encryption.encrypt(&entry.summary)?;

        sqlx::query(
            "INSERT INTO episodic_log
             (id, agent, action_type, summary_encrypted, confidence,
              conversation_id, step_index, tool_name, error_type,
              correction_reason, occurred_at, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(entry.id)
        .bind(&entry.agent)
        .bind(entry.action_type.as_str())
        .bind(&summary_encrypted)
        .bind(entry.confidence)
        .bind(&entry.metadata.conversation_id)
        .bind(entry.metadata.step_index)
        .bind(&entry.metadata.tool_name)
        .bind(&entry.metadata.error_type)
        .bind(&entry.metadata.correction_reason)
        .bind(entry.occurred_at)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        debug!(log_id = %entry.id, agent = %entry.agent, "Episodic log appended");
        Ok(())
    }

    pub async fn get_episodic_log(&self, log_id: Uuid) -> Result<Option<EpisodicLogEntry>> {
        let row = sqlx::query("SELECT * FROM episodic_log WHERE id = $1")
            .bind(log_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| self.row_to_episodic(&row)).transpose()
    }

    pub async fn get_recent_episodic_logs(&self, limit: usize) -> Result<Vec<EpisodicLogEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM episodic_log ORDER BY occurred_at DESC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| self.row_to_episodic(row)).collect()
    }

    fn row_to_episodic(&self, row: &sqlx::postgres::PgRow) -> Result<EpisodicLogEntry> {
        let summary_encrypted: String = row.try_get("summary_encrypted")?;
        let action_type: String = row.try_get("action_type")?;

        Ok(EpisodicLogEntry {
            id: row.try_get("id")?,
            agent: row.try_get("agent")?,
            action_type: EpisodicActionType::parse_or_default(&action_type),
            summary: self.encryption.decrypt(&summary_encrypted)?,
            confidence: row.try_get("confidence")?,
            metadata: EpisodicMetadata {
                conversation_id: row.try_get("conversation_id")?,
                step_index: row.try_get("step_index")?,
                tool_name: row.try_get("tool_name")?,
                error_type: row.try_get("error_type")?,
                correction_reason: row.try_get("correction_reason")?,
            },
            occurred_at: row.try_get("occurred_at")?,
            created_at: row.try_get("created_at")?,
        })
    }

    // =========================================================================
    // Memory metadata index
    // =========================================================================

    /// Insert or refresh the index row for a persisted entry.
    pub async fn track_memory(&self, metadata: &MemoryMetadata) -> Result<()> {
        let summary_encrypted = self.encryption.encrypt(&metadata.summary)?;

        sqlx::query(
            "INSERT INTO memory_metadata
             (id, memory_type, store_location, summary_encrypted, source,
              confidence, is_deleted, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (id) DO UPDATE SET
                summary_encrypted = EXCLUDED.summary_encrypted,
                confidence = EXCLUDED.confidence,
                is_deleted = EXCLUDED.is_deleted,
                updated_at = EXCLUDED.updated_at",
        )
        .bind(metadata.id)
        .bind(metadata.memory_type.as_str())
        .bind(metadata.store_location.as_str())
        .bind(&summary_encrypted)
        .bind(metadata.source.as_str())
        .bind(metadata.confidence)
        .bind(metadata.is_deleted)
        .bind(metadata.created_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        debug!(memory_id = %metadata.id, "Memory metadata tracked");
        Ok(())
    }

    pub async fn get_memory_metadata(&self, memory_id: Uuid) -> Result<Option<MemoryMetadata>> {
        let row = sqlx::query("SELECT * FROM memory_metadata WHERE id = $1")
            .bind(memory_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| self.row_to_metadata(&row)).transpose()
    }

    pub async fn list_memory_metadata(
        &self,
        memory_type: Option<MemoryKind>,
        source: Option<MemorySource>,
        include_deleted: bool,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<MemoryMetadata>, usize)> {
        // Filter values come from closed enums, never from user text.
        let mut conditions: Vec<String> = Vec::new();
        if let Some(kind) = memory_type {
            conditions.push(format!("memory_type = '{}'", kind.as_str()));
        }
        if let Some(source) = source {
            conditions.push(format!("source = '{}'", source.as_str()));
        }
        if !include_deleted {
            conditions.push("is_deleted = FALSE".to_string());
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_row = sqlx::query(&format!(
            "SELECT COUNT(*) AS total FROM memory_metadata {where_clause}"
        ))
        .fetch_one(&self.pool)
        .await?;
        let total: i64 = count_row.try_get("total")?;

        let rows = sqlx::query(&format!(
            "SELECT * FROM memory_metadata {where_clause}
             ORDER BY created_at DESC LIMIT $1 OFFSET $2"
        ))
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        let items = rows
            .iter()
            .map(|row| self.row_to_metadata(row))
            .collect::<Result<Vec<_>>>()?;
        Ok((items, total as usize))
    }

    pub async fn soft_delete_memory(&self, memory_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE memory_metadata SET is_deleted = TRUE, updated_at = $2 WHERE id = $1",
        )
        .bind(memory_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Hard-delete the index row. Used to compensate a failed paired write.
    pub async fn delete_memory_metadata(&self, memory_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM memory_metadata WHERE id = $1")
            .bind(memory_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    fn row_to_metadata(&self, row: &sqlx::postgres::PgRow) -> Result<MemoryMetadata> {
        let summary_encrypted: String = row.try_get("summary_encrypted")?;
        let memory_type: String = row.try_get("memory_type")?;
        let store_location: String = row.try_get("store_location")?;
        let source: String = row.try_get("source")?;

        Ok(MemoryMetadata {
            id: row.try_get("id")?,
            memory_type: MemoryKind::parse(&memory_type)
                .ok_or_else(|| anyhow::anyhow!("Unknown memory type: {memory_type}"))?,
            store_location: StoreLocation::parse(&store_location)
                .ok_or_else(|| anyhow::anyhow!("Unknown store location: {store_location}"))?,
            summary: self.encryption.decrypt(&summary_encrypted)?,
            source: MemorySource::parse(&source).unwrap_or(MemorySource::Conversation),
            confidence: row.try_get("confidence")?,
            is_deleted: row.try_get("is_deleted")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    // =========================================================================
    // Reset and health
    // =========================================================================

    /// Truncate every memory and tool table. The profile row survives when
    /// `preserve_profile` is set; either way a default row exists after.
    pub async fn clear_all(&self, preserve_profile: bool) -> Result<()> {
        warn!(preserve_profile, "Clearing all durable memory");

        for table in MEMORY_TABLES.iter().chain(TOOL_TABLES) {
            // Tool tables may not exist yet when the tool subsystem never
            // started.
            let exists_row = sqlx::query("SELECT to_regclass($1) IS NOT NULL AS present")
                .bind(*table)
                .fetch_one(&self.pool)
                .await?;
            let present: bool = exists_row.try_get("present")?;
            if present {
                sqlx::query(&format!("TRUNCATE TABLE {table} CASCADE"))
                    .execute(&self.pool)
                    .await?;
            }
        }

        if !preserve_profile {
            sqlx::query("TRUNCATE TABLE user_profile")
                .execute(&self.pool)
                .await?;
        }

        // A profile row must exist after any reset.
        self.get_user_profile().await?;

        info!("PostgreSQL tables cleared");
        Ok(())
    }

    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }
}
