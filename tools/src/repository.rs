//! Tool repository: persistence of manifests, permissions, executions,
//! state, volumes and the discovery queue, with the lifecycle invariants
//! enforced at this layer.

use anyhow::{anyhow, Result};
use chrono::Utc;
use sqlx::{PgPool, Row};
use tracing::{debug, info, warn};
use uuid::Uuid;

use slovo_core::models::{
    DiscoveryStatus, Entrypoint, ExecutionConfig, ExecutionStatus, ExecutionUpdate,
    PermissionKind, ToolCapability, ToolDiscoveryRequest, ToolExecutionLog, ToolManifest,
    ToolPermission, ToolSource, ToolState, ToolStatus, ToolVolume,
};

pub struct ToolRepository {
    pool: PgPool,
}

impl ToolRepository {
    pub async fn new(pool: PgPool) -> Result<Self> {
        let repo = Self { pool };
        repo.initialize_schema().await?;
        info!("Tool repository initialized");
        Ok(repo)
    }

    async fn initialize_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS tool_manifest (
                id UUID PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                version TEXT NOT NULL,
                description TEXT NOT NULL,
                source TEXT NOT NULL,
                source_locator TEXT NOT NULL,
                status TEXT NOT NULL,
                schema TEXT NOT NULL,
                capabilities TEXT NOT NULL,
                parameters_schema TEXT NOT NULL,
                container_image TEXT,
                entrypoint TEXT,
                timeout_seconds BIGINT NOT NULL,
                approved_at TIMESTAMPTZ,
                revoked_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS tool_permission (
                id UUID PRIMARY KEY,
                manifest_id UUID NOT NULL REFERENCES tool_manifest(id) ON DELETE CASCADE,
                permission_type TEXT NOT NULL,
                permission_value TEXT NOT NULL,
                granted_by TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                UNIQUE (manifest_id, permission_type)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS tool_execution_log (
                id UUID PRIMARY KEY,
                manifest_id UUID NOT NULL REFERENCES tool_manifest(id) ON DELETE CASCADE,
                conversation_id TEXT,
                turn_id TEXT,
                input_params TEXT NOT NULL,
                started_at TIMESTAMPTZ NOT NULL,
                completed_at TIMESTAMPTZ,
                duration_ms BIGINT,
                status TEXT NOT NULL,
                output TEXT,
                error_message TEXT,
                exit_code INTEGER,
                cpu_usage_ms BIGINT,
                memory_peak_mb BIGINT,
                container_ref TEXT
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS tool_state (
                id UUID PRIMARY KEY,
                manifest_id UUID NOT NULL REFERENCES tool_manifest(id) ON DELETE CASCADE,
                state_key TEXT NOT NULL,
                state_value TEXT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                UNIQUE (manifest_id, state_key)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS tool_volume (
                id UUID PRIMARY KEY,
                manifest_id UUID NOT NULL REFERENCES tool_manifest(id) ON DELETE CASCADE,
                volume_name TEXT NOT NULL,
                mount_path TEXT NOT NULL,
                quota_mb BIGINT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS tool_discovery_queue (
                id UUID PRIMARY KEY,
                capability_description TEXT NOT NULL,
                requested_by TEXT NOT NULL,
                status TEXT NOT NULL,
                resolved_manifest_id UUID,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        debug!("Tool schema initialized");
        Ok(())
    }

    // =========================================================================
    // Manifests
    // =========================================================================

    pub async fn create_manifest(&self, manifest: &ToolManifest) -> Result<()> {
        let entrypoint_json = manifest
            .execution
            .entrypoint
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            "INSERT INTO tool_manifest
             (id, name, version, description, source, source_locator, status,
              schema, capabilities, parameters_schema, container_image,
              entrypoint, timeout_seconds, approved_at, revoked_at,
              created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                     $14, $15, $16, $17)",
        )
        .bind(manifest.id)
        .bind(&manifest.name)
        .bind(&manifest.version)
        .bind(&manifest.description)
        .bind(manifest.source.as_str())
        .bind(&manifest.source_locator)
        .bind(manifest.status.as_str())
        .bind(manifest.schema.to_string())
        .bind(serde_json::to_string(&manifest.capabilities)?)
        .bind(manifest.parameters_schema.to_string())
        .bind(&manifest.execution.container_image)
        .bind(entrypoint_json)
        .bind(manifest.execution.timeout_seconds as i64)
        .bind(manifest.approved_at)
        .bind(manifest.revoked_at)
        .bind(manifest.created_at)
        .bind(manifest.updated_at)
        .execute(&self.pool)
        .await?;

        info!(tool = %manifest.name, id = %manifest.id, "Tool manifest created");
        Ok(())
    }

    pub async fn get_manifest(&self, manifest_id: Uuid) -> Result<Option<ToolManifest>> {
        let row = sqlx::query("SELECT * FROM tool_manifest WHERE id = $1")
            .bind(manifest_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| row_to_manifest(&row)).transpose()
    }

    pub async fn get_manifest_by_name(&self, name: &str) -> Result<Option<ToolManifest>> {
        let row = sqlx::query("SELECT * FROM tool_manifest WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| row_to_manifest(&row)).transpose()
    }

    pub async fn list_manifests(
        &self,
        status_filter: Option<ToolStatus>,
    ) -> Result<Vec<ToolManifest>> {
        let rows = match status_filter {
            Some(status) => {
                sqlx::query(
                    "SELECT * FROM tool_manifest WHERE status = $1 ORDER BY created_at DESC",
                )
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM tool_manifest ORDER BY created_at DESC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(row_to_manifest).collect()
    }

    /// Transition a manifest to a new status, stamping `approved_at` and
    /// `revoked_at` on the relevant edges. Illegal transitions are
    /// rejected.
    pub async fn transition_status(
        &self,
        manifest_id: Uuid,
        next: ToolStatus,
    ) -> Result<ToolManifest> {
        let manifest = self
            .get_manifest(manifest_id)
            .await?
            .ok_or_else(|| anyhow!("Tool manifest not found: {manifest_id}"))?;

        if !manifest.status.can_transition_to(next) {
            return Err(anyhow!(
                "Illegal status transition: {} -> {}",
                manifest.status.as_str(),
                next.as_str()
            ));
        }

        let now = Utc::now();
        let approved_at = if next == ToolStatus::Approved {
            Some(now)
        } else {
            manifest.approved_at
        };
        let revoked_at = if next == ToolStatus::Revoked {
            Some(now)
        } else {
            manifest.revoked_at
        };

        sqlx::query(
            "UPDATE tool_manifest SET status = $2, approved_at = $3,
             revoked_at = $4, updated_at = $5 WHERE id = $1",
        )
        .bind(manifest_id)
        .bind(next.as_str())
        .bind(approved_at)
        .bind(revoked_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        info!(
            tool = %manifest.name,
            from = manifest.status.as_str(),
            to = next.as_str(),
            "Tool status transition"
        );

        Ok(ToolManifest {
            status: next,
            approved_at,
            revoked_at,
            updated_at: now,
            ..manifest
        })
    }

    // =========================================================================
    // Permissions
    // =========================================================================

    /// Upsert on (manifest, kind).
    pub async fn upsert_permission(
        &self,
        manifest_id: Uuid,
        kind: PermissionKind,
        value: &str,
        granted_by: &str,
    ) -> Result<ToolPermission> {
        let now = Utc::now();
        let row = sqlx::query(
            "INSERT INTO tool_permission
             (id, manifest_id, permission_type, permission_value, granted_by, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (manifest_id, permission_type) DO UPDATE SET
                permission_value = EXCLUDED.permission_value,
                granted_by = EXCLUDED.granted_by
             RETURNING id, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(manifest_id)
        .bind(kind.as_str())
        .bind(value)
        .bind(granted_by)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(ToolPermission {
            id: row.try_get("id")?,
            manifest_id,
            kind,
            value: value.to_string(),
            granted_by: granted_by.to_string(),
            created_at: row.try_get("created_at")?,
        })
    }

    pub async fn list_permissions(&self, manifest_id: Uuid) -> Result<Vec<ToolPermission>> {
        let rows = sqlx::query("SELECT * FROM tool_permission WHERE manifest_id = $1")
            .bind(manifest_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .filter_map(|row| {
                let kind_str: String = row.try_get("permission_type").ok()?;
                let kind = match PermissionKind::parse(&kind_str) {
                    Some(kind) => kind,
                    None => {
                        warn!("Skipping unknown permission kind: {kind_str}");
                        return None;
                    }
                };
                Some((|| -> Result<ToolPermission> {
                    Ok(ToolPermission {
                        id: row.try_get("id")?,
                        manifest_id: row.try_get("manifest_id")?,
                        kind,
                        value: row.try_get("permission_value")?,
                        granted_by: row.try_get("granted_by")?,
                        created_at: row.try_get("created_at")?,
                    })
                })())
            })
            .collect()
    }

    // =========================================================================
    // Execution logs
    // =========================================================================

    /// Open a log row in `running` state.
    pub async fn create_execution(
        &self,
        manifest_id: Uuid,
        conversation_id: Option<&str>,
        turn_id: Option<&str>,
        input_params: &serde_json::Value,
    ) -> Result<ToolExecutionLog> {
        let log = ToolExecutionLog {
            id: Uuid::new_v4(),
            manifest_id,
            conversation_id: conversation_id.map(str::to_string),
            turn_id: turn_id.map(str::to_string),
            input_params: input_params.clone(),
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            status: ExecutionStatus::Running,
            output: None,
            error_message: None,
            exit_code: None,
            cpu_usage_ms: None,
            memory_peak_mb: None,
            container_ref: None,
        };

        sqlx::query(
            "INSERT INTO tool_execution_log
             (id, manifest_id, conversation_id, turn_id, input_params,
              started_at, status)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(log.id)
        .bind(log.manifest_id)
        .bind(&log.conversation_id)
        .bind(&log.turn_id)
        .bind(log.input_params.to_string())
        .bind(log.started_at)
        .bind(log.status.as_str())
        .execute(&self.pool)
        .await?;

        debug!(execution_id = %log.id, "Execution log opened");
        Ok(log)
    }

    /// Apply the terminal update. The `running` guard makes the
    /// `running -> terminal` transition happen at most once; the duration
    /// is derived from the stored start timestamp.
    pub async fn complete_execution(
        &self,
        execution_id: Uuid,
        update: ExecutionUpdate,
    ) -> Result<ToolExecutionLog> {
        let status = update
            .status
            .ok_or_else(|| anyhow!("Terminal update requires a status"))?;
        if !status.is_terminal() {
            return Err(anyhow!("Execution update must carry a terminal status"));
        }
        let completed_at = update.completed_at.unwrap_or_else(Utc::now);

        let result = sqlx::query(
            "UPDATE tool_execution_log SET
                completed_at = $2,
                duration_ms = EXTRACT(EPOCH FROM ($2 - started_at)) * 1000,
                status = $3,
                output = $4,
                error_message = $5,
                exit_code = $6,
                cpu_usage_ms = $7,
                memory_peak_mb = $8,
                container_ref = $9
             WHERE id = $1 AND status = 'running'",
        )
        .bind(execution_id)
        .bind(completed_at)
        .bind(status.as_str())
        .bind(update.output.as_ref().map(|v| v.to_string()))
        .bind(&update.error_message)
        .bind(update.exit_code)
        .bind(update.cpu_usage_ms)
        .bind(update.memory_peak_mb)
        .bind(&update.container_ref)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(anyhow!(
                "Execution {execution_id} is not running; terminal update refused"
            ));
        }

        self.get_execution(execution_id)
            .await?
            .ok_or_else(|| anyhow!("Execution log vanished: {execution_id}"))
    }

    pub async fn get_execution(&self, execution_id: Uuid) -> Result<Option<ToolExecutionLog>> {
        let row = sqlx::query("SELECT * FROM tool_execution_log WHERE id = $1")
            .bind(execution_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| row_to_execution(&row)).transpose()
    }

    pub async fn list_executions(
        &self,
        manifest_id: Uuid,
        limit: usize,
    ) -> Result<Vec<ToolExecutionLog>> {
        let rows = sqlx::query(
            "SELECT * FROM tool_execution_log WHERE manifest_id = $1
             ORDER BY started_at DESC LIMIT $2",
        )
        .bind(manifest_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_execution).collect()
    }

    // =========================================================================
    // Tool state
    // =========================================================================

    pub async fn upsert_state(
        &self,
        manifest_id: Uuid,
        state_key: &str,
        state_value: &serde_json::Value,
    ) -> Result<ToolState> {
        let now = Utc::now();
        let row = sqlx::query(
            "INSERT INTO tool_state (id, manifest_id, state_key, state_value, updated_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (manifest_id, state_key) DO UPDATE SET
                state_value = EXCLUDED.state_value,
                updated_at = EXCLUDED.updated_at
             RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(manifest_id)
        .bind(state_key)
        .bind(state_value.to_string())
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(ToolState {
            id: row.try_get("id")?,
            manifest_id,
            state_key: state_key.to_string(),
            state_value: state_value.clone(),
            updated_at: now,
        })
    }

    pub async fn get_state(
        &self,
        manifest_id: Uuid,
        state_key: &str,
    ) -> Result<Option<ToolState>> {
        let row = sqlx::query(
            "SELECT * FROM tool_state WHERE manifest_id = $1 AND state_key = $2",
        )
        .bind(manifest_id)
        .bind(state_key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<ToolState> {
            let value_json: String = row.try_get("state_value")?;
            Ok(ToolState {
                id: row.try_get("id")?,
                manifest_id: row.try_get("manifest_id")?,
                state_key: row.try_get("state_key")?,
                state_value: serde_json::from_str(&value_json)?,
                updated_at: row.try_get("updated_at")?,
            })
        })
        .transpose()
    }

    // =========================================================================
    // Volumes
    // =========================================================================

    pub async fn create_volume(
        &self,
        manifest_id: Uuid,
        volume_name: &str,
        mount_path: &str,
        quota_mb: i64,
    ) -> Result<ToolVolume> {
        let volume = ToolVolume {
            id: Uuid::new_v4(),
            manifest_id,
            volume_name: volume_name.to_string(),
            mount_path: mount_path.to_string(),
            quota_mb,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO tool_volume
             (id, manifest_id, volume_name, mount_path, quota_mb, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(volume.id)
        .bind(volume.manifest_id)
        .bind(&volume.volume_name)
        .bind(&volume.mount_path)
        .bind(volume.quota_mb)
        .bind(volume.created_at)
        .execute(&self.pool)
        .await?;

        Ok(volume)
    }

    pub async fn list_volumes(&self, manifest_id: Uuid) -> Result<Vec<ToolVolume>> {
        let rows = sqlx::query("SELECT * FROM tool_volume WHERE manifest_id = $1")
            .bind(manifest_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<ToolVolume> {
                Ok(ToolVolume {
                    id: row.try_get("id")?,
                    manifest_id: row.try_get("manifest_id")?,
                    volume_name: row.try_get("volume_name")?,
                    mount_path: row.try_get("mount_path")?,
                    quota_mb: row.try_get("quota_mb")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    pub async fn delete_volumes(&self, manifest_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM tool_volume WHERE manifest_id = $1")
            .bind(manifest_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // =========================================================================
    // Discovery queue
    // =========================================================================

    pub async fn create_discovery_request(
        &self,
        capability_description: &str,
        requested_by: &str,
    ) -> Result<ToolDiscoveryRequest> {
        let now = Utc::now();
        let request = ToolDiscoveryRequest {
            id: Uuid::new_v4(),
            capability_description: capability_description.to_string(),
            requested_by: requested_by.to_string(),
            status: DiscoveryStatus::Pending,
            resolved_manifest_id: None,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            "INSERT INTO tool_discovery_queue
             (id, capability_description, requested_by, status,
              resolved_manifest_id, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(request.id)
        .bind(&request.capability_description)
        .bind(&request.requested_by)
        .bind(request.status.as_str())
        .bind(request.resolved_manifest_id)
        .bind(request.created_at)
        .bind(request.updated_at)
        .execute(&self.pool)
        .await?;

        info!(request_id = %request.id, "Discovery request queued");
        Ok(request)
    }

    pub async fn update_discovery_request(
        &self,
        request_id: Uuid,
        status: DiscoveryStatus,
        resolved_manifest_id: Option<Uuid>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE tool_discovery_queue SET status = $2,
             resolved_manifest_id = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(request_id)
        .bind(status.as_str())
        .bind(resolved_manifest_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_discovery_requests(
        &self,
        status_filter: Option<DiscoveryStatus>,
    ) -> Result<Vec<ToolDiscoveryRequest>> {
        let rows = match status_filter {
            Some(status) => {
                sqlx::query(
                    "SELECT * FROM tool_discovery_queue WHERE status = $1
                     ORDER BY created_at DESC",
                )
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM tool_discovery_queue ORDER BY created_at DESC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.iter()
            .map(|row| -> Result<ToolDiscoveryRequest> {
                let status: String = row.try_get("status")?;
                Ok(ToolDiscoveryRequest {
                    id: row.try_get("id")?,
                    capability_description: row.try_get("capability_description")?,
                    requested_by: row.try_get("requested_by")?,
                    status: DiscoveryStatus::parse(&status)
                        .unwrap_or(DiscoveryStatus::Pending),
                    resolved_manifest_id: row.try_get("resolved_manifest_id")?,
                    created_at: row.try_get("created_at")?,
                    updated_at: row.try_get("updated_at")?,
                })
            })
            .collect()
    }
}

fn row_to_manifest(row: &sqlx::postgres::PgRow) -> Result<ToolManifest> {
    let source: String = row.try_get("source")?;
    let status: String = row.try_get("status")?;
    let schema_json: String = row.try_get("schema")?;
    let capabilities_json: String = row.try_get("capabilities")?;
    let parameters_json: String = row.try_get("parameters_schema")?;
    let entrypoint_json: Option<String> = row.try_get("entrypoint")?;
    let timeout: i64 = row.try_get("timeout_seconds")?;

    let capabilities: Vec<ToolCapability> = serde_json::from_str(&capabilities_json)?;
    let entrypoint: Option<Entrypoint> = entrypoint_json
        .map(|json| serde_json::from_str(&json))
        .transpose()?;

    Ok(ToolManifest {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        version: row.try_get("version")?,
        description: row.try_get("description")?,
        source: ToolSource::parse(&source).unwrap_or(ToolSource::Local),
        source_locator: row.try_get("source_locator")?,
        status: ToolStatus::parse(&status)
            .ok_or_else(|| anyhow!("Unknown tool status: {status}"))?,
        schema: serde_json::from_str(&schema_json).unwrap_or(serde_json::Value::Null),
        capabilities,
        parameters_schema: serde_json::from_str(&parameters_json)
            .unwrap_or(serde_json::Value::Null),
        execution: ExecutionConfig {
            container_image: row.try_get("container_image")?,
            entrypoint,
            timeout_seconds: timeout as u64,
        },
        approved_at: row.try_get("approved_at")?,
        revoked_at: row.try_get("revoked_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_execution(row: &sqlx::postgres::PgRow) -> Result<ToolExecutionLog> {
    let status: String = row.try_get("status")?;
    let input_json: String = row.try_get("input_params")?;
    let output_json: Option<String> = row.try_get("output")?;
    let duration_ms: Option<i64> = row.try_get("duration_ms")?;

    Ok(ToolExecutionLog {
        id: row.try_get("id")?,
        manifest_id: row.try_get("manifest_id")?,
        conversation_id: row.try_get("conversation_id")?,
        turn_id: row.try_get("turn_id")?,
        input_params: serde_json::from_str(&input_json).unwrap_or(serde_json::Value::Null),
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        duration_ms,
        status: ExecutionStatus::parse(&status)
            .ok_or_else(|| anyhow!("Unknown execution status: {status}"))?,
        output: output_json
            .map(|json| serde_json::from_str(&json))
            .transpose()?,
        error_message: row.try_get("error_message")?,
        exit_code: row.try_get("exit_code")?,
        cpu_usage_ms: row.try_get("cpu_usage_ms")?,
        memory_peak_mb: row.try_get("memory_peak_mb")?,
        container_ref: row.try_get("container_ref")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    async fn repo() -> ToolRepository {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect("postgresql://localhost:5432/slovo_test")
            .await
            .unwrap();
        ToolRepository::new(pool).await.unwrap()
    }

    fn sample_manifest(name: &str) -> ToolManifest {
        let now = Utc::now();
        ToolManifest {
            id: Uuid::new_v4(),
            name: name.to_string(),
            version: "1.0.0".to_string(),
            description: "test tool".to_string(),
            source: ToolSource::Local,
            source_locator: "/tmp/manifest.json".to_string(),
            status: ToolStatus::PendingApproval,
            schema: serde_json::json!({}),
            capabilities: vec![],
            parameters_schema: serde_json::json!({"type": "object"}),
            execution: ExecutionConfig::default(),
            approved_at: None,
            revoked_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    // Integration tests require a running PostgreSQL server.
    #[tokio::test]
    #[ignore]
    async fn test_manifest_lifecycle_stamps_timestamps() {
        let repo = repo().await;
        let manifest = sample_manifest(&format!("tool-{}", Uuid::new_v4()));
        repo.create_manifest(&manifest).await.unwrap();

        let approved = repo
            .transition_status(manifest.id, ToolStatus::Approved)
            .await
            .unwrap();
        assert!(approved.approved_at.is_some());

        // pending -> active is illegal.
        let other = sample_manifest(&format!("tool-{}", Uuid::new_v4()));
        repo.create_manifest(&other).await.unwrap();
        assert!(repo
            .transition_status(other.id, ToolStatus::Active)
            .await
            .is_err());

        let revoked = repo
            .transition_status(manifest.id, ToolStatus::Revoked)
            .await
            .unwrap();
        assert!(revoked.revoked_at.is_some());
    }

    #[tokio::test]
    #[ignore]
    async fn test_execution_log_updates_exactly_once() {
        let repo = repo().await;
        let manifest = sample_manifest(&format!("tool-{}", Uuid::new_v4()));
        repo.create_manifest(&manifest).await.unwrap();

        let log = repo
            .create_execution(manifest.id, Some("c1"), None, &serde_json::json!({"x": 1}))
            .await
            .unwrap();
        assert_eq!(log.status, ExecutionStatus::Running);

        let done = repo
            .complete_execution(
                log.id,
                ExecutionUpdate {
                    status: Some(ExecutionStatus::Success),
                    exit_code: Some(0),
                    output: Some(serde_json::json!({"stdout": "ok"})),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(done.status, ExecutionStatus::Success);
        assert!(done.completed_at.unwrap() >= done.started_at);
        assert!(done.duration_ms.unwrap() >= 0);

        // Second terminal update must be refused.
        assert!(repo
            .complete_execution(
                log.id,
                ExecutionUpdate {
                    status: Some(ExecutionStatus::Failure),
                    ..Default::default()
                },
            )
            .await
            .is_err());
    }

    #[tokio::test]
    #[ignore]
    async fn test_state_upserts_on_manifest_and_key() {
        let repo = repo().await;
        let manifest = sample_manifest(&format!("tool-{}", Uuid::new_v4()));
        repo.create_manifest(&manifest).await.unwrap();

        let first = repo
            .upsert_state(manifest.id, "cursor", &serde_json::json!({"page": 1}))
            .await
            .unwrap();
        let second = repo
            .upsert_state(manifest.id, "cursor", &serde_json::json!({"page": 2}))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);

        let read = repo.get_state(manifest.id, "cursor").await.unwrap().unwrap();
        assert_eq!(read.state_value["page"], 2);
        assert!(repo.get_state(manifest.id, "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore]
    async fn test_discovery_queue_transitions() {
        let repo = repo().await;

        let request = repo
            .create_discovery_request("look up stock prices", "executor")
            .await
            .unwrap();
        assert_eq!(request.status, DiscoveryStatus::Pending);

        let manifest = sample_manifest(&format!("tool-{}", Uuid::new_v4()));
        repo.create_manifest(&manifest).await.unwrap();

        assert!(repo
            .update_discovery_request(request.id, DiscoveryStatus::Found, Some(manifest.id))
            .await
            .unwrap());

        let found = repo
            .list_discovery_requests(Some(DiscoveryStatus::Found))
            .await
            .unwrap();
        let resolved = found.iter().find(|r| r.id == request.id).unwrap();
        assert_eq!(resolved.resolved_manifest_id, Some(manifest.id));
    }

    #[tokio::test]
    #[ignore]
    async fn test_permission_upsert_is_unique_per_kind() {
        let repo = repo().await;
        let manifest = sample_manifest(&format!("tool-{}", Uuid::new_v4()));
        repo.create_manifest(&manifest).await.unwrap();

        repo.upsert_permission(manifest.id, PermissionKind::CpuCap, "50", "operator")
            .await
            .unwrap();
        repo.upsert_permission(manifest.id, PermissionKind::CpuCap, "75", "operator")
            .await
            .unwrap();

        let permissions = repo.list_permissions(manifest.id).await.unwrap();
        let cpu: Vec<_> = permissions
            .iter()
            .filter(|p| p.kind == PermissionKind::CpuCap)
            .collect();
        assert_eq!(cpu.len(), 1);
        assert_eq!(cpu[0].value, "75");
    }
}
