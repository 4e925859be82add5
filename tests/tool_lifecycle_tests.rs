//! Tool lifecycle and sandbox isolation scenarios. These require a
//! running PostgreSQL server and a reachable Docker daemon, so they are
//! ignored by default.

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use slovo_core::models::{ExecutionStatus, PermissionKind, ToolStatus};
use slovo_tools::{DockerSandbox, ToolDiscoveryAgent, ToolRepository};

const DATABASE_URL: &str = "postgresql://localhost:5432/slovo_test";

async fn repo() -> Arc<ToolRepository> {
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(DATABASE_URL)
        .await
        .expect("postgres must be running for this test");
    Arc::new(ToolRepository::new(pool).await.unwrap())
}

fn echo_manifest_json(name: &str) -> String {
    format!(
        r#"{{
            "name": "{name}",
            "version": "1.0.0",
            "description": "Echoes its input parameters",
            "capabilities": [{{"name": "echo", "description": "Echo parameters"}}],
            "parameters_schema": {{"type": "object"}},
            "permissions": {{
                "internet_access": false,
                "storage_quota_mb": 64,
                "cpu_limit_percent": 25,
                "memory_limit_mb": 64
            }},
            "execution": {{
                "type": "docker",
                "image": "python:3.11-slim",
                "timeout": 30
            }}
        }}"#
    )
}

#[tokio::test]
#[ignore]
async fn tool_lifecycle_gates_execution() {
    let repo = repo().await;
    let discovery = ToolDiscoveryAgent::new(repo.clone(), None);

    let name = format!("echo-{}", Uuid::new_v4());
    let dir = tempfile::tempdir().unwrap();
    let manifest_path = dir.path().join("manifest.json");
    std::fs::write(&manifest_path, echo_manifest_json(&name)).unwrap();

    // Import lands in pending_approval.
    let manifest_id = discovery.import_local_manifest(&manifest_path).await.unwrap();
    let manifest = repo.get_manifest(manifest_id).await.unwrap().unwrap();
    assert_eq!(manifest.status, ToolStatus::PendingApproval);

    // Execution is refused while pending.
    let sandbox = DockerSandbox::new(repo.clone()).await.unwrap();
    let permissions = repo.list_permissions(manifest_id).await.unwrap();
    let refused = sandbox
        .execute_tool(&manifest, &permissions, &serde_json::json!({}), None, None)
        .await;
    assert!(refused.is_err());

    // Approval enables execution; one log row, success, positive duration.
    let approved = repo
        .transition_status(manifest_id, ToolStatus::Approved)
        .await
        .unwrap();
    assert!(approved.approved_at.is_some());

    let outcome = sandbox
        .execute_tool(
            &approved,
            &permissions,
            &serde_json::json!({"city": "Kyiv"}),
            Some("c1"),
            None,
        )
        .await
        .unwrap();
    assert_eq!(outcome.status, ExecutionStatus::Success);
    assert!(outcome.duration_ms > 0);

    let logs = repo.list_executions(manifest_id, 10).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, ExecutionStatus::Success);
    assert!(logs[0].completed_at.unwrap() >= logs[0].started_at);
    assert!(logs[0].duration_ms.unwrap() > 0);

    // Revocation refuses further execution and schedules volume cleanup.
    let revoked = repo
        .transition_status(manifest_id, ToolStatus::Revoked)
        .await
        .unwrap();
    assert!(revoked.revoked_at.is_some());

    let refused = sandbox
        .execute_tool(&revoked, &permissions, &serde_json::json!({}), None, None)
        .await;
    assert!(refused.is_err());

    sandbox.cleanup_tool_resources(manifest_id).await.unwrap();
    assert!(repo.list_volumes(manifest_id).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore]
async fn sandbox_passes_params_through_environment() {
    let repo = repo().await;
    let discovery = ToolDiscoveryAgent::new(repo.clone(), None);

    let name = format!("echo-{}", Uuid::new_v4());
    let dir = tempfile::tempdir().unwrap();
    let manifest_path = dir.path().join("manifest.json");
    std::fs::write(&manifest_path, echo_manifest_json(&name)).unwrap();

    let manifest_id = discovery.import_local_manifest(&manifest_path).await.unwrap();
    repo.transition_status(manifest_id, ToolStatus::Approved)
        .await
        .unwrap();
    let manifest = repo.get_manifest(manifest_id).await.unwrap().unwrap();
    let permissions = repo.list_permissions(manifest_id).await.unwrap();
    assert!(permissions
        .iter()
        .any(|p| p.kind == PermissionKind::InternetAccess && p.value == "false"));

    let sandbox = DockerSandbox::new(repo.clone()).await.unwrap();
    let params = serde_json::json!({"city": "Kyiv", "units": "metric"});
    let outcome = sandbox
        .execute_tool(&manifest, &permissions, &params, None, None)
        .await
        .unwrap();

    // The default entrypoint echoes TOOL_PARAMS; stdout must parse back
    // to the input parameter map.
    assert_eq!(outcome.exit_code, Some(0));
    let stdout = outcome.output["stdout"].as_str().unwrap();
    let echoed: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    assert_eq!(echoed, params);

    // Duration stays within 1.5x the manifest timeout.
    assert!(outcome.duration_ms <= (manifest.execution.timeout_seconds as i64) * 1500);

    repo.transition_status(manifest_id, ToolStatus::Revoked)
        .await
        .unwrap();
    sandbox.cleanup_tool_resources(manifest_id).await.unwrap();
}
