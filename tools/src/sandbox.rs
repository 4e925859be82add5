//! Docker sandbox for isolated tool execution.
//!
//! Each invocation runs in its own container with the network, CPU,
//! memory and filesystem policy derived deterministically from the
//! manifest and its granted permissions. Input parameters travel in an
//! environment variable, never on the command line. One execution log row
//! is opened per invocation and terminally updated exactly once.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use tokio::process::Command;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use slovo_core::models::{
    ExecutionStatus, ExecutionUpdate, PermissionKind, ToolExecutionLog, ToolManifest,
    ToolPermission, DEFAULT_TOOL_TIMEOUT_SECONDS,
};

use crate::repository::ToolRepository;

const FALLBACK_IMAGE: &str = "python:3.11-slim";
const VOLUME_MOUNT_PATH: &str = "/data";
const PARAMS_ENV_VAR: &str = "TOOL_PARAMS";

const DEFAULT_CPU_PERCENT: u64 = 50;
const DEFAULT_MEMORY_MB: u64 = 512;
const DEFAULT_VOLUME_QUOTA_MB: i64 = 1024;

/// Result of one sandboxed invocation, mirroring the terminal log row.
#[derive(Debug, Clone)]
pub struct SandboxOutcome {
    pub execution_id: Uuid,
    pub status: ExecutionStatus,
    pub output: serde_json::Value,
    pub error_message: Option<String>,
    pub duration_ms: i64,
    pub exit_code: Option<i32>,
}

pub struct DockerSandbox {
    repo: Arc<ToolRepository>,
}

impl DockerSandbox {
    /// Probe the Docker daemon. Unavailability is fatal for the sandbox
    /// only; the host process degrades to "tool execution unavailable".
    pub async fn new(repo: Arc<ToolRepository>) -> Result<Self> {
        let probe = Command::new("docker")
            .args(["version", "--format", "{{.Server.Version}}"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .context("Docker CLI not found")?;

        if !probe.status.success() {
            return Err(anyhow!(
                "Docker daemon not available: {}",
                String::from_utf8_lossy(&probe.stderr).trim()
            ));
        }

        info!(
            version = %String::from_utf8_lossy(&probe.stdout).trim(),
            "Docker sandbox initialized"
        );
        Ok(Self { repo })
    }

    /// Execute an approved manifest in an isolated container.
    pub async fn execute_tool(
        &self,
        manifest: &ToolManifest,
        permissions: &[ToolPermission],
        input_params: &serde_json::Value,
        conversation_id: Option<&str>,
        turn_id: Option<&str>,
    ) -> Result<SandboxOutcome> {
        if !manifest.status.is_executable() {
            return Err(anyhow!(
                "Tool '{}' is not executable in status {}",
                manifest.name,
                manifest.status.as_str()
            ));
        }

        info!(tool = %manifest.name, id = %manifest.id, "Starting tool execution");

        let log = self
            .repo
            .create_execution(manifest.id, conversation_id, turn_id, input_params)
            .await?;

        match self.run_container(manifest, permissions, input_params, &log).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                // Container never produced a result: record the failure on
                // the open log row.
                error!(tool = %manifest.name, "Tool execution failed: {e}");
                let _ = self
                    .repo
                    .complete_execution(
                        log.id,
                        ExecutionUpdate {
                            status: Some(ExecutionStatus::Failure),
                            error_message: Some(e.to_string()),
                            ..Default::default()
                        },
                    )
                    .await;
                Err(e)
            }
        }
    }

    async fn run_container(
        &self,
        manifest: &ToolManifest,
        permissions: &[ToolPermission],
        input_params: &serde_json::Value,
        log: &ToolExecutionLog,
    ) -> Result<SandboxOutcome> {
        let container_name = format!("slovo-run-{}", log.id);
        let volume_name = self.ensure_volume(manifest, permissions).await?;
        let args = build_docker_args(
            manifest,
            permissions,
            input_params,
            &container_name,
            volume_name.as_deref(),
        );

        debug!(tool = %manifest.name, container = %container_name, "Running container");

        let timeout_seconds = if manifest.execution.timeout_seconds == 0 {
            DEFAULT_TOOL_TIMEOUT_SECONDS
        } else {
            manifest.execution.timeout_seconds
        };

        let start = std::time::Instant::now();
        let child = Command::new("docker")
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context("Failed to spawn docker run")?;

        let waited = tokio::time::timeout(
            Duration::from_secs(timeout_seconds),
            child.wait_with_output(),
        )
        .await;

        let outcome = match waited {
            Ok(output) => {
                let output = output.context("Failed to wait for container")?;
                let duration_ms = start.elapsed().as_millis() as i64;
                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                let exit_code = output.status.code();

                let (status, error_message) = if output.status.success() {
                    (ExecutionStatus::Success, None)
                } else {
                    (
                        ExecutionStatus::Failure,
                        Some(format!("Container exited with code {exit_code:?}")),
                    )
                };

                let payload = serde_json::json!({"stdout": stdout, "stderr": stderr});
                let completed = self
                    .repo
                    .complete_execution(
                        log.id,
                        ExecutionUpdate {
                            completed_at: Some(Utc::now()),
                            status: Some(status),
                            output: Some(payload.clone()),
                            error_message: error_message.clone(),
                            exit_code,
                            container_ref: Some(container_name.clone()),
                            ..Default::default()
                        },
                    )
                    .await?;

                info!(
                    tool = %manifest.name,
                    execution_id = %log.id,
                    status = status.as_str(),
                    duration_ms,
                    "Tool execution completed"
                );

                SandboxOutcome {
                    execution_id: log.id,
                    status,
                    output: payload,
                    error_message,
                    duration_ms: completed.duration_ms.unwrap_or(duration_ms),
                    exit_code,
                }
            }
            Err(_) => {
                // Deadline passed: force-kill the container and record the
                // timeout. The exit code is undefined.
                warn!(tool = %manifest.name, timeout_seconds, "Tool execution timed out");
                let _ = Command::new("docker")
                    .args(["kill", &container_name])
                    .output()
                    .await;

                let duration_ms = start.elapsed().as_millis() as i64;
                let message = format!("Execution exceeded {timeout_seconds}s timeout");
                self.repo
                    .complete_execution(
                        log.id,
                        ExecutionUpdate {
                            completed_at: Some(Utc::now()),
                            status: Some(ExecutionStatus::Timeout),
                            error_message: Some(message.clone()),
                            container_ref: Some(container_name.clone()),
                            ..Default::default()
                        },
                    )
                    .await?;

                SandboxOutcome {
                    execution_id: log.id,
                    status: ExecutionStatus::Timeout,
                    output: serde_json::Value::Null,
                    error_message: Some(message),
                    duration_ms,
                    exit_code: None,
                }
            }
        };

        // Containers are removed after log collection, best effort.
        let _ = Command::new("docker")
            .args(["rm", "-f", &container_name])
            .output()
            .await;

        Ok(outcome)
    }

    /// Create the tool-scoped named volume on first use; it persists
    /// across invocations.
    async fn ensure_volume(
        &self,
        manifest: &ToolManifest,
        permissions: &[ToolPermission],
    ) -> Result<Option<String>> {
        let existing = self.repo.list_volumes(manifest.id).await?;
        if let Some(volume) = existing.first() {
            return Ok(Some(volume.volume_name.clone()));
        }

        let volume_name = format!("slovo-tool-{}", manifest.id);
        let created = Command::new("docker")
            .args(["volume", "create", &volume_name])
            .output()
            .await
            .context("Failed to create docker volume")?;
        if !created.status.success() {
            warn!(
                volume = %volume_name,
                "Volume creation failed: {}",
                String::from_utf8_lossy(&created.stderr).trim()
            );
            return Ok(None);
        }

        let quota = permission_map(permissions)
            .get(&PermissionKind::StorageQuota)
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_VOLUME_QUOTA_MB);
        self.repo
            .create_volume(manifest.id, &volume_name, VOLUME_MOUNT_PATH, quota)
            .await?;

        info!(volume = %volume_name, "Docker volume created");
        Ok(Some(volume_name))
    }

    /// Remove a revoked tool's volumes, best effort.
    pub async fn cleanup_tool_resources(&self, manifest_id: Uuid) -> Result<()> {
        info!(tool_id = %manifest_id, "Cleaning up tool resources");

        for volume in self.repo.list_volumes(manifest_id).await? {
            let removed = Command::new("docker")
                .args(["volume", "rm", "-f", &volume.volume_name])
                .output()
                .await;
            match removed {
                Ok(output) if output.status.success() => {
                    info!(volume = %volume.volume_name, "Volume removed");
                }
                Ok(output) => warn!(
                    volume = %volume.volume_name,
                    "Failed to remove volume: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
                Err(e) => warn!(volume = %volume.volume_name, "Failed to remove volume: {e}"),
            }
        }
        self.repo.delete_volumes(manifest_id).await?;
        Ok(())
    }
}

fn permission_map(permissions: &[ToolPermission]) -> HashMap<PermissionKind, String> {
    permissions
        .iter()
        .map(|p| (p.kind, p.value.clone()))
        .collect()
}

/// Build the full `docker run` argument vector for one invocation.
///
/// Policy derivation:
/// - network `none` unless internet access was granted, then `bridge`
/// - CPU quota `(cap/100) * 100000us` per 100000us period
/// - memory cap with swap pinned to the same value
/// - read-only root, all capabilities dropped, no privilege escalation
/// - tool volume mounted at a fixed path
/// - input parameters passed through an environment variable
fn build_docker_args(
    manifest: &ToolManifest,
    permissions: &[ToolPermission],
    input_params: &serde_json::Value,
    container_name: &str,
    volume_name: Option<&str>,
) -> Vec<String> {
    let permission_map = permission_map(permissions);

    let network = if permission_map
        .get(&PermissionKind::InternetAccess)
        .map(String::as_str)
        == Some("true")
    {
        "bridge"
    } else {
        "none"
    };

    let cpu_percent: u64 = permission_map
        .get(&PermissionKind::CpuCap)
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_CPU_PERCENT);
    let cpu_quota = cpu_percent * 100_000 / 100;

    let memory_mb: u64 = permission_map
        .get(&PermissionKind::MemoryCap)
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_MEMORY_MB);

    let mut args: Vec<String> = vec![
        "run".into(),
        "--name".into(),
        container_name.into(),
        "--network".into(),
        network.into(),
        "--cpu-period".into(),
        "100000".into(),
        "--cpu-quota".into(),
        cpu_quota.to_string(),
        "-m".into(),
        format!("{memory_mb}m"),
        "--memory-swap".into(),
        format!("{memory_mb}m"),
        "--read-only".into(),
        "--cap-drop".into(),
        "ALL".into(),
        "--security-opt".into(),
        "no-new-privileges".into(),
        "-e".into(),
        format!("{PARAMS_ENV_VAR}={input_params}"),
    ];

    if let Some(volume) = volume_name {
        args.push("-v".into());
        args.push(format!("{volume}:{VOLUME_MOUNT_PATH}"));
    }

    args.push(
        manifest
            .execution
            .container_image
            .clone()
            .unwrap_or_else(|| FALLBACK_IMAGE.to_string()),
    );

    match &manifest.execution.entrypoint {
        Some(entrypoint) => args.extend(entrypoint.to_argv()),
        None => {
            // Default command echoes the parameters back as JSON.
            args.extend([
                "sh".to_string(),
                "-c".to_string(),
                format!("echo \"${PARAMS_ENV_VAR}\""),
            ]);
        }
    }

    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use slovo_core::models::{Entrypoint, ExecutionConfig, ToolSource, ToolStatus};

    fn manifest(image: Option<&str>, entrypoint: Option<Entrypoint>) -> ToolManifest {
        let now = Utc::now();
        ToolManifest {
            id: Uuid::new_v4(),
            name: "echo".to_string(),
            version: "1.0.0".to_string(),
            description: "echo tool".to_string(),
            source: ToolSource::Local,
            source_locator: "test".to_string(),
            status: ToolStatus::Approved,
            schema: serde_json::json!({}),
            capabilities: vec![],
            parameters_schema: serde_json::json!({}),
            execution: ExecutionConfig {
                container_image: image.map(str::to_string),
                entrypoint,
                timeout_seconds: 30,
            },
            approved_at: Some(now),
            revoked_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn permission(kind: PermissionKind, value: &str) -> ToolPermission {
        ToolPermission {
            id: Uuid::new_v4(),
            manifest_id: Uuid::new_v4(),
            kind,
            value: value.to_string(),
            granted_by: "test".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn network_defaults_to_none() {
        let args = build_docker_args(
            &manifest(None, None),
            &[],
            &serde_json::json!({}),
            "slovo-run-x",
            None,
        );
        let network_index = args.iter().position(|a| a == "--network").unwrap();
        assert_eq!(args[network_index + 1], "none");
    }

    #[test]
    fn internet_access_switches_to_bridge() {
        let args = build_docker_args(
            &manifest(None, None),
            &[permission(PermissionKind::InternetAccess, "true")],
            &serde_json::json!({}),
            "slovo-run-x",
            None,
        );
        let network_index = args.iter().position(|a| a == "--network").unwrap();
        assert_eq!(args[network_index + 1], "bridge");
    }

    #[test]
    fn cpu_and_memory_caps_derive_from_permissions() {
        let args = build_docker_args(
            &manifest(None, None),
            &[
                permission(PermissionKind::CpuCap, "25"),
                permission(PermissionKind::MemoryCap, "128"),
            ],
            &serde_json::json!({}),
            "slovo-run-x",
            None,
        );

        let quota_index = args.iter().position(|a| a == "--cpu-quota").unwrap();
        assert_eq!(args[quota_index + 1], "25000");

        let mem_index = args.iter().position(|a| a == "-m").unwrap();
        assert_eq!(args[mem_index + 1], "128m");
        let swap_index = args.iter().position(|a| a == "--memory-swap").unwrap();
        assert_eq!(args[swap_index + 1], "128m");
    }

    #[test]
    fn isolation_flags_are_always_present() {
        let args = build_docker_args(
            &manifest(None, None),
            &[],
            &serde_json::json!({}),
            "slovo-run-x",
            Some("slovo-tool-v"),
        );
        assert!(args.contains(&"--read-only".to_string()));
        assert!(args.contains(&"ALL".to_string()));
        assert!(args.contains(&"no-new-privileges".to_string()));
        assert!(args.contains(&"slovo-tool-v:/data".to_string()));
    }

    #[test]
    fn params_ride_in_env_not_command_line() {
        let params = serde_json::json!({"city": "Kyiv; rm -rf /"});
        let args = build_docker_args(
            &manifest(Some("alpine"), Some(Entrypoint::Command("cat /data/x".into()))),
            &[],
            &params,
            "slovo-run-x",
            None,
        );

        let env_index = args.iter().position(|a| a == "-e").unwrap();
        assert!(args[env_index + 1].starts_with("TOOL_PARAMS="));
        // The parameter payload appears only in the env assignment.
        let after_image: Vec<_> = args
            .iter()
            .skip(args.iter().position(|a| a == "alpine").unwrap() + 1)
            .collect();
        assert_eq!(after_image, vec!["cat", "/data/x"]);
    }

    #[test]
    fn fallback_command_echoes_params() {
        let args = build_docker_args(
            &manifest(None, None),
            &[],
            &serde_json::json!({}),
            "slovo-run-x",
            None,
        );
        assert!(args.contains(&FALLBACK_IMAGE.to_string()));
        assert_eq!(args.last().unwrap(), "echo \"$TOOL_PARAMS\"");
    }
}
