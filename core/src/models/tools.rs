//! Tool lifecycle records: manifests, permissions, execution logs, state,
//! volumes and the discovery queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a manifest came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolSource {
    Local,
    OpenapiUrl,
    Discovered,
}

impl ToolSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolSource::Local => "local",
            ToolSource::OpenapiUrl => "openapi_url",
            ToolSource::Discovered => "discovered",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "local" => Some(ToolSource::Local),
            "openapi_url" => Some(ToolSource::OpenapiUrl),
            "discovered" => Some(ToolSource::Discovered),
            _ => None,
        }
    }
}

/// Manifest lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    PendingApproval,
    Approved,
    Active,
    Disabled,
    Revoked,
}

impl ToolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolStatus::PendingApproval => "pending_approval",
            ToolStatus::Approved => "approved",
            ToolStatus::Active => "active",
            ToolStatus::Disabled => "disabled",
            ToolStatus::Revoked => "revoked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending_approval" => Some(ToolStatus::PendingApproval),
            "approved" => Some(ToolStatus::Approved),
            "active" => Some(ToolStatus::Active),
            "disabled" => Some(ToolStatus::Disabled),
            "revoked" => Some(ToolStatus::Revoked),
            _ => None,
        }
    }

    /// Whether a manifest in this status may be executed in the sandbox.
    pub fn is_executable(&self) -> bool {
        matches!(self, ToolStatus::Approved | ToolStatus::Active)
    }

    /// Allowed lifecycle transitions:
    /// `pending_approval -> approved -> active`, any -> `revoked`,
    /// `approved <-> disabled`.
    pub fn can_transition_to(&self, next: ToolStatus) -> bool {
        if next == ToolStatus::Revoked {
            return *self != ToolStatus::Revoked;
        }
        matches!(
            (self, next),
            (ToolStatus::PendingApproval, ToolStatus::Approved)
                | (ToolStatus::Approved, ToolStatus::Active)
                | (ToolStatus::Approved, ToolStatus::Disabled)
                | (ToolStatus::Disabled, ToolStatus::Approved)
        )
    }
}

/// Declared capability of a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCapability {
    pub name: String,
    pub description: String,
}

/// Container entrypoint: a shell-style string or an explicit argv.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Entrypoint {
    Command(String),
    Argv(Vec<String>),
}

impl Entrypoint {
    /// Tokenised argv: strings are whitespace-split, lists pass verbatim.
    pub fn to_argv(&self) -> Vec<String> {
        match self {
            Entrypoint::Command(s) => s.split_whitespace().map(str::to_string).collect(),
            Entrypoint::Argv(v) => v.clone(),
        }
    }
}

pub const DEFAULT_TOOL_TIMEOUT_SECONDS: u64 = 30;

/// How a tool is launched inside its sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    pub container_image: Option<String>,
    pub entrypoint: Option<Entrypoint>,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

fn default_timeout() -> u64 {
    DEFAULT_TOOL_TIMEOUT_SECONDS
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            container_image: None,
            entrypoint: None,
            timeout_seconds: DEFAULT_TOOL_TIMEOUT_SECONDS,
        }
    }
}

/// Persistent declaration of a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolManifest {
    pub id: Uuid,
    pub name: String,
    pub version: String,
    pub description: String,
    pub source: ToolSource,
    /// File path or URL the manifest was ingested from.
    pub source_locator: String,
    pub status: ToolStatus,
    /// Opaque original descriptor payload.
    pub schema: serde_json::Value,
    pub capabilities: Vec<ToolCapability>,
    pub parameters_schema: serde_json::Value,
    pub execution: ExecutionConfig,
    pub approved_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Permission kinds grantable to a manifest; unique per (manifest, kind).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionKind {
    InternetAccess,
    StorageQuota,
    CpuCap,
    MemoryCap,
}

impl PermissionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionKind::InternetAccess => "internet_access",
            PermissionKind::StorageQuota => "storage_quota",
            PermissionKind::CpuCap => "cpu_cap",
            PermissionKind::MemoryCap => "memory_cap",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "internet_access" => Some(PermissionKind::InternetAccess),
            "storage_quota" => Some(PermissionKind::StorageQuota),
            "cpu_cap" => Some(PermissionKind::CpuCap),
            "memory_cap" => Some(PermissionKind::MemoryCap),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolPermission {
    pub id: Uuid,
    pub manifest_id: Uuid,
    pub kind: PermissionKind,
    /// Encoded value, e.g. "true", "50", "512".
    pub value: String,
    pub granted_by: String,
    pub created_at: DateTime<Utc>,
}

/// Terminal and in-flight states of one sandbox invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Success,
    Failure,
    Timeout,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failure => "failure",
            ExecutionStatus::Timeout => "timeout",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(ExecutionStatus::Running),
            "success" => Some(ExecutionStatus::Success),
            "failure" => Some(ExecutionStatus::Failure),
            "timeout" => Some(ExecutionStatus::Timeout),
            "cancelled" => Some(ExecutionStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

/// Append-only record of one sandbox invocation, updated once on completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecutionLog {
    pub id: Uuid,
    pub manifest_id: Uuid,
    pub conversation_id: Option<String>,
    pub turn_id: Option<String>,
    pub input_params: serde_json::Value,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub status: ExecutionStatus,
    pub output: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub exit_code: Option<i32>,
    pub cpu_usage_ms: Option<i64>,
    pub memory_peak_mb: Option<i64>,
    pub container_ref: Option<String>,
}

/// Terminal fields applied exactly once to a running execution log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionUpdate {
    pub completed_at: Option<DateTime<Utc>>,
    pub status: Option<ExecutionStatus>,
    pub output: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub exit_code: Option<i32>,
    pub cpu_usage_ms: Option<i64>,
    pub memory_peak_mb: Option<i64>,
    pub container_ref: Option<String>,
}

/// Named Docker volume backing a tool's persistent state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolVolume {
    pub id: Uuid,
    pub manifest_id: Uuid,
    pub volume_name: String,
    pub mount_path: String,
    pub quota_mb: i64,
    pub created_at: DateTime<Utc>,
}

/// Keyed per-tool state, upserted on (manifest, key).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolState {
    pub id: Uuid,
    pub manifest_id: Uuid,
    pub state_key: String,
    pub state_value: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryStatus {
    Pending,
    Searching,
    Found,
    Failed,
    Rejected,
}

impl DiscoveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoveryStatus::Pending => "pending",
            DiscoveryStatus::Searching => "searching",
            DiscoveryStatus::Found => "found",
            DiscoveryStatus::Failed => "failed",
            DiscoveryStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DiscoveryStatus::Pending),
            "searching" => Some(DiscoveryStatus::Searching),
            "found" => Some(DiscoveryStatus::Found),
            "failed" => Some(DiscoveryStatus::Failed),
            "rejected" => Some(DiscoveryStatus::Rejected),
            _ => None,
        }
    }
}

/// Queued request to find a tool for a missing capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDiscoveryRequest {
    pub id: Uuid,
    pub capability_description: String,
    pub requested_by: String,
    pub status: DiscoveryStatus,
    pub resolved_manifest_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_follow_the_lifecycle() {
        use ToolStatus::*;

        assert!(PendingApproval.can_transition_to(Approved));
        assert!(Approved.can_transition_to(Active));
        assert!(Approved.can_transition_to(Disabled));
        assert!(Disabled.can_transition_to(Approved));
        assert!(PendingApproval.can_transition_to(Revoked));
        assert!(Active.can_transition_to(Revoked));

        assert!(!PendingApproval.can_transition_to(Active));
        assert!(!Revoked.can_transition_to(Approved));
        assert!(!Revoked.can_transition_to(Revoked));
        assert!(!Active.can_transition_to(PendingApproval));
    }

    #[test]
    fn only_approved_and_active_are_executable() {
        assert!(ToolStatus::Approved.is_executable());
        assert!(ToolStatus::Active.is_executable());
        assert!(!ToolStatus::PendingApproval.is_executable());
        assert!(!ToolStatus::Disabled.is_executable());
        assert!(!ToolStatus::Revoked.is_executable());
    }

    #[test]
    fn entrypoint_tokenises_strings_and_passes_lists_verbatim() {
        let cmd = Entrypoint::Command("python -m tool --flag".to_string());
        assert_eq!(cmd.to_argv(), vec!["python", "-m", "tool", "--flag"]);

        let argv = Entrypoint::Argv(vec!["echo".to_string(), "a b".to_string()]);
        assert_eq!(argv.to_argv(), vec!["echo", "a b"]);
    }

    #[test]
    fn entrypoint_deserialises_both_shapes() {
        let from_str: Entrypoint = serde_json::from_str("\"python main.py\"").unwrap();
        assert_eq!(from_str.to_argv(), vec!["python", "main.py"]);

        let from_list: Entrypoint = serde_json::from_str(r#"["python", "main.py"]"#).unwrap();
        assert_eq!(from_list.to_argv(), vec!["python", "main.py"]);
    }
}
