//! Tool manifest wire format.
//!
//! Manifest files declare a tool's capabilities, parameter schema,
//! permissions and execution configuration. Two serialisations are
//! accepted as input files: JSON and TOML.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use slovo_core::models::{Entrypoint, PermissionKind, ToolCapability};

/// Declared permission block of a manifest file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestPermissions {
    #[serde(default)]
    pub internet_access: bool,
    #[serde(default = "default_storage_quota")]
    pub storage_quota_mb: u64,
    #[serde(default = "default_cpu_limit")]
    pub cpu_limit_percent: u64,
    #[serde(default = "default_memory_limit")]
    pub memory_limit_mb: u64,
}

fn default_storage_quota() -> u64 {
    1024
}
fn default_cpu_limit() -> u64 {
    50
}
fn default_memory_limit() -> u64 {
    512
}

/// Execution block of a manifest file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestExecution {
    /// Sandbox type; only "docker" is supported.
    #[serde(default, rename = "type")]
    pub sandbox_type: Option<String>,
    pub image: Option<String>,
    pub entrypoint: Option<Entrypoint>,
    pub timeout: Option<u64>,
}

/// A manifest as written on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestFile {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub capabilities: Vec<ToolCapability>,
    #[serde(default)]
    pub parameters_schema: serde_json::Value,
    #[serde(default)]
    pub permissions: ManifestPermissions,
    #[serde(default)]
    pub execution: ManifestExecution,
}

impl ManifestFile {
    /// Parse manifest text, accepting JSON or TOML.
    pub fn parse(text: &str) -> Result<Self> {
        let trimmed = text.trim_start();
        if trimmed.starts_with('{') {
            return serde_json::from_str(trimmed)
                .map_err(|e| anyhow!("Invalid JSON manifest: {e}"));
        }
        match toml::from_str::<ManifestFile>(text) {
            Ok(manifest) => Ok(manifest),
            Err(toml_err) => {
                // A malformed JSON file without a leading brace still gets
                // one JSON attempt before giving up.
                serde_json::from_str(text)
                    .map_err(|json_err| anyhow!(
                        "Manifest is neither valid TOML ({toml_err}) nor JSON ({json_err})"
                    ))
            }
        }
    }

    /// Permission rows implied by the manifest, as (kind, encoded value).
    pub fn permission_entries(&self) -> Vec<(PermissionKind, String)> {
        vec![
            (
                PermissionKind::InternetAccess,
                self.permissions.internet_access.to_string(),
            ),
            (
                PermissionKind::StorageQuota,
                self.permissions.storage_quota_mb.to_string(),
            ),
            (
                PermissionKind::CpuCap,
                self.permissions.cpu_limit_percent.to_string(),
            ),
            (
                PermissionKind::MemoryCap,
                self.permissions.memory_limit_mb.to_string(),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JSON_MANIFEST: &str = r#"{
        "name": "weather",
        "version": "1.0.0",
        "description": "Current weather lookup",
        "capabilities": [
            {"name": "get_weather", "description": "Fetch current conditions"}
        ],
        "parameters_schema": {"type": "object", "properties": {"city": {"type": "string"}}},
        "permissions": {
            "internet_access": true,
            "storage_quota_mb": 256,
            "cpu_limit_percent": 25,
            "memory_limit_mb": 128
        },
        "execution": {
            "type": "docker",
            "image": "slovo/weather:1.0",
            "entrypoint": "python main.py",
            "timeout": 20
        }
    }"#;

    const TOML_MANIFEST: &str = r#"
name = "calculator"
version = "0.2.0"
description = "Arbitrary precision arithmetic"

[[capabilities]]
name = "calculate"
description = "Evaluate an expression"

[permissions]
internet_access = false
memory_limit_mb = 64

[execution]
image = "slovo/calc:0.2"
entrypoint = ["python", "-m", "calc"]
"#;

    #[test]
    fn parses_json_manifest() {
        let manifest = ManifestFile::parse(JSON_MANIFEST).unwrap();
        assert_eq!(manifest.name, "weather");
        assert!(manifest.permissions.internet_access);
        assert_eq!(manifest.execution.timeout, Some(20));
        assert_eq!(
            manifest.execution.entrypoint.as_ref().unwrap().to_argv(),
            vec!["python", "main.py"]
        );
    }

    #[test]
    fn parses_toml_manifest() {
        let manifest = ManifestFile::parse(TOML_MANIFEST).unwrap();
        assert_eq!(manifest.name, "calculator");
        assert!(!manifest.permissions.internet_access);
        // Unset fields fall back to defaults.
        assert_eq!(manifest.permissions.cpu_limit_percent, 50);
        assert_eq!(manifest.permissions.memory_limit_mb, 64);
        assert_eq!(
            manifest.execution.entrypoint.as_ref().unwrap().to_argv(),
            vec!["python", "-m", "calc"]
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(ManifestFile::parse("not a manifest at all {{{").is_err());
    }

    #[test]
    fn permission_entries_cover_all_kinds() {
        let manifest = ManifestFile::parse(JSON_MANIFEST).unwrap();
        let entries = manifest.permission_entries();
        assert_eq!(entries.len(), 4);
        assert!(entries
            .iter()
            .any(|(kind, value)| *kind == PermissionKind::InternetAccess && value == "true"));
        assert!(entries
            .iter()
            .any(|(kind, value)| *kind == PermissionKind::CpuCap && value == "25"));
    }
}
