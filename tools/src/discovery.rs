//! Tool discovery: local manifest import and remote OpenAPI ingestion.
//!
//! Both paths create `pending_approval` manifests; nothing is published
//! without an explicit operator approval. Remote descriptors are
//! normalised into the internal capability shape by the language model
//! when one is configured, with a syntactic fallback of one capability
//! per path and method.

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use slovo_core::llm::{generate_structured, LanguageModel, LlmMessage};
use slovo_core::models::{
    ExecutionConfig, ToolCapability, ToolDiscoveryRequest, ToolManifest, ToolSource, ToolStatus,
    DEFAULT_TOOL_TIMEOUT_SECONDS,
};

use crate::manifest::ManifestFile;
use crate::repository::ToolRepository;

const OPENAPI_SYSTEM_PROMPT: &str = "You are a tool integration analyst. \
Given an OpenAPI specification, extract the capabilities this API offers \
as short, action-oriented names with one-line descriptions. Focus on what \
a voice assistant could do with each operation.";

/// Capability list produced by the model for a remote descriptor.
#[derive(Debug, Deserialize)]
struct CapabilityAnalysis {
    capabilities: Vec<ToolCapability>,
}

pub struct ToolDiscoveryAgent {
    repo: Arc<ToolRepository>,
    llm: Option<Arc<dyn LanguageModel>>,
    http: reqwest::Client,
}

impl ToolDiscoveryAgent {
    pub fn new(repo: Arc<ToolRepository>, llm: Option<Arc<dyn LanguageModel>>) -> Self {
        Self {
            repo,
            llm,
            http: reqwest::Client::new(),
        }
    }

    // =========================================================================
    // Local manifest import
    // =========================================================================

    /// Read a manifest file (JSON or TOML) and create a pending manifest
    /// with its declared permissions.
    pub async fn import_local_manifest(&self, path: &Path) -> Result<Uuid> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read manifest file {}", path.display()))?;
        let parsed = ManifestFile::parse(&text)?;

        if parsed.name.is_empty() {
            return Err(anyhow!("Manifest has no name"));
        }

        let now = Utc::now();
        let manifest = ToolManifest {
            id: Uuid::new_v4(),
            name: parsed.name.clone(),
            version: parsed.version.clone(),
            description: parsed.description.clone(),
            source: ToolSource::Local,
            source_locator: path.display().to_string(),
            status: ToolStatus::PendingApproval,
            schema: serde_json::to_value(&parsed)?,
            capabilities: parsed.capabilities.clone(),
            parameters_schema: parsed.parameters_schema.clone(),
            execution: ExecutionConfig {
                container_image: parsed.execution.image.clone(),
                entrypoint: parsed.execution.entrypoint.clone(),
                timeout_seconds: parsed
                    .execution
                    .timeout
                    .unwrap_or(DEFAULT_TOOL_TIMEOUT_SECONDS),
            },
            approved_at: None,
            revoked_at: None,
            created_at: now,
            updated_at: now,
        };

        self.repo.create_manifest(&manifest).await?;
        for (kind, value) in parsed.permission_entries() {
            self.repo
                .upsert_permission(manifest.id, kind, &value, "manifest")
                .await?;
        }

        info!(tool = %manifest.name, id = %manifest.id, "Local manifest imported (pending approval)");
        Ok(manifest.id)
    }

    // =========================================================================
    // OpenAPI ingestion
    // =========================================================================

    /// Fetch a remote API descriptor and create a pending manifest from it.
    pub async fn ingest_openapi_url(&self, url: &str) -> Result<Uuid> {
        debug!(url, "Fetching OpenAPI descriptor");

        let response = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch OpenAPI descriptor from {url}"))?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "OpenAPI descriptor fetch returned {}",
                response.status()
            ));
        }
        let spec: serde_json::Value = response
            .json()
            .await
            .context("OpenAPI descriptor is not valid JSON")?;

        let info = &spec["info"];
        let title = info["title"].as_str().unwrap_or("remote_api");
        let name = title
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '_' })
            .collect::<String>();
        let version = info["version"].as_str().unwrap_or("0.0.0").to_string();
        let description = info["description"]
            .as_str()
            .unwrap_or("Imported OpenAPI tool")
            .to_string();

        let capabilities = self.analyze_openapi(&spec).await;

        let now = Utc::now();
        let manifest = ToolManifest {
            id: Uuid::new_v4(),
            name,
            version,
            description,
            source: ToolSource::OpenapiUrl,
            source_locator: url.to_string(),
            status: ToolStatus::PendingApproval,
            schema: spec,
            capabilities,
            parameters_schema: serde_json::json!({"type": "object"}),
            execution: ExecutionConfig::default(),
            approved_at: None,
            revoked_at: None,
            created_at: now,
            updated_at: now,
        };

        self.repo.create_manifest(&manifest).await?;
        info!(tool = %manifest.name, id = %manifest.id, "OpenAPI manifest ingested (pending approval)");
        Ok(manifest.id)
    }

    /// Capability extraction: model-assisted when available, otherwise one
    /// capability per path and method.
    async fn analyze_openapi(&self, spec: &serde_json::Value) -> Vec<ToolCapability> {
        if let Some(llm) = &self.llm {
            let spec_excerpt = truncate(&spec.to_string(), 8000);
            let messages = vec![LlmMessage::user(format!(
                "Extract the capabilities from this OpenAPI specification:\n\n{spec_excerpt}"
            ))];
            let schema = r#"{"capabilities": [{"name": "string", "description": "string"}]}"#;

            match generate_structured::<CapabilityAnalysis>(
                llm.as_ref(),
                &messages,
                OPENAPI_SYSTEM_PROMPT,
                schema,
            )
            .await
            {
                Ok(analysis) if !analysis.capabilities.is_empty() => {
                    return analysis.capabilities;
                }
                Ok(_) => warn!("Model returned no capabilities, using syntactic extraction"),
                Err(e) => warn!("Model analysis failed ({e}), using syntactic extraction"),
            }
        }

        extract_capabilities_syntactic(spec)
    }

    // =========================================================================
    // Discovery queue
    // =========================================================================

    /// Queue a discovery request for a missing capability. Non-blocking;
    /// resolution requires manual approval later.
    pub async fn discover_tool(
        &self,
        capability_description: &str,
        requested_by: &str,
    ) -> Result<ToolDiscoveryRequest> {
        if capability_description.trim().is_empty() {
            return Err(anyhow!("Cannot discover tool: no capability description"));
        }
        self.repo
            .create_discovery_request(capability_description, requested_by)
            .await
    }
}

/// One capability per path x method, named `{method}_{path}`.
fn extract_capabilities_syntactic(spec: &serde_json::Value) -> Vec<ToolCapability> {
    let mut capabilities = Vec::new();

    if let Some(paths) = spec["paths"].as_object() {
        for (path, operations) in paths {
            let Some(operations) = operations.as_object() else {
                continue;
            };
            for (method, operation) in operations {
                if !matches!(
                    method.as_str(),
                    "get" | "post" | "put" | "delete" | "patch"
                ) {
                    continue;
                }
                let slug = path
                    .trim_matches('/')
                    .replace(['/', '{', '}'], "_")
                    .trim_matches('_')
                    .to_string();
                let description = operation["summary"]
                    .as_str()
                    .or_else(|| operation["description"].as_str())
                    .unwrap_or("No description")
                    .to_string();
                capabilities.push(ToolCapability {
                    name: format!("{method}_{slug}"),
                    description,
                });
            }
        }
    }

    capabilities
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syntactic_extraction_yields_one_capability_per_operation() {
        let spec = serde_json::json!({
            "openapi": "3.0.0",
            "info": {"title": "Weather API", "version": "1.0"},
            "paths": {
                "/current/{city}": {
                    "get": {"summary": "Current weather for a city"},
                },
                "/forecast": {
                    "get": {"summary": "Five day forecast"},
                    "post": {"description": "Subscribe to forecast updates"},
                    "parameters": [{"name": "units"}]
                }
            }
        });

        let mut capabilities = extract_capabilities_syntactic(&spec);
        capabilities.sort_by(|a, b| a.name.cmp(&b.name));

        assert_eq!(capabilities.len(), 3);
        assert_eq!(capabilities[0].name, "get_current__city");
        assert_eq!(capabilities[1].name, "get_forecast");
        assert_eq!(capabilities[1].description, "Five day forecast");
        assert_eq!(capabilities[2].name, "post_forecast");
    }

    #[test]
    fn syntactic_extraction_handles_empty_spec() {
        assert!(extract_capabilities_syntactic(&serde_json::json!({})).is_empty());
    }
}
