//! Service wiring: builds the orchestrator and its collaborators from
//! settings, degrading to reduced capability when a backing service is
//! unreachable.

use std::sync::Arc;

use slovo_agents::Orchestrator;
use slovo_core::llm::{build_embedding_provider, build_language_model};
use slovo_core::{EncryptionService, Settings};
use slovo_memory::{MemoryManager, PostgresRepository, QdrantRepository, RedisRepository};
use slovo_tools::{DockerSandbox, ToolDiscoveryAgent, ToolRepository};
use tracing::{info, warn};

pub struct Runtime {
    pub orchestrator: Arc<Orchestrator>,
    pub memory: Option<Arc<MemoryManager>>,
    pub tool_repo: Option<Arc<ToolRepository>>,
    pub discovery: Option<Arc<ToolDiscoveryAgent>>,
    pub sandbox: Option<Arc<DockerSandbox>>,
}

impl Runtime {
    /// Construct the full runtime. A failed memory stack leaves the
    /// orchestrator memory-less; an unreachable Docker daemon leaves it
    /// without tool execution. Neither stops the process.
    pub async fn build(settings: &Settings, with_memory: bool, with_tools: bool) -> Self {
        let llm = build_language_model(settings);
        let embedder = build_embedding_provider(settings);

        let mut memory: Option<Arc<MemoryManager>> = None;
        let mut postgres: Option<Arc<PostgresRepository>> = None;

        if with_memory {
            match build_memory(settings, embedder).await {
                Ok((manager, pg)) => {
                    memory = Some(manager);
                    postgres = Some(pg);
                }
                Err(e) => warn!("Memory stack unavailable, continuing without memory: {e}"),
            }
        }

        let mut tool_repo: Option<Arc<ToolRepository>> = None;
        let mut discovery: Option<Arc<ToolDiscoveryAgent>> = None;
        let mut sandbox: Option<Arc<DockerSandbox>> = None;

        if with_tools {
            if let Some(postgres) = &postgres {
                match ToolRepository::new(postgres.pool().clone()).await {
                    Ok(repo) => {
                        let repo = Arc::new(repo);
                        discovery =
                            Some(Arc::new(ToolDiscoveryAgent::new(repo.clone(), llm.clone())));

                        match DockerSandbox::new(repo.clone()).await {
                            Ok(docker) => sandbox = Some(Arc::new(docker)),
                            Err(e) => {
                                warn!("Tool execution unavailable: {e}");
                            }
                        }
                        tool_repo = Some(repo);
                    }
                    Err(e) => warn!("Tool repository unavailable: {e}"),
                }
            } else {
                warn!("Tool subsystem requires the memory database; tools disabled");
            }
        }

        let orchestrator = Arc::new(Orchestrator::new(
            llm,
            memory.clone(),
            tool_repo.clone(),
            sandbox.clone(),
            discovery.clone(),
            settings.agent_max_retries,
        ));

        // Executable tools become visible to the planner.
        if let Some(repo) = &tool_repo {
            match repo.list_manifests(None).await {
                Ok(manifests) => {
                    for manifest in manifests {
                        if manifest.status.is_executable() {
                            orchestrator.planner().register_tool(manifest);
                        }
                    }
                }
                Err(e) => warn!("Failed to load tool manifests: {e}"),
            }
        }

        info!(
            has_memory = memory.is_some(),
            has_tools = tool_repo.is_some(),
            has_sandbox = sandbox.is_some(),
            "Runtime assembled"
        );

        Self {
            orchestrator,
            memory,
            tool_repo,
            discovery,
            sandbox,
        }
    }
}

async fn build_memory(
    settings: &Settings,
    embedder: Option<Arc<dyn slovo_core::llm::EmbeddingProvider>>,
) -> anyhow::Result<(Arc<MemoryManager>, Arc<PostgresRepository>)> {
    let encryption = Arc::new(EncryptionService::from_passphrase(&settings.secret_key)?);

    let redis = Arc::new(RedisRepository::connect(&settings.redis_url, None).await?);
    let qdrant = Arc::new(QdrantRepository::new(
        &settings.qdrant_url,
        encryption.clone(),
    ));
    let postgres = Arc::new(
        PostgresRepository::connect(&settings.database_url, encryption).await?,
    );

    let manager = Arc::new(MemoryManager::new(
        redis,
        qdrant,
        postgres.clone(),
        embedder,
    ));
    Ok((manager, postgres))
}
