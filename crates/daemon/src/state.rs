//! # Application State
//!
//! Builds the daemon's shared state once at startup: the credential vault,
//! the stores, the session supervisor, and every pipeline, passed around as
//! explicit capability handles. Nothing in the system is a process-global;
//! components receive what they need from here.

use crate::config::{AppConfig, ConfigError, ResolvedTask};
use std::sync::Arc;
use std::time::Duration;
use tgrag::indexing::Indexer;
use tgrag::providers::ai::embedding::EmbeddingClient;
use tgrag::providers::ai::gemini::GeminiProvider;
use tgrag::providers::ai::local::LocalAiProvider;
use tgrag::providers::ai::AiProvider;
use tgrag::providers::cache::{Cache, MemoryCache};
use tgrag::providers::db::sqlite::SqliteProvider;
use tgrag::providers::graph::types::{MemoryTagGraph, RocksdbTagGraph};
use tgrag::providers::graph::{GraphStore, SharedTagGraph};
use tgrag::providers::telegram::ClientFactory;
use tgrag::providers::vector::{SqliteVectorStore, VectorStore};
use tgrag::ratelimit::{RateLimitConfig, RateLimiterRegistry};
use tgrag::retention::RetentionEnforcer;
use tgrag::search::RetrievalEngine;
use tgrag::session::admin::AdminSessions;
use tgrag::session::qr::QrLoginFlow;
use tgrag::session::SessionSupervisor;
use tgrag::tagging::TaggingPipeline;
use tgrag::vault::Vault;
use tgrag::{digest::DigestAgents, digest::DigestPipeline, ingest::scheduler::IngestedBatch};
use tokio::sync::mpsc;

/// The shared application state.
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub sqlite_provider: Arc<SqliteProvider>,
    pub cache: Arc<dyn Cache>,
    pub vector_store: Arc<dyn VectorStore>,
    pub graph: Arc<dyn GraphStore>,
    pub supervisor: Arc<SessionSupervisor>,
    pub qr_flow: Arc<QrLoginFlow>,
    pub admin_sessions: AdminSessions,
    pub scheduler: Arc<tgrag::ingest::ParsingScheduler>,
    pub tagging: Arc<TaggingPipeline>,
    pub indexer: Arc<Indexer>,
    pub retrieval: Arc<RetrievalEngine>,
    pub digest: Arc<DigestPipeline>,
    pub retention: Arc<RetentionEnforcer>,
}

/// Instantiates one AI provider with the task's temperature.
fn build_provider(
    config: &AppConfig,
    name: &str,
    temperature: f32,
) -> anyhow::Result<Box<dyn AiProvider>> {
    let provider_config = config
        .providers
        .get(name)
        .ok_or_else(|| anyhow::anyhow!("unknown provider '{name}'"))?;
    let timeout = Duration::from_secs(provider_config.timeout_secs);

    let provider: Box<dyn AiProvider> = match provider_config.provider.as_str() {
        "gemini" => {
            let api_key = provider_config.api_key.clone().ok_or_else(|| {
                anyhow::anyhow!("api_key is required for gemini provider '{name}'")
            })?;
            let api_url = provider_config.api_url.clone().unwrap_or_else(|| {
                format!(
                    "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
                    provider_config.model_name
                )
            });
            Box::new(GeminiProvider::new(api_url, api_key, temperature, timeout)?)
        }
        "local" => {
            let api_url = provider_config.api_url.clone().ok_or_else(|| {
                anyhow::anyhow!("api_url is required for local provider '{name}'")
            })?;
            Box::new(LocalAiProvider::new(
                api_url,
                provider_config.api_key.clone(),
                Some(provider_config.model_name.clone()),
                temperature,
                timeout,
            )?)
        }
        other => {
            return Err(anyhow::anyhow!(
                "Unsupported AI provider type '{other}' for provider '{name}'"
            ));
        }
    };
    Ok(provider)
}

fn build_task_provider(config: &AppConfig, task: &ResolvedTask) -> anyhow::Result<Box<dyn AiProvider>> {
    build_provider(config, &task.provider, task.temperature)
}

/// Builds the shared application state from the configuration.
///
/// Returns the state plus the "ingested" signal receiver that the job loop
/// feeds into the tagging pipeline.
pub async fn build_app_state(
    config: AppConfig,
    factory: Arc<dyn ClientFactory>,
) -> anyhow::Result<(AppState, mpsc::UnboundedReceiver<IngestedBatch>)> {
    config.validate().map_err(|e| anyhow::anyhow!("{e}"))?;

    // Credential vault; a bad key is fatal here, before any job starts.
    let vault = Vault::from_base64_key(&config.encryption_key)
        .map_err(|e| anyhow::anyhow!(ConfigError::Fatal(format!("ENCRYPTION_KEY: {e}"))))?;

    // Relational store.
    let sqlite_provider = Arc::new(SqliteProvider::new(&config.telegram_database_url).await?);
    tracing::info!(db = %config.telegram_database_url, "Initialized relational store.");
    sqlite_provider.initialize_schema().await?;

    // Vector store shares the Turso database; collections are per user.
    let vector_store: Arc<dyn VectorStore> =
        Arc::new(SqliteVectorStore::new(sqlite_provider.db.clone()));

    // Knowledge graph.
    let graph: Arc<dyn GraphStore> = if config.graph_path == ":memory:" {
        Arc::new(SharedTagGraph::new(MemoryTagGraph::new_memory()))
    } else {
        Arc::new(SharedTagGraph::new(RocksdbTagGraph::new_rocksdb(
            &config.graph_path,
        )?))
    };

    // Session cache.
    let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());

    // Upstream rate limiters: reference tariff is one request per second
    // for the primary LLM and the embedding endpoint.
    let limiters = RateLimiterRegistry::new();
    limiters.configure("llm_primary", RateLimitConfig::default());
    limiters.configure("llm_fallback", RateLimitConfig::default());
    limiters.configure("embedding", RateLimitConfig::default());

    // Session management.
    let supervisor = Arc::new(SessionSupervisor::new(
        sqlite_provider.db.clone(),
        vault,
        Arc::clone(&factory),
    ));
    let qr_flow = Arc::new(QrLoginFlow::new(
        Arc::clone(&supervisor),
        Arc::clone(&cache),
        config.telegram_api_id.clone(),
        config.telegram_api_hash.clone(),
    ));
    let admin_sessions = AdminSessions::new(Arc::clone(&cache));

    // Ingestion.
    let (scheduler, ingested_rx) = tgrag::ingest::ParsingScheduler::new(
        sqlite_provider.db.clone(),
        Arc::clone(&supervisor),
        config.parse_workers,
        tgrag::constants::PARSE_BATCH_LIMIT,
    );
    let scheduler = Arc::new(scheduler);

    // Tagging with provider failover.
    let tagging_task = config.resolved_task("tagging").map_err(|e| anyhow::anyhow!("{e}"))?;
    let tagging_primary = build_task_provider(&config, &tagging_task)?;
    let tagging_fallback = match &tagging_task.fallback_provider {
        Some(name) => build_provider(&config, name, tagging_task.temperature)?,
        // Without a configured fallback the secondary is the primary again;
        // the failover path still bounds retries.
        None => build_task_provider(&config, &tagging_task)?,
    };
    let tagging = Arc::new(TaggingPipeline::new(
        sqlite_provider.db.clone(),
        tagging_primary,
        tagging_fallback,
        limiters.bucket("llm_primary"),
        limiters.bucket("llm_fallback"),
        1,
        Duration::from_secs(10),
    ));

    // Indexing.
    let embedder = EmbeddingClient {
        api_url: config.embedding.api_url.clone(),
        model: config.embedding.model_name.clone(),
        api_key: config.embedding.api_key.clone(),
        timeout: Duration::from_secs(config.embedding.timeout_secs),
    };
    let indexer = Arc::new(Indexer::new(
        sqlite_provider.db.clone(),
        Arc::clone(&vector_store),
        Arc::clone(&graph),
        embedder.clone(),
        limiters.bucket("embedding"),
        config.embedding.dimension,
    ));

    // Retrieval.
    let synthesis_task = config
        .resolved_task("rag_synthesis")
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    let retrieval = Arc::new(RetrievalEngine::new(
        sqlite_provider.db.clone(),
        Arc::clone(&vector_store),
        Arc::clone(&graph),
        embedder,
        limiters.bucket("embedding"),
        build_task_provider(&config, &synthesis_task)?,
        config.features.to_flags(),
    ));

    // Digest agents, one provider per temperature profile.
    let agents = DigestAgents {
        topics: build_task_provider(
            &config,
            &config.resolved_task("digest_topics").map_err(|e| anyhow::anyhow!("{e}"))?,
        )?,
        emotions: build_task_provider(
            &config,
            &config
                .resolved_task("digest_emotions")
                .map_err(|e| anyhow::anyhow!("{e}"))?,
        )?,
        roles: build_task_provider(
            &config,
            &config.resolved_task("digest_roles").map_err(|e| anyhow::anyhow!("{e}"))?,
        )?,
        synthesis: build_task_provider(
            &config,
            &config
                .resolved_task("digest_synthesis")
                .map_err(|e| anyhow::anyhow!("{e}"))?,
        )?,
    };
    let digest = Arc::new(DigestPipeline::new(
        Arc::clone(&supervisor),
        agents,
        Duration::from_secs(60),
    ));

    // Retention.
    let retention = Arc::new(RetentionEnforcer::new(
        sqlite_provider.db.clone(),
        Arc::clone(&vector_store),
        Arc::clone(&graph),
    ));

    tgrag::metrics::register_metrics();

    Ok((
        AppState {
            config: Arc::new(config),
            sqlite_provider,
            cache,
            vector_store,
            graph,
            supervisor,
            qr_flow,
            admin_sessions,
            scheduler,
            tagging,
            indexer,
            retrieval,
            digest,
            retention,
        },
        ingested_rx,
    ))
}
