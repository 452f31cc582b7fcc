//! Shared wiring for the integration tests: an in-memory database, mock
//! Telegram client/factory, deterministic embeddings over wiremock, and
//! constructors for each pipeline with test-friendly rate limits.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use tgrag::flags::FeatureFlags;
use tgrag::indexing::Indexer;
use tgrag::ingest::scheduler::{IngestedBatch, ParsingScheduler};
use tgrag::providers::ai::embedding::EmbeddingClient;
use tgrag::providers::ai::AiProvider;
use tgrag::providers::cache::{Cache, MemoryCache};
use tgrag::providers::graph::types::MemoryTagGraph;
use tgrag::providers::graph::{GraphStore, SharedTagGraph};
use tgrag::providers::vector::{SqliteVectorStore, VectorStore};
use tgrag::ratelimit::{LeakyBucket, RateLimitConfig, RateLimiterRegistry};
use tgrag::retention::RetentionEnforcer;
use tgrag::search::RetrievalEngine;
use tgrag::session::qr::QrLoginFlow;
use tgrag::session::SessionSupervisor;
use tgrag::tagging::TaggingPipeline;
use tgrag::vault::Vault;
use tgrag_test_utils::{MockAiProvider, MockClientFactory, MockTelegramClient, TestSetup};
use tokio::sync::mpsc;
use turso::Database;
use wiremock::MockServer;

/// Embedding dimension used across the integration tests.
pub const TEST_DIMENSION: usize = 16;

pub struct TestHarness {
    pub db: Database,
    pub cache: Arc<dyn Cache>,
    pub client: Arc<MockTelegramClient>,
    pub factory: Arc<MockClientFactory>,
    pub supervisor: Arc<SessionSupervisor>,
    pub qr: QrLoginFlow,
    pub vector: Arc<dyn VectorStore>,
    pub graph: Arc<dyn GraphStore>,
    pub embedder: EmbeddingClient,
    limiters: RateLimiterRegistry,
    _embedding_server: MockServer,
}

impl TestHarness {
    pub async fn new(telegram_id: i64) -> Self {
        let setup = TestSetup::new().await.expect("test database");
        let db = setup.db;

        let client = Arc::new(MockTelegramClient::new(telegram_id));
        let factory = Arc::new(MockClientFactory::new(Arc::clone(&client)));
        let vault = Vault::new(&[42u8; 32]).expect("test vault key");
        let supervisor = Arc::new(SessionSupervisor::new(
            db.clone(),
            vault,
            factory.clone() as Arc<dyn tgrag::providers::telegram::ClientFactory>,
        ));

        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
        let qr = QrLoginFlow::new(
            Arc::clone(&supervisor),
            Arc::clone(&cache),
            "111111".to_string(),
            "test-api-hash".to_string(),
        );

        let vector: Arc<dyn VectorStore> = Arc::new(SqliteVectorStore::new(db.clone()));
        let graph: Arc<dyn GraphStore> = Arc::new(SharedTagGraph::new(MemoryTagGraph::new_memory()));

        let (embedding_server, embedding_url) =
            tgrag_test_utils::spawn_embedding_server(TEST_DIMENSION).await;
        let embedder = EmbeddingClient {
            api_url: embedding_url,
            model: "test-embedder".to_string(),
            api_key: None,
            timeout: Duration::from_secs(5),
        };

        // Tests should not wait on real one-second spacing.
        let limiters = RateLimiterRegistry::new();
        for upstream in ["llm_primary", "llm_fallback", "embedding"] {
            limiters.configure(
                upstream,
                RateLimitConfig {
                    max_rate: 1_000,
                    period: Duration::from_secs(1),
                    acquire_timeout: Duration::from_secs(5),
                },
            );
        }

        Self {
            db,
            cache,
            client,
            factory,
            supervisor,
            qr,
            vector,
            graph,
            embedder,
            limiters,
            _embedding_server: embedding_server,
        }
    }

    pub fn bucket(&self, upstream: &str) -> Arc<LeakyBucket> {
        self.limiters.bucket(upstream)
    }

    /// Full onboarding: mints a single-use invite, walks the QR state
    /// machine, and returns the finalized user.
    pub async fn onboard_user(
        &self,
        telegram_id: i64,
        invite_code: &str,
        tier: core_access::SubscriptionTier,
    ) -> core_access::User {
        core_access::create_invite(&self.db, invite_code, tier, 14, 1, None)
            .await
            .expect("invite");
        let created = self
            .qr
            .create_qr_session(telegram_id, invite_code)
            .await
            .expect("qr session");
        self.qr.poll(&created.session_id).await.expect("poll");
        self.qr.finalize(&created.session_id).await.expect("finalize")
    }

    pub fn scheduler(&self) -> (ParsingScheduler, mpsc::UnboundedReceiver<IngestedBatch>) {
        ParsingScheduler::new(self.db.clone(), Arc::clone(&self.supervisor), 4, 100)
    }

    pub fn tagging(&self, primary: MockAiProvider, fallback: MockAiProvider) -> TaggingPipeline {
        TaggingPipeline::new(
            self.db.clone(),
            Box::new(primary),
            Box::new(fallback),
            self.bucket("llm_primary"),
            self.bucket("llm_fallback"),
            1,
            Duration::from_millis(200),
        )
    }

    pub fn indexer(&self) -> Indexer {
        Indexer::new(
            self.db.clone(),
            Arc::clone(&self.vector),
            Arc::clone(&self.graph),
            self.embedder.clone(),
            self.bucket("embedding"),
            TEST_DIMENSION,
        )
    }

    pub fn retrieval(&self, synthesis: MockAiProvider, flags: FeatureFlags) -> RetrievalEngine {
        RetrievalEngine::new(
            self.db.clone(),
            Arc::clone(&self.vector),
            Arc::clone(&self.graph),
            self.embedder.clone(),
            self.bucket("embedding"),
            Box::new(synthesis),
            flags,
        )
    }

    pub fn retention(&self) -> RetentionEnforcer {
        RetentionEnforcer::new(
            self.db.clone(),
            Arc::clone(&self.vector),
            Arc::clone(&self.graph),
        )
    }

    /// A provider pair where the primary answers tagging calls with the
    /// given JSON and the fallback is never needed.
    pub fn tagging_provider(tags_json: &str) -> MockAiProvider {
        let provider = MockAiProvider::new();
        provider.add_response("content tagger", tags_json);
        provider
    }
}

/// Counts rows of a table matching a `WHERE` fragment. Test-side helper
/// for schema-level assertions.
pub async fn count_rows(db: &Database, sql: &str) -> i64 {
    let conn = db.connect().unwrap();
    let mut rows = conn.query(sql, ()).await.unwrap();
    let row = rows.next().await.unwrap().unwrap();
    row.get(0).unwrap()
}
