use std::sync::Arc;

use common::{
    storage::db::SurrealDbClient, utils::config::AppConfig, utils::embedding::EmbeddingProvider,
};
use ingestion_pipeline::{DocumentLifecycle, ExtractionPipeline};
use retrieval_pipeline::llm::LlmAdapter;

#[derive(Clone)]
pub struct ApiState {
    pub metadata_db: Arc<SurrealDbClient>,
    pub lifecycle: Arc<DocumentLifecycle>,
    pub pipeline: Arc<ExtractionPipeline>,
    pub embedding: Arc<EmbeddingProvider>,
    pub llm: Arc<dyn LlmAdapter>,
    pub config: AppConfig,
}

impl ApiState {
    pub fn new(
        metadata_db: Arc<SurrealDbClient>,
        lifecycle: Arc<DocumentLifecycle>,
        pipeline: Arc<ExtractionPipeline>,
        embedding: Arc<EmbeddingProvider>,
        llm: Arc<dyn LlmAdapter>,
        config: AppConfig,
    ) -> Self {
        Self {
            metadata_db,
            lifecycle,
            pipeline,
            embedding,
            llm,
            config,
        }
    }
}
