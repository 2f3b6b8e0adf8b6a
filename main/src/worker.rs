use common::{
    storage::{db::SurrealDbClient, store::StorageManager, vector::VectorIndex},
    utils::{config::get_config, embedding::EmbeddingProvider},
};
use ingestion_pipeline::{run_worker_loop, ExtractionPipeline};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Standalone extraction worker; pairs with the `server` binary.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;

    let metadata_db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_metadata_database,
        )
        .await?,
    );
    let content_db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_content_database,
        )
        .await?,
    );

    let openai_client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ));
    let embedding = Arc::new(EmbeddingProvider::from_config(&config, Some(openai_client))?);

    VectorIndex::new(content_db.clone())
        .ensure_collection(embedding.dimension() as u32)
        .await?;

    let storage = StorageManager::new(&config).await?;

    let pipeline = Arc::new(ExtractionPipeline::new(
        metadata_db.clone(),
        content_db,
        storage,
        embedding,
        config,
    ));

    run_worker_loop(metadata_db, pipeline).await
}
