use api_router::{api_routes_v1, api_state::ApiState};
use axum::Router;
use common::{
    storage::{db::SurrealDbClient, store::StorageManager, vector::VectorIndex},
    utils::{config::get_config, embedding::EmbeddingProvider},
};
use ingestion_pipeline::{DocumentLifecycle, ExtractionPipeline};
use retrieval_pipeline::llm::adapter_from_config;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// HTTP server without the background worker; pair with the `worker`
/// binary when the two are deployed separately.
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
    let llm = adapter_from_config(&config);

    let lifecycle = Arc::new(DocumentLifecycle::new(
        metadata_db.clone(),
        content_db.clone(),
        storage.clone(),
        config.clone(),
    ));
    let pipeline = Arc::new(ExtractionPipeline::new(
        metadata_db.clone(),
        content_db,
        storage,
        embedding.clone(),
        config.clone(),
    ));

    let api_state = ApiState::new(metadata_db, lifecycle, pipeline, embedding, llm, config.clone());

    let app = Router::new()
        .nest("/api/v1", api_routes_v1())
        .with_state(api_state);

    info!("Starting server listening on 0.0.0.0:{}", config.http_port);
    let serve_address = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(serve_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
