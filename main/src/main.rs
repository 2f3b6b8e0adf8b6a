use api_router::{api_routes_v1, api_state::ApiState};
use axum::Router;
use common::{
    storage::{db::SurrealDbClient, store::StorageManager, vector::VectorIndex},
    utils::{config::get_config, embedding::EmbeddingProvider},
};
use ingestion_pipeline::{run_worker_loop, DocumentLifecycle, ExtractionPipeline};
use retrieval_pipeline::llm::adapter_from_config;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    // Get config
    let config = get_config()?;

    // Metadata and content live in separate databases; the pipeline's
    // cross-store guarantees assume they fail independently.
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

    let openai_client = Arc::new(async_openai_client(&config));
    let embedding = Arc::new(EmbeddingProvider::from_config(
        &config,
        Some(openai_client),
    )?);
    info!(
        embedding_backend = embedding.backend_label(),
        embedding_dimension = embedding.dimension(),
        "Embedding provider initialized"
    );

    // The collection must agree with the embedder before anything is
    // indexed; a dimension mismatch aborts startup.
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
        content_db.clone(),
        storage.clone(),
        embedding.clone(),
        config.clone(),
    ));

    let api_state = ApiState::new(
        metadata_db,
        lifecycle,
        pipeline,
        embedding.clone(),
        llm,
        config.clone(),
    );

    let app = Router::new()
        .nest("/api/v1", api_routes_v1())
        .with_state(api_state);

    // Background worker with its own connections; extraction units never
    // share a request-scoped session.
    let worker_config = config.clone();
    tokio::spawn(async move {
        let worker_metadata_db = match SurrealDbClient::new(
            &worker_config.surrealdb_address,
            &worker_config.surrealdb_username,
            &worker_config.surrealdb_password,
            &worker_config.surrealdb_namespace,
            &worker_config.surrealdb_metadata_database,
        )
        .await
        {
            Ok(db) => Arc::new(db),
            Err(e) => {
                error!("Worker metadata connection failed: {e}");
                return;
            }
        };
        let worker_content_db = match SurrealDbClient::new(
            &worker_config.surrealdb_address,
            &worker_config.surrealdb_username,
            &worker_config.surrealdb_password,
            &worker_config.surrealdb_namespace,
            &worker_config.surrealdb_content_database,
        )
        .await
        {
            Ok(db) => Arc::new(db),
            Err(e) => {
                error!("Worker content connection failed: {e}");
                return;
            }
        };

        let worker_storage = match StorageManager::new(&worker_config).await {
            Ok(storage) => storage,
            Err(e) => {
                error!("Worker storage init failed: {e}");
                return;
            }
        };
        let worker_openai_client = Arc::new(async_openai_client(&worker_config));
        let worker_embedding =
            match EmbeddingProvider::from_config(&worker_config, Some(worker_openai_client)) {
                Ok(provider) => Arc::new(provider),
                Err(e) => {
                    error!("Worker embedding init failed: {e}");
                    return;
                }
            };

        let worker_pipeline = Arc::new(ExtractionPipeline::new(
            worker_metadata_db.clone(),
            worker_content_db,
            worker_storage,
            worker_embedding,
            worker_config,
        ));

        info!("Starting extraction worker");
        if let Err(e) = run_worker_loop(worker_metadata_db, worker_pipeline).await {
            error!("Worker process error: {e}");
        }
    });

    info!("Starting server listening on 0.0.0.0:{}", config.http_port);
    let serve_address = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(serve_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn async_openai_client(
    config: &common::utils::config::AppConfig,
) -> async_openai::Client<async_openai::config::OpenAIConfig> {
    async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    )
}
