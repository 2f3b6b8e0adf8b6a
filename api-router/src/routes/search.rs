use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use retrieval_pipeline::{generator, retrieve, RetrievedHit};

use crate::{api_state::ApiState, error::ApiError};

const MAX_SEARCH_TOP_K: usize = 50;
const MAX_RETRIEVAL_TOP_K: usize = 10;

fn default_search_top_k() -> usize {
    5
}

fn default_retrieval_top_k() -> usize {
    3
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    #[serde(default = "default_search_top_k")]
    pub top_k: usize,
}

#[derive(Debug, Serialize)]
pub struct SearchResultItem {
    pub id: String,
    pub score: f32,
    pub text: String,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResultItem>,
}

#[derive(Debug, Deserialize)]
pub struct RagQuery {
    pub question: String,
    #[serde(default = "default_retrieval_top_k")]
    pub top_k_retrieval: usize,
}

#[derive(Debug, Serialize)]
pub struct RagResponse {
    pub answer: String,
    pub citations: Vec<generator::Citation>,
}

fn hit_to_result(hit: RetrievedHit) -> SearchResultItem {
    SearchResultItem {
        id: hit.id,
        score: hit.score,
        text: hit.text,
        metadata: json!({
            "doc_id": hit.document_id,
            "chunk_index": hit.chunk_index,
            "filename": hit.source_file,
        }),
    }
}

/// Semantic search over indexed chunks.
pub async fn search_documents(
    State(state): State<ApiState>,
    Json(query): Json<SearchQuery>,
) -> Result<Json<SearchResponse>, ApiError> {
    if query.query.trim().is_empty() {
        return Err(ApiError::ValidationError("Query must not be empty".into()));
    }
    if query.top_k == 0 || query.top_k > MAX_SEARCH_TOP_K {
        return Err(ApiError::ValidationError(format!(
            "top_k must be between 1 and {MAX_SEARCH_TOP_K}"
        )));
    }

    info!(top_k = query.top_k, "Received search request");
    let hits = retrieve(
        &state.embedding,
        state.lifecycle.vector_index(),
        &query.query,
        query.top_k,
    )
    .await;

    Ok(Json(SearchResponse {
        results: hits.into_iter().map(hit_to_result).collect(),
    }))
}

/// Retrieval-augmented question answering with citations.
pub async fn query_documents(
    State(state): State<ApiState>,
    Json(query): Json<RagQuery>,
) -> Result<Json<RagResponse>, ApiError> {
    if query.question.trim().is_empty() {
        return Err(ApiError::ValidationError("Question must not be empty".into()));
    }
    if query.top_k_retrieval == 0 || query.top_k_retrieval > MAX_RETRIEVAL_TOP_K {
        return Err(ApiError::ValidationError(format!(
            "top_k_retrieval must be between 1 and {MAX_RETRIEVAL_TOP_K}"
        )));
    }

    info!(
        top_k_retrieval = query.top_k_retrieval,
        "Received RAG query"
    );

    let hits = retrieve(
        &state.embedding,
        state.lifecycle.vector_index(),
        &query.question,
        query.top_k_retrieval,
    )
    .await;

    let grounded = generator::answer(
        state.llm.as_ref(),
        &query.question,
        &hits,
        &state.config.chat_model,
    )
    .await?;

    Ok(Json(RagResponse {
        answer: grounded.answer,
        citations: grounded.citations,
    }))
}
