#![allow(clippy::missing_docs_in_private_items)]

pub mod analysis;
pub mod generator;
pub mod llm;

use common::{
    storage::vector::VectorIndex,
    utils::embedding::EmbeddingProvider,
};
use tracing::{instrument, warn};

/// One retrieval result: a chunk payload plus its similarity score.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RetrievedHit {
    pub id: String,
    pub document_id: String,
    pub chunk_index: usize,
    pub text: String,
    pub source_file: String,
    pub score: f32,
}

/// Embed the query and return the top-k nearest chunks, best first.
///
/// Retrieval degrades rather than fails: an embedding error or an empty
/// or missing index yields an empty hit list, and the generator's
/// no-context fallback takes over from there.
#[instrument(skip_all, fields(top_k))]
pub async fn retrieve(
    embedding: &EmbeddingProvider,
    index: &VectorIndex,
    query: &str,
    top_k: usize,
) -> Vec<RetrievedHit> {
    let query_vector = match embedding.embed(query).await {
        Ok(vector) => vector,
        Err(err) => {
            warn!(error = %err, "Failed to embed query; returning no hits");
            return Vec::new();
        }
    };

    match index.search(&query_vector, top_k).await {
        Ok(points) => points
            .into_iter()
            .map(|point| RetrievedHit {
                id: point.id,
                document_id: point.document_id,
                chunk_index: point.chunk_index,
                text: point.text,
                source_file: point.source_file,
                score: point.score,
            })
            .collect(),
        Err(err) => {
            warn!(error = %err, "Vector search failed; returning no hits");
            Vec::new()
        }
    }
}
