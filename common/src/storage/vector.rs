use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use crate::{
    error::AppError,
    storage::{db::SurrealDbClient, types::chunk::Chunk},
};

/// Table holding the vector points.
const POINT_TABLE: &str = "document_chunk";
/// Meta record remembering the dimensionality the collection was built with.
const COLLECTION_META_ID: &str = "document_chunk";
const INDEX_NAME: &str = "idx_embedding_document_chunk";
/// HNSW search breadth.
const KNN_EF: usize = 40;

mod point {
    use crate::stored_object;

    stored_object!(IndexedChunk, "document_chunk", {
        document_id: String,
        chunk_index: usize,
        text: String,
        token_len: usize,
        source_file: String,
        embedding: Vec<f32>
    });
}

mod meta {
    use crate::stored_object;

    stored_object!(VectorCollection, "vector_collection", {
        dimension: u32
    });
}

pub use meta::VectorCollection;
pub use point::IndexedChunk;

/// One KNN result: the stored point plus its similarity to the query.
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub id: String,
    pub document_id: String,
    pub chunk_index: usize,
    pub text: String,
    pub source_file: String,
    pub score: f32,
}

#[derive(Debug, Deserialize)]
struct KnnRow {
    #[serde(deserialize_with = "point::deserialize_flexible_id")]
    id: String,
    document_id: String,
    chunk_index: usize,
    text: String,
    source_file: String,
    distance: f32,
}

/// Vector index over the content database. Points are stored under their
/// chunk id, so re-ingesting a document upserts instead of duplicating, and
/// cascading delete can sweep by document id.
#[derive(Clone)]
pub struct VectorIndex {
    db: Arc<SurrealDbClient>,
}

impl VectorIndex {
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        Self { db }
    }

    /// Idempotently prepare the collection for `dimension`-sized vectors.
    /// A collection that was already created with a different dimension is
    /// a configuration fault and fails loudly, never degrades search.
    pub async fn ensure_collection(&self, dimension: u32) -> Result<(), AppError> {
        if let Some(existing) = self
            .db
            .get_item::<VectorCollection>(COLLECTION_META_ID)
            .await?
        {
            if existing.dimension != dimension {
                return Err(AppError::Inconsistency(format!(
                    "Vector collection '{POINT_TABLE}' was built with dimension {}, \
                     but the embedder reports dimension {dimension}",
                    existing.dimension
                )));
            }
            return Ok(());
        }

        self.db
            .query(format!(
                "DEFINE INDEX IF NOT EXISTS {INDEX_NAME} ON {POINT_TABLE} \
                 FIELDS embedding HNSW DIMENSION {dimension} DIST COSINE"
            ))
            .await?;

        let now = chrono::Utc::now();
        self.db
            .upsert_item(VectorCollection {
                id: COLLECTION_META_ID.to_string(),
                created_at: now,
                updated_at: now,
                dimension,
            })
            .await?;

        info!(dimension, "Vector collection initialized");
        Ok(())
    }

    /// Store one point per chunk; chunk and vector counts must match.
    pub async fn upsert(
        &self,
        chunks: &[Chunk],
        vectors: Vec<Vec<f32>>,
    ) -> Result<(), AppError> {
        if chunks.len() != vectors.len() {
            return Err(AppError::Validation(format!(
                "Embedding batch mismatch: {} chunks but {} vectors",
                chunks.len(),
                vectors.len()
            )));
        }

        for (chunk, embedding) in chunks.iter().zip(vectors) {
            let now = chrono::Utc::now();
            self.db
                .upsert_item(IndexedChunk {
                    id: chunk.id.clone(),
                    created_at: now,
                    updated_at: now,
                    document_id: chunk.document_id.clone(),
                    chunk_index: chunk.chunk_index,
                    text: chunk.text.clone(),
                    token_len: chunk.token_len,
                    source_file: chunk.source_file.clone(),
                    embedding,
                })
                .await?;
        }

        Ok(())
    }

    /// Top-k cosine neighbors of `query_vector`, best first.
    pub async fn search(
        &self,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredPoint>, AppError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let knn_query = format!(
            "SELECT *, vector::distance::knn() AS distance FROM {POINT_TABLE} \
             WHERE embedding <|{k},{KNN_EF}|> {query_vector:?} ORDER BY distance"
        );

        let rows: Vec<KnnRow> = self.db.query(knn_query).await?.take(0)?;

        Ok(rows
            .into_iter()
            .map(|row| ScoredPoint {
                id: row.id,
                document_id: row.document_id,
                chunk_index: row.chunk_index,
                text: row.text,
                source_file: row.source_file,
                score: 1.0 - row.distance,
            })
            .collect())
    }

    /// Cascade hook: remove every point belonging to `document_id`.
    pub async fn delete_by_document(&self, document_id: &str) -> Result<(), AppError> {
        self.db
            .query("DELETE type::table($table) WHERE document_id = $document_id")
            .bind(("table", POINT_TABLE))
            .bind(("document_id", document_id.to_string()))
            .await?;
        Ok(())
    }

    pub async fn points_for_document(
        &self,
        document_id: &str,
    ) -> Result<Vec<IndexedChunk>, AppError> {
        let points: Vec<IndexedChunk> = self
            .db
            .query("SELECT * FROM type::table($table) WHERE document_id = $document_id ORDER BY chunk_index")
            .bind(("table", POINT_TABLE))
            .bind(("document_id", document_id.to_string()))
            .await?
            .take(0)?;
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn index_with_dimension(dimension: u32) -> VectorIndex {
        let database = Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory("test_ns", &database)
            .await
            .expect("in-memory surrealdb");
        let index = VectorIndex::new(Arc::new(db));
        index
            .ensure_collection(dimension)
            .await
            .expect("ensure collection");
        index
    }

    fn chunk(document_id: &str, i: usize, text: &str) -> Chunk {
        Chunk::new(document_id, i, text.to_string(), 2, "nda.txt")
    }

    #[tokio::test]
    async fn ensure_collection_is_idempotent() {
        let index = index_with_dimension(3).await;
        index.ensure_collection(3).await.expect("second ensure");
    }

    #[tokio::test]
    async fn ensure_collection_rejects_dimension_mismatch() {
        let index = index_with_dimension(3).await;
        let result = index.ensure_collection(8).await;
        match result {
            Err(AppError::Inconsistency(msg)) => {
                assert!(msg.contains("dimension"), "unhelpful message: {msg}");
            }
            other => panic!("expected loud mismatch failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn upsert_rejects_length_mismatch() {
        let index = index_with_dimension(3).await;
        let chunks = vec![chunk("doc-1", 0, "alpha")];
        let result = index.upsert(&chunks, vec![]).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn reingestion_upserts_instead_of_duplicating() {
        let index = index_with_dimension(3).await;
        let chunks = vec![chunk("doc-1", 0, "alpha"), chunk("doc-1", 1, "beta")];
        let vectors = vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]];

        index.upsert(&chunks, vectors.clone()).await.expect("first upsert");
        index.upsert(&chunks, vectors).await.expect("second upsert");

        let points = index
            .points_for_document("doc-1")
            .await
            .expect("points");
        assert_eq!(points.len(), 2, "same chunk ids must not duplicate");
        assert_eq!(points[0].id, "doc-1_chunk_0");
        assert_eq!(points[1].id, "doc-1_chunk_1");
    }

    #[tokio::test]
    async fn search_ranks_by_similarity() {
        let index = index_with_dimension(3).await;
        let chunks = vec![
            chunk("doc-1", 0, "termination clause"),
            chunk("doc-1", 1, "payment terms"),
            chunk("doc-2", 0, "governing law"),
        ];
        let vectors = vec![
            vec![1.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.0, 0.0, 1.0],
        ];
        index.upsert(&chunks, vectors).await.expect("upsert");

        let hits = index
            .search(&[0.9, 0.1, 0.0], 2)
            .await
            .expect("search");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "doc-1_chunk_0");
        assert!(
            hits[0].score >= hits[1].score,
            "hits must be ordered best-first"
        );
        assert_eq!(hits[0].text, "termination clause");
    }

    #[tokio::test]
    async fn search_on_empty_collection_returns_nothing() {
        let index = index_with_dimension(3).await;
        let hits = index.search(&[1.0, 0.0, 0.0], 5).await.expect("search");
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn delete_by_document_cascades_all_points() {
        let index = index_with_dimension(3).await;
        let chunks = vec![
            chunk("doc-1", 0, "alpha"),
            chunk("doc-1", 1, "beta"),
            chunk("doc-2", 0, "gamma"),
        ];
        let vectors = vec![
            vec![1.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.0, 0.0, 1.0],
        ];
        index.upsert(&chunks, vectors).await.expect("upsert");

        index.delete_by_document("doc-1").await.expect("delete");

        assert!(index
            .points_for_document("doc-1")
            .await
            .expect("points doc-1")
            .is_empty());
        assert_eq!(
            index
                .points_for_document("doc-2")
                .await
                .expect("points doc-2")
                .len(),
            1
        );
    }
}
