use serde::{Deserialize, Serialize};

/// A bounded text segment derived from a document; the unit of embedding
/// and retrieval. Never mutated after creation — re-ingesting a document
/// replaces its chunks wholesale under the same ids.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: usize,
    pub text: String,
    pub token_len: usize,
    pub source_file: String,
}

impl Chunk {
    /// Deterministic id: same document and index always produce the same
    /// id, which turns re-ingestion into a vector-index upsert instead of a
    /// duplicate insert.
    pub fn chunk_id(document_id: &str, index: usize) -> String {
        format!("{document_id}_chunk_{index}")
    }

    pub fn new(
        document_id: &str,
        chunk_index: usize,
        text: String,
        token_len: usize,
        source_file: &str,
    ) -> Self {
        Self {
            id: Self::chunk_id(document_id, chunk_index),
            document_id: document_id.to_string(),
            chunk_index,
            text,
            token_len,
            source_file: source_file.to_string(),
        }
    }
}
