use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    sync::Arc,
};

use anyhow::{anyhow, Result};
use async_openai::{types::CreateEmbeddingRequestArgs, Client};

use crate::{
    error::AppError,
    utils::config::{AppConfig, EmbeddingBackendKind},
};

/// Stateless text-to-vector mapping with a fixed dimensionality that is
/// queryable before any vector collection exists.
#[derive(Clone)]
pub struct EmbeddingProvider {
    inner: EmbeddingInner,
}

#[derive(Clone)]
enum EmbeddingInner {
    OpenAI {
        client: Arc<Client<async_openai::config::OpenAIConfig>>,
        model: String,
        dimensions: u32,
    },
    Hashed {
        dimension: usize,
    },
}

impl EmbeddingProvider {
    pub fn from_config(
        config: &AppConfig,
        openai_client: Option<Arc<Client<async_openai::config::OpenAIConfig>>>,
    ) -> Result<Self> {
        match config.embedding_backend {
            EmbeddingBackendKind::OpenAI => {
                let client = openai_client
                    .ok_or_else(|| anyhow!("openai embedding backend requires a client"))?;
                Ok(Self::new_openai(
                    client,
                    config.embedding_model.clone(),
                    config.embedding_dimensions,
                ))
            }
            EmbeddingBackendKind::Hashed => {
                Self::new_hashed(config.embedding_dimensions as usize)
            }
        }
    }

    pub fn new_openai(
        client: Arc<Client<async_openai::config::OpenAIConfig>>,
        model: String,
        dimensions: u32,
    ) -> Self {
        EmbeddingProvider {
            inner: EmbeddingInner::OpenAI {
                client,
                model,
                dimensions,
            },
        }
    }

    pub fn new_hashed(dimension: usize) -> Result<Self> {
        Ok(EmbeddingProvider {
            inner: EmbeddingInner::Hashed {
                dimension: dimension.max(1),
            },
        })
    }

    pub fn backend_label(&self) -> &'static str {
        match self.inner {
            EmbeddingInner::Hashed { .. } => "hashed",
            EmbeddingInner::OpenAI { .. } => "openai",
        }
    }

    pub fn dimension(&self) -> usize {
        match &self.inner {
            EmbeddingInner::Hashed { dimension } => *dimension,
            EmbeddingInner::OpenAI { dimensions, .. } => *dimensions as usize,
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        let mut batch = self.embed_batch(vec![text.to_owned()]).await?;
        batch
            .pop()
            .ok_or_else(|| AppError::LLMParsing("No embedding data received".into()))
    }

    pub async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, AppError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        match &self.inner {
            EmbeddingInner::Hashed { dimension } => Ok(texts
                .iter()
                .map(|text| hashed_embedding(text, *dimension))
                .collect()),
            EmbeddingInner::OpenAI {
                client,
                model,
                dimensions,
            } => {
                let request = CreateEmbeddingRequestArgs::default()
                    .model(model.clone())
                    .input(texts)
                    .dimensions(*dimensions)
                    .build()
                    .map_err(AppError::from_provider_call)?;

                let response = client
                    .embeddings()
                    .create(request)
                    .await
                    .map_err(AppError::from_provider_call)?;

                Ok(response
                    .data
                    .into_iter()
                    .map(|item| item.embedding)
                    .collect())
            }
        }
    }
}

// Deterministic token-bucket vectors, unit norm. Used for tests and
// offline runs; neighborhoods track lexical overlap only.
fn hashed_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let dim = dimension.max(1);
    let mut vector = vec![0.0f32; dim];
    if text.is_empty() {
        return vector;
    }

    let mut token_count = 0f32;
    for token in tokens(text) {
        token_count += 1.0;
        let idx = bucket(&token, dim);
        if let Some(slot) = vector.get_mut(idx) {
            *slot += 1.0;
        }
    }

    if token_count == 0.0 {
        return vector;
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }

    vector
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_ascii_lowercase())
}

fn bucket(token: &str, dimension: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    token.hash(&mut hasher);
    (hasher.finish() as usize) % dimension
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hashed_backend_reports_fixed_dimension() {
        let provider = EmbeddingProvider::new_hashed(32).expect("hashed provider");
        assert_eq!(provider.dimension(), 32);
        assert_eq!(provider.backend_label(), "hashed");

        let vector = provider.embed("termination clause").await.expect("embed");
        assert_eq!(vector.len(), 32);
    }

    #[tokio::test]
    async fn hashed_embeddings_are_deterministic() {
        let provider = EmbeddingProvider::new_hashed(16).expect("hashed provider");
        let a = provider.embed("the agreement terminates").await.expect("a");
        let b = provider.embed("the agreement terminates").await.expect("b");
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn hashed_embeddings_are_unit_norm() {
        let provider = EmbeddingProvider::new_hashed(16).expect("hashed provider");
        let v = provider.embed("governing law of the state").await.expect("v");
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5, "expected unit norm, got {norm}");
    }

    #[tokio::test]
    async fn batch_embedding_matches_single_calls() {
        let provider = EmbeddingProvider::new_hashed(16).expect("hashed provider");
        let batch = provider
            .embed_batch(vec!["first clause".into(), "second clause".into()])
            .await
            .expect("batch");
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0], provider.embed("first clause").await.expect("one"));
    }

    #[tokio::test]
    async fn empty_batch_is_a_noop() {
        let provider = EmbeddingProvider::new_hashed(16).expect("hashed provider");
        let batch = provider.embed_batch(Vec::new()).await.expect("batch");
        assert!(batch.is_empty());
    }
}
