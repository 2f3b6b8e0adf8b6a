use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Local,
    Memory,
}

#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    OpenAI,
    DeepSeek,
}

#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackendKind {
    OpenAI,
    Hashed,
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub openai_api_key: String,
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    /// Database holding the `documents` table and the extraction job queue.
    #[serde(default = "default_metadata_database")]
    pub surrealdb_metadata_database: String,
    /// Database holding parsed text, analyses, chat sessions and the vector
    /// collection. Kept separate from the metadata database on purpose.
    #[serde(default = "default_content_database")]
    pub surrealdb_content_database: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    pub http_port: u16,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_deepseek_base_url")]
    pub deepseek_base_url: String,
    #[serde(default = "default_llm_provider")]
    pub llm_provider: LlmProvider,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_storage_kind")]
    pub storage: StorageKind,
    #[serde(default = "default_embedding_backend")]
    pub embedding_backend: EmbeddingBackendKind,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    /// Single-tenant deployment: every record is owned by this id.
    #[serde(default = "default_owner_id")]
    pub owner_id: String,
}

fn default_metadata_database() -> String {
    "documents".to_string()
}

fn default_content_database() -> String {
    "document_content".to_string()
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_deepseek_base_url() -> String {
    "https://api.deepseek.com/v1".to_string()
}

fn default_llm_provider() -> LlmProvider {
    LlmProvider::OpenAI
}

fn default_chat_model() -> String {
    "gpt-4o".to_string()
}

fn default_storage_kind() -> StorageKind {
    StorageKind::Local
}

fn default_embedding_backend() -> EmbeddingBackendKind {
    EmbeddingBackendKind::OpenAI
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimensions() -> u32 {
    1536
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    150
}

fn default_owner_id() -> String {
    "local".to_string()
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

#[cfg(any(test, feature = "test-utils"))]
impl AppConfig {
    /// Configuration suitable for tests: memory blob store, hashed
    /// embeddings with a small dimension, no live endpoints.
    pub fn for_tests() -> Self {
        Self {
            openai_api_key: "test".into(),
            surrealdb_address: "mem://".into(),
            surrealdb_username: "root".into(),
            surrealdb_password: "root".into(),
            surrealdb_namespace: "test_ns".into(),
            surrealdb_metadata_database: "test_meta".into(),
            surrealdb_content_database: "test_content".into(),
            data_dir: "/tmp/unused".into(),
            http_port: 0,
            openai_base_url: "https://example.invalid/v1".into(),
            deepseek_base_url: "https://example.invalid/v1".into(),
            llm_provider: LlmProvider::OpenAI,
            chat_model: "gpt-4o".into(),
            storage: StorageKind::Memory,
            embedding_backend: EmbeddingBackendKind::Hashed,
            embedding_model: "hashed".into(),
            embedding_dimensions: 16,
            chunk_size: 1000,
            chunk_overlap: 150,
            owner_id: "test_user".into(),
        }
    }
}
