use std::sync::Arc;

use bytes::Bytes;
use tracing::{error, info, warn};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        store::{document_blob_path, document_blob_prefix, StorageManager},
        types::{
            analysis::AnalysisResult,
            chat_session::{ChatMessage, ChatSession},
            document::{DocumentRecord, DocumentStatus, DocumentTransition},
            extraction_job::ExtractionJob,
            parsed_content::ParsedContent,
        },
        vector::VectorIndex,
    },
    utils::config::AppConfig,
};
use retrieval_pipeline::{analysis::normalize_analysis, llm::LlmAdapter};

/// Everything needed to register a new document.
#[derive(Debug, Clone)]
pub struct NewDocumentUpload {
    pub bytes: Bytes,
    pub file_name: String,
    pub media_type: String,
    pub title: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
}

/// Owns document status and keeps the metadata store, content store, blob
/// store and vector index consistent under partial failure. All writes to
/// `documents.status` funnel through the CAS transitions on
/// [`DocumentRecord`].
pub struct DocumentLifecycle {
    metadata_db: Arc<SurrealDbClient>,
    content_db: Arc<SurrealDbClient>,
    storage: StorageManager,
    vector_index: VectorIndex,
    config: AppConfig,
}

impl DocumentLifecycle {
    pub fn new(
        metadata_db: Arc<SurrealDbClient>,
        content_db: Arc<SurrealDbClient>,
        storage: StorageManager,
        config: AppConfig,
    ) -> Self {
        let vector_index = VectorIndex::new(content_db.clone());
        Self {
            metadata_db,
            content_db,
            storage,
            vector_index,
            config,
        }
    }

    pub fn metadata_db(&self) -> &Arc<SurrealDbClient> {
        &self.metadata_db
    }

    pub fn content_db(&self) -> &Arc<SurrealDbClient> {
        &self.content_db
    }

    pub fn vector_index(&self) -> &VectorIndex {
        &self.vector_index
    }

    /// Register an uploaded file: blob write first, metadata record second,
    /// extraction job last. A failed blob write aborts creation entirely;
    /// a failed record write cleans the blob back up, so creation is
    /// both-or-neither. The record is readable before extraction starts.
    pub async fn create_document(
        &self,
        upload: NewDocumentUpload,
    ) -> Result<DocumentRecord, AppError> {
        let owner_id = self.config.owner_id.clone();
        let file_name = sanitize_file_name(&upload.file_name);

        let mut record = DocumentRecord::new(
            owner_id.clone(),
            upload.title,
            upload.description,
            file_name.clone(),
            upload.bytes.len() as u64,
            upload.media_type,
            String::new(),
            upload.tags,
        );
        record.storage_path = document_blob_path(&owner_id, &record.id, &file_name);

        self.storage.put(&record.storage_path, upload.bytes).await?;

        if let Err(err) = self.metadata_db.store_item(record.clone()).await {
            // Both-or-neither: do not leave an orphaned blob behind.
            if let Err(cleanup_err) = self
                .storage
                .delete_prefix(&document_blob_prefix(&owner_id, &record.id))
                .await
            {
                error!(
                    document_id = %record.id,
                    error = %cleanup_err,
                    "Failed to clean up blob after record write failure"
                );
            }
            return Err(err.into());
        }

        ExtractionJob::enqueue(&self.metadata_db, &record.id).await?;
        info!(document_id = %record.id, "Document created and extraction scheduled");
        Ok(record)
    }

    pub async fn get_document(&self, document_id: &str) -> Result<DocumentRecord, AppError> {
        DocumentRecord::get_required(&self.metadata_db, document_id).await
    }

    pub async fn list_documents(&self) -> Result<Vec<DocumentRecord>, AppError> {
        DocumentRecord::list_for_owner(&self.metadata_db, &self.config.owner_id).await
    }

    /// Queue a fresh extraction run for retries after parsing failures.
    pub async fn request_extraction(&self, document_id: &str) -> Result<(), AppError> {
        let record = self.get_document(document_id).await?;
        match record.status {
            DocumentStatus::Uploaded
            | DocumentStatus::ParsingFailed
            | DocumentStatus::ParsingCompleted => {
                ExtractionJob::enqueue(&self.metadata_db, document_id).await?;
                Ok(())
            }
            status => Err(AppError::Validation(format!(
                "Cannot re-run extraction while document status is {status}"
            ))),
        }
    }

    /// Analyze a parsed document with the configured LLM. The
    /// parsing_completed → analyzing CAS is the single-flight gate: of two
    /// concurrent callers exactly one proceeds, the other is rejected.
    pub async fn analyze_document(
        &self,
        document_id: &str,
        adapter: &dyn LlmAdapter,
        model: &str,
    ) -> Result<AnalysisResult, AppError> {
        let record = self.get_document(document_id).await?;

        // Friendly rejections before the CAS; the CAS remains the gate.
        match record.status {
            DocumentStatus::ParsingCompleted | DocumentStatus::AnalysisFailed => {}
            DocumentStatus::Uploaded | DocumentStatus::Parsing => {
                return Err(AppError::Validation(
                    "Document is still being processed, try again later.".into(),
                ));
            }
            DocumentStatus::ParsingFailed => {
                return Err(AppError::Validation("Cannot analyze (parsing failed).".into()));
            }
            DocumentStatus::Analyzing => {
                return Err(AppError::Validation(
                    "Document is already being analyzed, try again later.".into(),
                ));
            }
            DocumentStatus::Analyzed => {
                return Err(AppError::Validation(
                    "Document has already been analyzed.".into(),
                ));
            }
            status => {
                return Err(AppError::Validation(format!(
                    "Document not ready for analysis (status: {status})."
                )));
            }
        }

        DocumentRecord::apply_transition(
            &self.metadata_db,
            document_id,
            DocumentTransition::BeginAnalysis,
        )
        .await?;

        let content = match ParsedContent::get(&self.content_db, document_id).await? {
            Some(content) => content,
            None => {
                // Status claimed parsed text that is not there: park the
                // record for an operator instead of papering over it.
                error!(document_id, "Parsed content missing for analyzable document");
                DocumentRecord::apply_transition(
                    &self.metadata_db,
                    document_id,
                    DocumentTransition::FlagError,
                )
                .await?;
                return Err(AppError::Inconsistency(format!(
                    "Parsed content missing for document {document_id}"
                )));
            }
        };

        let raw = match adapter.analyze_document(&content.text, model).await {
            Ok(raw) => raw,
            Err(err) => {
                self.settle_failed_analysis(document_id).await;
                return Err(err);
            }
        };
        let analysis = normalize_analysis(&raw);

        let result = AnalysisResult::new(
            document_id.to_string(),
            analysis.summary,
            analysis.entities,
            analysis.risk_factors,
            analysis.recommendations,
            model.to_string(),
        );
        if let Err(err) = AnalysisResult::save(&self.content_db, result.clone()).await {
            self.settle_failed_analysis(document_id).await;
            return Err(err);
        }

        DocumentRecord::apply_transition(
            &self.metadata_db,
            document_id,
            DocumentTransition::CompleteAnalysis,
        )
        .await?;

        info!(document_id, model, "Document analysis completed");
        Ok(result)
    }

    async fn settle_failed_analysis(&self, document_id: &str) {
        if let Err(err) = DocumentRecord::apply_transition(
            &self.metadata_db,
            document_id,
            DocumentTransition::FailAnalysis,
        )
        .await
        {
            error!(document_id, error = %err, "Failed to record analysis failure");
        }
    }

    pub async fn get_analysis(&self, document_id: &str) -> Result<AnalysisResult, AppError> {
        let record = self.get_document(document_id).await?;
        if record.status != DocumentStatus::Analyzed {
            return Err(AppError::Validation(format!(
                "Analysis not available for this document (status: {})",
                record.status
            )));
        }

        match AnalysisResult::get(&self.content_db, document_id).await? {
            Some(result) => Ok(result),
            None => {
                error!(document_id, "Document marked analyzed but no analysis stored");
                DocumentRecord::apply_transition(
                    &self.metadata_db,
                    document_id,
                    DocumentTransition::FlagError,
                )
                .await?;
                Err(AppError::Inconsistency(format!(
                    "Analysis result missing for document {document_id}"
                )))
            }
        }
    }

    /// Chat over the full extracted text. Requires the document to be
    /// parsed; the message pair is appended to the per-document session.
    pub async fn chat(
        &self,
        document_id: &str,
        message: String,
        adapter: &dyn LlmAdapter,
    ) -> Result<ChatSession, AppError> {
        let record = self.get_document(document_id).await?;

        match record.status {
            DocumentStatus::ParsingCompleted
            | DocumentStatus::Analyzing
            | DocumentStatus::AnalysisFailed
            | DocumentStatus::Analyzed => {}
            DocumentStatus::Uploaded | DocumentStatus::Parsing => {
                return Err(AppError::Validation(
                    "Document is still being processed. Please try again later.".into(),
                ));
            }
            DocumentStatus::ParsingFailed => {
                return Err(AppError::Validation(
                    "Failed to extract text from document. Cannot chat.".into(),
                ));
            }
            status => {
                return Err(AppError::Validation(format!(
                    "Document not ready for chat (status: {status})."
                )));
            }
        }

        let Some(content) = ParsedContent::get(&self.content_db, document_id).await? else {
            error!(document_id, "Parsed content missing for chat-ready document");
            DocumentRecord::apply_transition(
                &self.metadata_db,
                document_id,
                DocumentTransition::FlagError,
            )
            .await?;
            return Err(AppError::Inconsistency(format!(
                "Parsed content missing for document {document_id}"
            )));
        };

        // Chat sessions live in the content database next to the parsed text.
        let owner_id = &self.config.owner_id;
        let mut history = ChatSession::get(&self.content_db, owner_id, document_id)
            .await?
            .map(|session| session.messages)
            .unwrap_or_default();
        history.push(ChatMessage::user(message.clone()));

        let reply = adapter
            .chat(&history, &content.text, &self.config.chat_model)
            .await?;

        ChatSession::append_exchange(
            &self.content_db,
            owner_id,
            document_id,
            ChatMessage::user(message),
            ChatMessage::assistant(reply),
        )
        .await
    }

    pub async fn get_status(
        &self,
        document_id: &str,
    ) -> Result<(DocumentStatus, &'static str, chrono::DateTime<chrono::Utc>), AppError> {
        let record = self.get_document(document_id).await?;
        Ok((record.status, record.status.description(), record.updated_at))
    }

    /// Delete a document across all stores as a saga: flip to deleting
    /// (which locks out every other transition), then best-effort delete
    /// each dependent store, then — only if every step succeeded — remove
    /// the owning metadata row. Partial failure leaves the record
    /// observable in deleting with the per-step errors logged for an
    /// operator; nothing is silently swallowed.
    pub async fn delete_document(&self, document_id: &str) -> Result<(), AppError> {
        let record = self.get_document(document_id).await?;

        DocumentRecord::apply_transition(
            &self.metadata_db,
            document_id,
            DocumentTransition::BeginDelete,
        )
        .await
        .map_err(|err| match err {
            AppError::IllegalTransition(_) => AppError::IllegalTransition(format!(
                "Document {document_id} is already being deleted"
            )),
            other => other,
        })?;

        let owner_id = &self.config.owner_id;
        let mut step_errors: Vec<String> = Vec::new();

        // Dependent stores first, owning record last.
        if let Err(err) = ParsedContent::delete(&self.content_db, document_id).await {
            step_errors.push(format!("parsed content: {err}"));
            error!(document_id, error = %err, "Failed to delete parsed content");
        }
        if let Err(err) = AnalysisResult::delete(&self.content_db, document_id).await {
            step_errors.push(format!("analysis: {err}"));
            error!(document_id, error = %err, "Failed to delete analysis");
        }
        if let Err(err) = ChatSession::delete(&self.content_db, owner_id, document_id).await {
            step_errors.push(format!("chat session: {err}"));
            error!(document_id, error = %err, "Failed to delete chat session");
        }
        if let Err(err) = self.vector_index.delete_by_document(document_id).await {
            step_errors.push(format!("vector index: {err}"));
            error!(document_id, error = %err, "Failed to delete vector points");
        }
        if let Err(err) = self
            .storage
            .delete_prefix(&document_blob_prefix(&record.owner_id, document_id))
            .await
        {
            step_errors.push(format!("blob store: {err}"));
            error!(document_id, error = %err, "Failed to delete stored file");
        }
        if let Err(err) = ExtractionJob::delete(&self.metadata_db, document_id).await {
            step_errors.push(format!("extraction job: {err}"));
            error!(document_id, error = %err, "Failed to delete extraction job");
        }

        if !step_errors.is_empty() {
            warn!(
                document_id,
                errors = ?step_errors,
                "Deletion incomplete; record left in deleting for operator follow-up"
            );
            return Err(AppError::InternalError(format!(
                "Deletion of document {document_id} incomplete: {}",
                step_errors.join("; ")
            )));
        }

        DocumentRecord::apply_transition(
            &self.metadata_db,
            document_id,
            DocumentTransition::CompleteDelete,
        )
        .await?;
        self.metadata_db
            .delete_item::<DocumentRecord>(document_id)
            .await?;

        info!(document_id, "Document deleted across all stores");
        Ok(())
    }
}

/// Replace anything outside `[A-Za-z0-9_.]` in the stem so file names are
/// safe to embed in blob paths.
fn sanitize_file_name(file_name: &str) -> String {
    let sanitize = |part: &str| -> String {
        part.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    };

    match file_name.rfind('.') {
        Some(idx) => {
            let (name, ext) = file_name.split_at(idx);
            format!("{}{}", sanitize(name), ext)
        }
        None => sanitize(file_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::chunk::Chunk;
    use retrieval_pipeline::llm::testing::StaticLlmAdapter;
    use uuid::Uuid;

    async fn test_lifecycle() -> DocumentLifecycle {
        let metadata_db = Arc::new(
            SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
                .await
                .expect("metadata db"),
        );
        let content_db = Arc::new(
            SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
                .await
                .expect("content db"),
        );
        let config = AppConfig::for_tests();
        let storage = StorageManager::new(&config).await.expect("storage");
        DocumentLifecycle::new(metadata_db, content_db, storage, config)
    }

    fn upload(content: &str) -> NewDocumentUpload {
        NewDocumentUpload {
            bytes: Bytes::from(content.as_bytes().to_vec()),
            file_name: "test.txt".into(),
            media_type: "text/plain".into(),
            title: "Test agreement".into(),
            description: Some("A test".into()),
            tags: vec!["legal".into()],
        }
    }

    async fn parsed_document(lifecycle: &DocumentLifecycle, text: &str) -> DocumentRecord {
        let record = lifecycle
            .create_document(upload(text))
            .await
            .expect("create");
        ParsedContent::save(
            lifecycle.content_db(),
            ParsedContent::new(record.id.clone(), text.to_string()),
        )
        .await
        .expect("save content");
        DocumentRecord::apply_transition(
            lifecycle.metadata_db(),
            &record.id,
            DocumentTransition::BeginParsing,
        )
        .await
        .expect("begin parsing");
        DocumentRecord::apply_transition(
            lifecycle.metadata_db(),
            &record.id,
            DocumentTransition::CompleteParsing,
        )
        .await
        .expect("complete parsing")
    }

    #[tokio::test]
    async fn create_stores_blob_record_and_job() {
        let lifecycle = test_lifecycle().await;
        let record = lifecycle
            .create_document(upload("The agreement shall terminate on January 1, 2030."))
            .await
            .expect("create");

        assert_eq!(record.status, DocumentStatus::Uploaded);
        assert_eq!(record.file_name, "test.txt");
        assert!(record.storage_path.contains(&record.id));

        // Record visible before extraction runs.
        let fetched = lifecycle.get_document(&record.id).await.expect("get");
        assert_eq!(fetched.status, DocumentStatus::Uploaded);

        // Blob written.
        assert!(lifecycle
            .storage
            .exists(&record.storage_path)
            .await
            .expect("exists"));

        // Extraction scheduled as an independent unit.
        let job = lifecycle
            .metadata_db()
            .get_item::<ExtractionJob>(&record.id)
            .await
            .expect("job fetch");
        assert!(job.is_some());
    }

    #[tokio::test]
    async fn analyze_produces_result_and_flips_status() {
        let lifecycle = test_lifecycle().await;
        let record = parsed_document(
            &lifecycle,
            "The agreement shall terminate on January 1, 2030.",
        )
        .await;
        let adapter = StaticLlmAdapter::default();

        let result = lifecycle
            .analyze_document(&record.id, &adapter, "gpt-4o")
            .await
            .expect("analyze");

        assert!(!result.summary.is_empty());
        assert_eq!(result.model_used, "gpt-4o");

        let updated = lifecycle.get_document(&record.id).await.expect("get");
        assert_eq!(updated.status, DocumentStatus::Analyzed);

        let stored = lifecycle.get_analysis(&record.id).await.expect("stored");
        assert_eq!(stored.summary, result.summary);
    }

    #[tokio::test]
    async fn analyze_rejects_unparsed_document() {
        let lifecycle = test_lifecycle().await;
        let record = lifecycle
            .create_document(upload("fresh upload"))
            .await
            .expect("create");
        let adapter = StaticLlmAdapter::default();

        let result = lifecycle
            .analyze_document(&record.id, &adapter, "gpt-4o")
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));

        let unchanged = lifecycle.get_document(&record.id).await.expect("get");
        assert_eq!(unchanged.status, DocumentStatus::Uploaded);
    }

    #[tokio::test]
    async fn analyze_failure_marks_analysis_failed_and_is_retryable() {
        use common::error::ProviderError;

        let lifecycle = test_lifecycle().await;
        let record = parsed_document(&lifecycle, "short contract").await;

        let failing = StaticLlmAdapter {
            fail_with: Some(|| {
                AppError::Provider(ProviderError::Unavailable("connection refused".into()))
            }),
            ..Default::default()
        };
        let result = lifecycle
            .analyze_document(&record.id, &failing, "gpt-4o")
            .await;
        assert!(matches!(result, Err(AppError::Provider(_))));

        let failed = lifecycle.get_document(&record.id).await.expect("get");
        assert_eq!(failed.status, DocumentStatus::AnalysisFailed);

        // Retry with a working adapter succeeds from analysis_failed.
        let adapter = StaticLlmAdapter::default();
        lifecycle
            .analyze_document(&record.id, &adapter, "gpt-4o")
            .await
            .expect("retry analyze");
        let analyzed = lifecycle.get_document(&record.id).await.expect("get");
        assert_eq!(analyzed.status, DocumentStatus::Analyzed);
    }

    #[tokio::test]
    async fn analyze_missing_content_parks_record_in_error() {
        let lifecycle = test_lifecycle().await;
        let record = parsed_document(&lifecycle, "contract text").await;
        ParsedContent::delete(lifecycle.content_db(), &record.id)
            .await
            .expect("drop content");

        let adapter = StaticLlmAdapter::default();
        let result = lifecycle
            .analyze_document(&record.id, &adapter, "gpt-4o")
            .await;
        assert!(matches!(result, Err(AppError::Inconsistency(_))));

        let parked = lifecycle.get_document(&record.id).await.expect("get");
        assert_eq!(parked.status, DocumentStatus::Error);

        // Never auto-healed: a second analyze attempt is rejected.
        let again = lifecycle
            .analyze_document(&record.id, &adapter, "gpt-4o")
            .await;
        assert!(matches!(again, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn chat_appends_pair_and_returns_history() {
        let lifecycle = test_lifecycle().await;
        let record = parsed_document(
            &lifecycle,
            "The agreement shall terminate on January 1, 2030.",
        )
        .await;
        let adapter = StaticLlmAdapter::default();

        let session = lifecycle
            .chat(&record.id, "When does the agreement end?".into(), &adapter)
            .await
            .expect("chat");
        assert_eq!(session.messages.len(), 2);
        assert!(session.messages[1].content.contains("January 1, 2030"));

        let session = lifecycle
            .chat(&record.id, "Anything else?".into(), &adapter)
            .await
            .expect("chat again");
        assert_eq!(session.messages.len(), 4);
    }

    #[tokio::test]
    async fn chat_rejects_unparsed_document() {
        let lifecycle = test_lifecycle().await;
        let record = lifecycle
            .create_document(upload("not parsed"))
            .await
            .expect("create");
        let adapter = StaticLlmAdapter::default();

        let result = lifecycle.chat(&record.id, "hello".into(), &adapter).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn delete_cascades_and_removes_record() {
        let lifecycle = test_lifecycle().await;
        let text = "The agreement shall terminate on January 1, 2030.";
        let record = parsed_document(&lifecycle, text).await;

        // Populate every dependent store.
        let adapter = StaticLlmAdapter::default();
        lifecycle
            .analyze_document(&record.id, &adapter, "gpt-4o")
            .await
            .expect("analyze");
        lifecycle
            .chat(&record.id, "When does it end?".into(), &adapter)
            .await
            .expect("chat");
        let chunk = Chunk::new(&record.id, 0, text.to_string(), 9, &record.file_name);
        lifecycle
            .vector_index()
            .ensure_collection(4)
            .await
            .expect("collection");
        lifecycle
            .vector_index()
            .upsert(&[chunk], vec![vec![0.1, 0.2, 0.3, 0.4]])
            .await
            .expect("upsert");

        lifecycle.delete_document(&record.id).await.expect("delete");

        // Owning row gone, so reads now report not-found.
        let result = lifecycle.get_document(&record.id).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));

        // Dependent stores swept.
        assert!(ParsedContent::get(lifecycle.content_db(), &record.id)
            .await
            .expect("content")
            .is_none());
        assert!(AnalysisResult::get(lifecycle.content_db(), &record.id)
            .await
            .expect("analysis")
            .is_none());
        assert!(ChatSession::get(lifecycle.content_db(), "test_user", &record.id)
            .await
            .expect("session")
            .is_none());
        assert!(lifecycle
            .vector_index()
            .points_for_document(&record.id)
            .await
            .expect("points")
            .is_empty());
        assert!(!lifecycle
            .storage
            .exists(&record.storage_path)
            .await
            .expect("blob"));
    }

    #[tokio::test]
    async fn delete_locks_out_other_transitions() {
        let lifecycle = test_lifecycle().await;
        let record = parsed_document(&lifecycle, "text").await;

        DocumentRecord::apply_transition(
            lifecycle.metadata_db(),
            &record.id,
            DocumentTransition::BeginDelete,
        )
        .await
        .expect("begin delete");

        let adapter = StaticLlmAdapter::default();
        let analyze = lifecycle
            .analyze_document(&record.id, &adapter, "gpt-4o")
            .await;
        assert!(analyze.is_err());

        let second_delete = lifecycle.delete_document(&record.id).await;
        assert!(matches!(second_delete, Err(AppError::IllegalTransition(_))));
    }

    #[tokio::test]
    async fn request_extraction_only_from_retryable_states() {
        let lifecycle = test_lifecycle().await;
        let record = parsed_document(&lifecycle, "text").await;

        lifecycle
            .request_extraction(&record.id)
            .await
            .expect("re-extract from parsing_completed");

        DocumentRecord::apply_transition(
            lifecycle.metadata_db(),
            &record.id,
            DocumentTransition::BeginAnalysis,
        )
        .await
        .expect("begin analysis");

        let rejected = lifecycle.request_extraction(&record.id).await;
        assert!(matches!(rejected, Err(AppError::Validation(_))));
    }

    #[test]
    fn file_names_are_sanitized() {
        assert_eq!(sanitize_file_name("normal_file.txt"), "normal_file.txt");
        assert_eq!(
            sanitize_file_name("file with spaces.txt"),
            "file_with_spaces.txt"
        );
        assert_eq!(sanitize_file_name("../dangerous.txt"), "___dangerous.txt");
        assert_eq!(sanitize_file_name("no_extension"), "no_extension");
    }
}
