use std::{sync::Arc, time::Duration};

use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    RetryIf,
};
use tracing::{info, info_span, warn};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        store::StorageManager,
        types::{
            document::{DocumentRecord, DocumentStatus, DocumentTransition},
            extraction_job::ExtractionJob,
            parsed_content::ParsedContent,
        },
        vector::VectorIndex,
    },
    utils::{config::AppConfig, embedding::EmbeddingProvider},
};

use crate::chunker::Chunker;
use crate::extract::extract_text;

/// Outcome of one extraction unit. `Failed` is a business outcome (the
/// document is marked parsing_failed and the job is done); infrastructure
/// errors surface as `Err` and feed the job queue's retry policy.
#[derive(Debug, PartialEq, Eq)]
pub enum ExtractionOutcome {
    Completed,
    Failed(String),
    Skipped(String),
}

/// Drives documents through extraction and ingestion. Holds its own
/// database handles so background units never share a request-scoped
/// connection.
pub struct ExtractionPipeline {
    metadata_db: Arc<SurrealDbClient>,
    content_db: Arc<SurrealDbClient>,
    storage: StorageManager,
    embedding: Arc<EmbeddingProvider>,
    vector_index: VectorIndex,
    config: AppConfig,
}

impl ExtractionPipeline {
    pub fn new(
        metadata_db: Arc<SurrealDbClient>,
        content_db: Arc<SurrealDbClient>,
        storage: StorageManager,
        embedding: Arc<EmbeddingProvider>,
        config: AppConfig,
    ) -> Self {
        let vector_index = VectorIndex::new(content_db.clone());
        Self {
            metadata_db,
            content_db,
            storage,
            embedding,
            vector_index,
            config,
        }
    }

    pub fn vector_index(&self) -> &VectorIndex {
        &self.vector_index
    }

    /// Process one claimed job: run extraction and settle the job row.
    pub async fn process_job(&self, job: ExtractionJob) -> Result<(), AppError> {
        let job_id = job.id.clone();
        let attempt = job.attempts;
        let worker_label = job
            .worker_id
            .clone()
            .unwrap_or_else(|| "unknown-worker".to_string());
        let span = info_span!(
            "extraction_task",
            %job_id,
            attempt,
            worker_id = %worker_label
        );
        let _enter = span.enter();

        match self.run_extraction(&job.document_id).await {
            Ok(outcome) => {
                match &outcome {
                    ExtractionOutcome::Completed => {
                        info!(%job_id, attempt, "extraction task succeeded");
                    }
                    ExtractionOutcome::Failed(reason) => {
                        info!(%job_id, attempt, reason, "document failed extraction");
                    }
                    ExtractionOutcome::Skipped(reason) => {
                        info!(%job_id, attempt, reason, "extraction task skipped");
                    }
                }
                job.mark_succeeded(&self.metadata_db).await?;
                Ok(())
            }
            Err(err) => {
                let reason = err.to_string();
                if job.can_retry() {
                    let delay = Self::retry_delay(job.attempts);
                    job.mark_failed(&reason, delay, &self.metadata_db).await?;
                    warn!(
                        %job_id,
                        attempt = job.attempts,
                        retry_in_secs = delay.as_secs(),
                        "extraction task failed; scheduled retry"
                    );
                } else {
                    job.mark_dead_letter(&reason, &self.metadata_db).await?;
                    warn!(
                        %job_id,
                        attempt = job.attempts,
                        "extraction task failed; moved to dead letter queue"
                    );
                }
                Err(err)
            }
        }
    }

    fn retry_delay(attempt: u32) -> Duration {
        const BASE_SECONDS: u64 = 30;
        const MAX_SECONDS: u64 = 15 * 60;

        let capped_attempt = attempt.saturating_sub(1).min(5);
        let multiplier = 2_u64.pow(capped_attempt);
        let delay = BASE_SECONDS * multiplier;

        Duration::from_secs(delay.min(MAX_SECONDS))
    }

    /// The extraction unit itself.
    ///
    /// Ordering is significant: the parsed content is written to the
    /// content store *before* the status flips to parsing_completed, so a
    /// reader observing that status is guaranteed to find the content. The
    /// flip is retried on transient database errors rather than re-running
    /// extraction; re-running over an already-completed document rewrites
    /// identical content and is safe.
    pub async fn run_extraction(
        &self,
        document_id: &str,
    ) -> Result<ExtractionOutcome, AppError> {
        let Some(record) = DocumentRecord::get(&self.metadata_db, document_id).await? else {
            return Ok(ExtractionOutcome::Skipped(
                "document record no longer exists".into(),
            ));
        };

        let rerun = match record.status {
            DocumentStatus::Uploaded | DocumentStatus::ParsingFailed => {
                DocumentRecord::apply_transition(
                    &self.metadata_db,
                    document_id,
                    DocumentTransition::BeginParsing,
                )
                .await?;
                false
            }
            // A lease-expired unit may resume a document stuck in parsing.
            DocumentStatus::Parsing => false,
            DocumentStatus::ParsingCompleted => true,
            DocumentStatus::Deleting | DocumentStatus::Deleted => {
                return Ok(ExtractionOutcome::Skipped(
                    "document is being deleted".into(),
                ));
            }
            DocumentStatus::Analyzing
            | DocumentStatus::AnalysisFailed
            | DocumentStatus::Analyzed
            | DocumentStatus::Error => {
                return Ok(ExtractionOutcome::Skipped(format!(
                    "document status {} does not accept extraction",
                    record.status
                )));
            }
        };

        let Some(bytes) = self.storage.get(&record.storage_path).await? else {
            warn!(document_id, path = %record.storage_path, "Blob missing for document");
            return self
                .fail_parsing(document_id, "stored file is missing")
                .await;
        };

        let media_type = record.media_type.clone();
        let extracted = tokio::task::spawn_blocking(move || {
            extract_text(&bytes, &media_type)
        })
        .await?;

        let text = match extracted {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                return self
                    .fail_parsing(document_id, "extraction produced no text")
                    .await;
            }
            Err(err) => {
                return self.fail_parsing(document_id, &err.to_string()).await;
            }
        };

        // In-flight delete check: do not persist results for a document
        // that moved to deleting while we were extracting.
        let Some(current) = DocumentRecord::get(&self.metadata_db, document_id).await? else {
            return Ok(ExtractionOutcome::Skipped(
                "document removed during extraction".into(),
            ));
        };
        if matches!(
            current.status,
            DocumentStatus::Deleting | DocumentStatus::Deleted
        ) {
            return Ok(ExtractionOutcome::Skipped(
                "document entered deletion during extraction".into(),
            ));
        }

        ParsedContent::save(
            &self.content_db,
            ParsedContent::new(document_id.to_string(), text),
        )
        .await?;

        if rerun {
            // Status is already parsing_completed; the content rewrite
            // above was the whole job.
            return Ok(ExtractionOutcome::Completed);
        }

        let flip_strategy = ExponentialBackoff::from_millis(100).map(jitter).take(3);
        let flip = RetryIf::spawn(
            flip_strategy,
            || {
                DocumentRecord::apply_transition(
                    &self.metadata_db,
                    document_id,
                    DocumentTransition::CompleteParsing,
                )
            },
            |err: &AppError| matches!(err, AppError::Database(_)),
        )
        .await;

        match flip {
            Ok(_) => Ok(ExtractionOutcome::Completed),
            Err(AppError::IllegalTransition(_)) => {
                let current = DocumentRecord::get(&self.metadata_db, document_id).await?;
                match current.map(|r| r.status) {
                    // Lost the race against a delete: retract our write.
                    Some(DocumentStatus::Deleting) | Some(DocumentStatus::Deleted) | None => {
                        ParsedContent::delete(&self.content_db, document_id).await?;
                        Ok(ExtractionOutcome::Skipped(
                            "document entered deletion before status flip".into(),
                        ))
                    }
                    Some(DocumentStatus::ParsingCompleted) => {
                        Ok(ExtractionOutcome::Completed)
                    }
                    Some(status) => Err(AppError::IllegalTransition(format!(
                        "Cannot complete parsing for document {document_id} in status {status}"
                    ))),
                }
            }
            Err(err) => Err(err),
        }
    }

    async fn fail_parsing(
        &self,
        document_id: &str,
        reason: &str,
    ) -> Result<ExtractionOutcome, AppError> {
        warn!(document_id, reason, "Marking document parsing_failed");
        match DocumentRecord::apply_transition(
            &self.metadata_db,
            document_id,
            DocumentTransition::FailParsing,
        )
        .await
        {
            Ok(_) | Err(AppError::IllegalTransition(_)) => {
                Ok(ExtractionOutcome::Failed(reason.to_string()))
            }
            Err(err) => Err(err),
        }
    }

    /// User-triggered ingestion: chunk the parsed text, embed in one
    /// batch, and replace the document's points in the vector index.
    /// Deterministic chunk ids make a repeat run an upsert; deleting the
    /// document's old points first also clears a stale tail when the text
    /// got shorter.
    pub async fn ingest_document(&self, document_id: &str) -> Result<usize, AppError> {
        let record = DocumentRecord::get_required(&self.metadata_db, document_id).await?;

        match record.status {
            DocumentStatus::ParsingCompleted
            | DocumentStatus::Analyzing
            | DocumentStatus::AnalysisFailed
            | DocumentStatus::Analyzed => {}
            status => {
                return Err(AppError::Validation(format!(
                    "Document is not ready for ingestion (status: {status})"
                )));
            }
        }

        let Some(content) = ParsedContent::get(&self.content_db, document_id).await? else {
            DocumentRecord::apply_transition(
                &self.metadata_db,
                document_id,
                DocumentTransition::FlagError,
            )
            .await?;
            return Err(AppError::Inconsistency(format!(
                "Document {document_id} reports parsed text but none is stored"
            )));
        };

        self.vector_index
            .ensure_collection(self.embedding.dimension() as u32)
            .await?;

        let chunker = Chunker::new(self.config.chunk_size, self.config.chunk_overlap);
        let chunks = chunker.chunk_document(document_id, &record.file_name, &content.text);
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let vectors = self.embedding.embed_batch(texts).await?;

        self.vector_index.delete_by_document(document_id).await?;
        self.vector_index.upsert(&chunks, vectors).await?;

        info!(
            document_id,
            chunks = chunks.len(),
            "Document ingested into vector index"
        );
        Ok(chunks.len())
    }
}
