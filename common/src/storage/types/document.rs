use state_machines::state_machine;
use surrealdb::sql::Datetime as SurrealDatetime;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// Lifecycle states of an ingested document. Serialized lowercase; these
/// values are part of the HTTP contract.
#[derive(Debug, Default, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    #[default]
    Uploaded,
    Parsing,
    ParsingFailed,
    ParsingCompleted,
    Analyzing,
    AnalysisFailed,
    Analyzed,
    Deleting,
    Deleted,
    Error,
}

impl DocumentStatus {
    pub const ALL: [DocumentStatus; 10] = [
        DocumentStatus::Uploaded,
        DocumentStatus::Parsing,
        DocumentStatus::ParsingFailed,
        DocumentStatus::ParsingCompleted,
        DocumentStatus::Analyzing,
        DocumentStatus::AnalysisFailed,
        DocumentStatus::Analyzed,
        DocumentStatus::Deleting,
        DocumentStatus::Deleted,
        DocumentStatus::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Uploaded => "uploaded",
            DocumentStatus::Parsing => "parsing",
            DocumentStatus::ParsingFailed => "parsing_failed",
            DocumentStatus::ParsingCompleted => "parsing_completed",
            DocumentStatus::Analyzing => "analyzing",
            DocumentStatus::AnalysisFailed => "analysis_failed",
            DocumentStatus::Analyzed => "analyzed",
            DocumentStatus::Deleting => "deleting",
            DocumentStatus::Deleted => "deleted",
            DocumentStatus::Error => "error",
        }
    }

    /// Terminal states accept no further transitions without operator
    /// involvement.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DocumentStatus::Deleting | DocumentStatus::Deleted | DocumentStatus::Error
        )
    }

    /// Fixed human-readable description reported by the status endpoint.
    pub fn description(&self) -> &'static str {
        match self {
            DocumentStatus::Uploaded => "Document has been uploaded but not yet processed",
            DocumentStatus::Parsing => "Document is being processed for text extraction",
            DocumentStatus::ParsingFailed => "Failed to extract text from the document",
            DocumentStatus::ParsingCompleted => {
                "Document text has been extracted and is ready for analysis"
            }
            DocumentStatus::Analyzing => "Document is being analyzed by AI",
            DocumentStatus::AnalysisFailed => "Failed to analyze the document",
            DocumentStatus::Analyzed => "Document has been successfully analyzed",
            DocumentStatus::Deleting => "Document is being deleted",
            DocumentStatus::Deleted => "Document has been deleted",
            DocumentStatus::Error => "An error occurred with this document",
        }
    }
}

impl std::str::FromStr for DocumentStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|status| status.as_str() == s)
            .copied()
            .ok_or_else(|| {
                let valid = Self::ALL
                    .iter()
                    .map(|v| v.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                AppError::Validation(format!(
                    "Invalid status value '{s}'. Valid values are: {valid}"
                ))
            })
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentTransition {
    BeginParsing,
    CompleteParsing,
    FailParsing,
    BeginAnalysis,
    CompleteAnalysis,
    FailAnalysis,
    BeginDelete,
    CompleteDelete,
    FlagError,
}

impl DocumentTransition {
    fn as_str(&self) -> &'static str {
        match self {
            DocumentTransition::BeginParsing => "begin_parsing",
            DocumentTransition::CompleteParsing => "complete_parsing",
            DocumentTransition::FailParsing => "fail_parsing",
            DocumentTransition::BeginAnalysis => "begin_analysis",
            DocumentTransition::CompleteAnalysis => "complete_analysis",
            DocumentTransition::FailAnalysis => "fail_analysis",
            DocumentTransition::BeginDelete => "begin_delete",
            DocumentTransition::CompleteDelete => "complete_delete",
            DocumentTransition::FlagError => "flag_error",
        }
    }
}

mod lifecycle {
    use super::state_machine;

    state_machine! {
        name: DocumentLifecycleMachine,
        initial: Uploaded,
        states: [Uploaded, Parsing, ParsingFailed, ParsingCompleted, Analyzing, AnalysisFailed, Analyzed, Deleting, Deleted, Error],
        events {
            begin_parsing {
                transition: { from: Uploaded, to: Parsing }
                transition: { from: ParsingFailed, to: Parsing }
            }
            complete_parsing {
                transition: { from: Parsing, to: ParsingCompleted }
            }
            fail_parsing {
                transition: { from: Parsing, to: ParsingFailed }
            }
            begin_analysis {
                transition: { from: ParsingCompleted, to: Analyzing }
                transition: { from: AnalysisFailed, to: Analyzing }
            }
            complete_analysis {
                transition: { from: Analyzing, to: Analyzed }
            }
            fail_analysis {
                transition: { from: Analyzing, to: AnalysisFailed }
            }
            begin_delete {
                transition: { from: Uploaded, to: Deleting }
                transition: { from: Parsing, to: Deleting }
                transition: { from: ParsingFailed, to: Deleting }
                transition: { from: ParsingCompleted, to: Deleting }
                transition: { from: Analyzing, to: Deleting }
                transition: { from: AnalysisFailed, to: Deleting }
                transition: { from: Analyzed, to: Deleting }
                transition: { from: Error, to: Deleting }
            }
            complete_delete {
                transition: { from: Deleting, to: Deleted }
            }
            flag_error {
                transition: { from: Uploaded, to: Error }
                transition: { from: Parsing, to: Error }
                transition: { from: ParsingFailed, to: Error }
                transition: { from: ParsingCompleted, to: Error }
                transition: { from: Analyzing, to: Error }
                transition: { from: AnalysisFailed, to: Error }
                transition: { from: Analyzed, to: Error }
            }
        }
    }

    pub(super) fn uploaded() -> DocumentLifecycleMachine<(), Uploaded> {
        DocumentLifecycleMachine::new(())
    }

    pub(super) fn parsing() -> DocumentLifecycleMachine<(), Parsing> {
        uploaded()
            .begin_parsing()
            .expect("begin_parsing transition from Uploaded should exist")
    }

    pub(super) fn parsing_failed() -> DocumentLifecycleMachine<(), ParsingFailed> {
        parsing()
            .fail_parsing()
            .expect("fail_parsing transition from Parsing should exist")
    }

    pub(super) fn parsing_completed() -> DocumentLifecycleMachine<(), ParsingCompleted> {
        parsing()
            .complete_parsing()
            .expect("complete_parsing transition from Parsing should exist")
    }

    pub(super) fn analyzing() -> DocumentLifecycleMachine<(), Analyzing> {
        parsing_completed()
            .begin_analysis()
            .expect("begin_analysis transition from ParsingCompleted should exist")
    }

    pub(super) fn analysis_failed() -> DocumentLifecycleMachine<(), AnalysisFailed> {
        analyzing()
            .fail_analysis()
            .expect("fail_analysis transition from Analyzing should exist")
    }

    pub(super) fn analyzed() -> DocumentLifecycleMachine<(), Analyzed> {
        analyzing()
            .complete_analysis()
            .expect("complete_analysis transition from Analyzing should exist")
    }

    pub(super) fn deleting() -> DocumentLifecycleMachine<(), Deleting> {
        uploaded()
            .begin_delete()
            .expect("begin_delete transition from Uploaded should exist")
    }

    pub(super) fn error() -> DocumentLifecycleMachine<(), Error> {
        uploaded()
            .flag_error()
            .expect("flag_error transition from Uploaded should exist")
    }
}

fn invalid_transition(status: &DocumentStatus, event: DocumentTransition) -> AppError {
    AppError::IllegalTransition(format!(
        "Invalid document transition: {} -> {}",
        status.as_str(),
        event.as_str()
    ))
}

/// Resolve the next status for `event` from `status`, or reject. Every
/// legal edge is checked against the typed machine so the runtime graph
/// and the compile-time graph cannot drift apart.
pub fn compute_next_status(
    status: &DocumentStatus,
    event: DocumentTransition,
) -> Result<DocumentStatus, AppError> {
    use lifecycle::*;
    use DocumentStatus as S;
    use DocumentTransition as T;

    let reject = || invalid_transition(status, event);

    match (status, event) {
        (S::Uploaded, T::BeginParsing) => uploaded()
            .begin_parsing()
            .map(|_| S::Parsing)
            .map_err(|_| reject()),
        (S::ParsingFailed, T::BeginParsing) => parsing_failed()
            .begin_parsing()
            .map(|_| S::Parsing)
            .map_err(|_| reject()),
        (S::Parsing, T::CompleteParsing) => parsing()
            .complete_parsing()
            .map(|_| S::ParsingCompleted)
            .map_err(|_| reject()),
        (S::Parsing, T::FailParsing) => parsing()
            .fail_parsing()
            .map(|_| S::ParsingFailed)
            .map_err(|_| reject()),
        (S::ParsingCompleted, T::BeginAnalysis) => parsing_completed()
            .begin_analysis()
            .map(|_| S::Analyzing)
            .map_err(|_| reject()),
        (S::AnalysisFailed, T::BeginAnalysis) => analysis_failed()
            .begin_analysis()
            .map(|_| S::Analyzing)
            .map_err(|_| reject()),
        (S::Analyzing, T::CompleteAnalysis) => analyzing()
            .complete_analysis()
            .map(|_| S::Analyzed)
            .map_err(|_| reject()),
        (S::Analyzing, T::FailAnalysis) => analyzing()
            .fail_analysis()
            .map(|_| S::AnalysisFailed)
            .map_err(|_| reject()),
        (S::Uploaded, T::BeginDelete) => uploaded()
            .begin_delete()
            .map(|_| S::Deleting)
            .map_err(|_| reject()),
        (S::Parsing, T::BeginDelete) => parsing()
            .begin_delete()
            .map(|_| S::Deleting)
            .map_err(|_| reject()),
        (S::ParsingFailed, T::BeginDelete) => parsing_failed()
            .begin_delete()
            .map(|_| S::Deleting)
            .map_err(|_| reject()),
        (S::ParsingCompleted, T::BeginDelete) => parsing_completed()
            .begin_delete()
            .map(|_| S::Deleting)
            .map_err(|_| reject()),
        (S::Analyzing, T::BeginDelete) => analyzing()
            .begin_delete()
            .map(|_| S::Deleting)
            .map_err(|_| reject()),
        (S::AnalysisFailed, T::BeginDelete) => analysis_failed()
            .begin_delete()
            .map(|_| S::Deleting)
            .map_err(|_| reject()),
        (S::Analyzed, T::BeginDelete) => analyzed()
            .begin_delete()
            .map(|_| S::Deleting)
            .map_err(|_| reject()),
        (S::Error, T::BeginDelete) => error()
            .begin_delete()
            .map(|_| S::Deleting)
            .map_err(|_| reject()),
        (S::Deleting, T::CompleteDelete) => deleting()
            .complete_delete()
            .map(|_| S::Deleted)
            .map_err(|_| reject()),
        (S::Uploaded, T::FlagError) => uploaded()
            .flag_error()
            .map(|_| S::Error)
            .map_err(|_| reject()),
        (S::Parsing, T::FlagError) => parsing()
            .flag_error()
            .map(|_| S::Error)
            .map_err(|_| reject()),
        (S::ParsingFailed, T::FlagError) => parsing_failed()
            .flag_error()
            .map(|_| S::Error)
            .map_err(|_| reject()),
        (S::ParsingCompleted, T::FlagError) => parsing_completed()
            .flag_error()
            .map(|_| S::Error)
            .map_err(|_| reject()),
        (S::Analyzing, T::FlagError) => analyzing()
            .flag_error()
            .map(|_| S::Error)
            .map_err(|_| reject()),
        (S::AnalysisFailed, T::FlagError) => analysis_failed()
            .flag_error()
            .map(|_| S::Error)
            .map_err(|_| reject()),
        (S::Analyzed, T::FlagError) => analyzed()
            .flag_error()
            .map(|_| S::Error)
            .map_err(|_| reject()),
        _ => Err(reject()),
    }
}

/// States from which `event` is legal, derived from the transition table.
fn transition_sources(event: DocumentTransition) -> Vec<&'static str> {
    DocumentStatus::ALL
        .iter()
        .filter(|status| compute_next_status(status, event).is_ok())
        .map(DocumentStatus::as_str)
        .collect()
}

/// Target state of `event`; every event has exactly one target.
fn transition_target(event: DocumentTransition) -> DocumentStatus {
    match event {
        DocumentTransition::BeginParsing => DocumentStatus::Parsing,
        DocumentTransition::CompleteParsing => DocumentStatus::ParsingCompleted,
        DocumentTransition::FailParsing => DocumentStatus::ParsingFailed,
        DocumentTransition::BeginAnalysis => DocumentStatus::Analyzing,
        DocumentTransition::CompleteAnalysis => DocumentStatus::Analyzed,
        DocumentTransition::FailAnalysis => DocumentStatus::AnalysisFailed,
        DocumentTransition::BeginDelete => DocumentStatus::Deleting,
        DocumentTransition::CompleteDelete => DocumentStatus::Deleted,
        DocumentTransition::FlagError => DocumentStatus::Error,
    }
}

stored_object!(DocumentRecord, "documents", {
    owner_id: String,
    title: String,
    description: Option<String>,
    file_name: String,
    file_size: u64,
    media_type: String,
    storage_path: String,
    tags: Vec<String>,
    status: DocumentStatus
});

impl DocumentRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        owner_id: String,
        title: String,
        description: Option<String>,
        file_name: String,
        file_size: u64,
        media_type: String,
        storage_path: String,
        tags: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            owner_id,
            title,
            description,
            file_name,
            file_size,
            media_type,
            storage_path,
            tags,
            status: DocumentStatus::Uploaded,
        }
    }

    pub async fn get(db: &SurrealDbClient, id: &str) -> Result<Option<DocumentRecord>, AppError> {
        Ok(db.get_item::<DocumentRecord>(id).await?)
    }

    pub async fn get_required(
        db: &SurrealDbClient,
        id: &str,
    ) -> Result<DocumentRecord, AppError> {
        Self::get(db, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Document {id} not found")))
    }

    pub async fn list_for_owner(
        db: &SurrealDbClient,
        owner_id: &str,
    ) -> Result<Vec<DocumentRecord>, AppError> {
        let records: Vec<DocumentRecord> = db
            .query(
                "SELECT * FROM type::table($table)
                 WHERE owner_id = $owner_id
                 ORDER BY created_at DESC",
            )
            .bind(("table", Self::table_name()))
            .bind(("owner_id", owner_id.to_string()))
            .await?
            .take(0)?;
        Ok(records)
    }

    /// Apply a lifecycle transition as a compare-and-set: the status flip
    /// only happens if the row is still in a legal source state when the
    /// update executes. A failed CAS is reported as an illegal transition,
    /// never retried silently; concurrent callers racing for the same edge
    /// (e.g. two `begin_analysis`) therefore resolve to exactly one winner.
    pub async fn apply_transition(
        db: &SurrealDbClient,
        id: &str,
        event: DocumentTransition,
    ) -> Result<DocumentRecord, AppError> {
        let allowed = transition_sources(event);
        let next = transition_target(event);

        const TRANSITION_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET status = $next,
                updated_at = $now
            WHERE status IN $allowed
            RETURN *;
        "#;

        let now = chrono::Utc::now();
        let mut result = db
            .client
            .query(TRANSITION_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_string()))
            .bind(("next", next.as_str()))
            .bind(("now", SurrealDatetime::from(now)))
            .bind(("allowed", allowed))
            .await?;

        let updated: Option<DocumentRecord> = result.take(0)?;
        match updated {
            Some(record) => Ok(record),
            None => {
                let current = Self::get(db, id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("Document {id} not found")))?;
                Err(invalid_transition(&current.status, event))
            }
        }
    }

    /// Operator-facing direct status write used by the status endpoint.
    /// Route-level rules (no manual deleting/deleted, no edits once
    /// deleting/deleted) are enforced by the caller; this still refuses to
    /// touch rows already in a delete state to close the race.
    pub async fn force_set_status(
        db: &SurrealDbClient,
        id: &str,
        status: DocumentStatus,
    ) -> Result<DocumentRecord, AppError> {
        const SET_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET status = $status,
                updated_at = $now
            WHERE status NOT IN $locked
            RETURN *;
        "#;

        let now = chrono::Utc::now();
        let mut result = db
            .client
            .query(SET_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_string()))
            .bind(("status", status.as_str()))
            .bind(("now", SurrealDatetime::from(now)))
            .bind((
                "locked",
                vec![
                    DocumentStatus::Deleting.as_str(),
                    DocumentStatus::Deleted.as_str(),
                ],
            ))
            .await?;

        let updated: Option<DocumentRecord> = result.take(0)?;
        updated.ok_or_else(|| {
            AppError::IllegalTransition(format!(
                "Cannot change status of document {id} while it is being deleted"
            ))
        })
    }
}
