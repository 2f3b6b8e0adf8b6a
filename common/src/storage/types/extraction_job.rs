use std::time::Duration;

use chrono::Duration as ChronoDuration;
use surrealdb::sql::Datetime as SurrealDatetime;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

pub const MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_LEASE_SECS: i64 = 300;

#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub enum JobState {
    #[serde(rename = "Pending")]
    #[default]
    Pending,
    #[serde(rename = "Running")]
    Running,
    #[serde(rename = "Succeeded")]
    Succeeded,
    #[serde(rename = "Failed")]
    Failed,
    #[serde(rename = "DeadLetter")]
    DeadLetter,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "Pending",
            JobState::Running => "Running",
            JobState::Succeeded => "Succeeded",
            JobState::Failed => "Failed",
            JobState::DeadLetter => "DeadLetter",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::DeadLetter)
    }
}

// One queued extraction per document: the job id IS the document id, so
// re-enqueueing a document can never produce duplicate concurrent units.
stored_object!(ExtractionJob, "extraction_job", {
    document_id: String,
    state: JobState,
    attempts: u32,
    max_attempts: u32,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime")]
    scheduled_at: chrono::DateTime<chrono::Utc>,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    locked_at: Option<chrono::DateTime<chrono::Utc>>,
    lease_duration_secs: i64,
    worker_id: Option<String>,
    error_message: Option<String>
});

impl ExtractionJob {
    pub fn new(document_id: String) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: document_id.clone(),
            created_at: now,
            updated_at: now,
            document_id,
            state: JobState::Pending,
            attempts: 0,
            max_attempts: MAX_ATTEMPTS,
            scheduled_at: now,
            locked_at: None,
            lease_duration_secs: DEFAULT_LEASE_SECS,
            worker_id: None,
            error_message: None,
        }
    }

    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Queue an extraction for the document. A job that is already pending
    /// or running is left alone; a finished or failed one is reset so
    /// explicit retries start from a clean slate.
    pub async fn enqueue(
        db: &SurrealDbClient,
        document_id: &str,
    ) -> Result<ExtractionJob, AppError> {
        if let Some(existing) = db.get_item::<ExtractionJob>(document_id).await? {
            if matches!(existing.state, JobState::Pending | JobState::Running) {
                return Ok(existing);
            }
        }

        let job = Self::new(document_id.to_string());
        db.upsert_item(job.clone()).await?;
        Ok(job)
    }

    /// Claim the next ready job for this worker. Single CAS query so two
    /// workers can never reserve the same job; an expired lease makes a
    /// stuck Running job claimable again. SET clauses apply in order, so
    /// `attempts` must be computed while `state` still holds the old value.
    pub async fn claim_next_ready(
        db: &SurrealDbClient,
        worker_id: &str,
        now: chrono::DateTime<chrono::Utc>,
        lease_duration: Duration,
    ) -> Result<Option<ExtractionJob>, AppError> {
        const CLAIM_QUERY: &str = r#"
            UPDATE (
                SELECT * FROM type::table($table)
                WHERE state IN $candidate_states
                  AND scheduled_at <= $now
                  AND (
                        attempts < max_attempts
                        OR state = $running_state
                  )
                  AND (
                        locked_at = NONE
                        OR time::unix($now) - time::unix(locked_at) >= lease_duration_secs
                  )
                ORDER BY scheduled_at ASC, created_at ASC
                LIMIT 1
            )
            SET attempts = if state IN $increment_states THEN
                    if attempts + 1 > max_attempts THEN max_attempts ELSE attempts + 1 END
                ELSE
                    attempts
                END,
                state = $running_state,
                locked_at = $now,
                worker_id = $worker_id,
                lease_duration_secs = $lease_secs,
                updated_at = $now
            RETURN *;
        "#;

        let mut result = db
            .client
            .query(CLAIM_QUERY)
            .bind(("table", Self::table_name()))
            .bind((
                "candidate_states",
                vec![
                    JobState::Pending.as_str(),
                    JobState::Failed.as_str(),
                    JobState::Running.as_str(),
                ],
            ))
            .bind((
                "increment_states",
                vec![JobState::Pending.as_str(), JobState::Failed.as_str()],
            ))
            .bind(("running_state", JobState::Running.as_str()))
            .bind(("now", SurrealDatetime::from(now)))
            .bind(("worker_id", worker_id.to_string()))
            .bind(("lease_secs", lease_duration.as_secs() as i64))
            .await?;

        let job: Option<ExtractionJob> = result.take(0)?;
        Ok(job)
    }

    pub async fn mark_succeeded(&self, db: &SurrealDbClient) -> Result<ExtractionJob, AppError> {
        const COMPLETE_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET state = $succeeded,
                updated_at = $now,
                locked_at = NONE,
                worker_id = NONE,
                error_message = NONE
            WHERE state = $running AND worker_id = $worker_id
            RETURN *;
        "#;

        let now = chrono::Utc::now();
        let mut result = db
            .client
            .query(COMPLETE_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("succeeded", JobState::Succeeded.as_str()))
            .bind(("running", JobState::Running.as_str()))
            .bind(("now", SurrealDatetime::from(now)))
            .bind(("worker_id", self.worker_id.clone().unwrap_or_default()))
            .await?;

        let updated: Option<ExtractionJob> = result.take(0)?;
        updated.ok_or_else(|| {
            AppError::IllegalTransition(format!(
                "Job {} is no longer running for this worker",
                self.id
            ))
        })
    }

    pub async fn mark_failed(
        &self,
        reason: &str,
        retry_delay: Duration,
        db: &SurrealDbClient,
    ) -> Result<ExtractionJob, AppError> {
        let now = chrono::Utc::now();
        let retry_at = now
            + ChronoDuration::from_std(retry_delay).unwrap_or_else(|_| ChronoDuration::seconds(30));

        const FAIL_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET state = $failed,
                updated_at = $now,
                locked_at = NONE,
                worker_id = NONE,
                scheduled_at = $retry_at,
                error_message = $error_message
            WHERE state = $running AND worker_id = $worker_id
            RETURN *;
        "#;

        let mut result = db
            .client
            .query(FAIL_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("failed", JobState::Failed.as_str()))
            .bind(("running", JobState::Running.as_str()))
            .bind(("now", SurrealDatetime::from(now)))
            .bind(("retry_at", SurrealDatetime::from(retry_at)))
            .bind(("error_message", reason.to_string()))
            .bind(("worker_id", self.worker_id.clone().unwrap_or_default()))
            .await?;

        let updated: Option<ExtractionJob> = result.take(0)?;
        updated.ok_or_else(|| {
            AppError::IllegalTransition(format!(
                "Job {} is no longer running for this worker",
                self.id
            ))
        })
    }

    pub async fn mark_dead_letter(
        &self,
        reason: &str,
        db: &SurrealDbClient,
    ) -> Result<ExtractionJob, AppError> {
        const DEAD_LETTER_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET state = $dead,
                updated_at = $now,
                locked_at = NONE,
                worker_id = NONE,
                error_message = $error_message
            WHERE state IN $from_states
            RETURN *;
        "#;

        let now = chrono::Utc::now();
        let mut result = db
            .client
            .query(DEAD_LETTER_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("dead", JobState::DeadLetter.as_str()))
            .bind((
                "from_states",
                vec![JobState::Running.as_str(), JobState::Failed.as_str()],
            ))
            .bind(("now", SurrealDatetime::from(now)))
            .bind(("error_message", reason.to_string()))
            .await?;

        let updated: Option<ExtractionJob> = result.take(0)?;
        updated.ok_or_else(|| {
            AppError::IllegalTransition(format!("Job {} cannot be dead-lettered", self.id))
        })
    }

    pub async fn delete(db: &SurrealDbClient, document_id: &str) -> Result<(), AppError> {
        db.delete_item::<ExtractionJob>(document_id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn memory_db() -> SurrealDbClient {
        let database = Uuid::new_v4().to_string();
        SurrealDbClient::memory("test_ns", &database)
            .await
            .expect("in-memory surrealdb")
    }

    #[tokio::test]
    async fn enqueue_is_idempotent_while_pending() {
        let db = memory_db().await;

        let first = ExtractionJob::enqueue(&db, "doc-1").await.expect("enqueue");
        let second = ExtractionJob::enqueue(&db, "doc-1").await.expect("enqueue again");
        assert_eq!(first.id, second.id);
        assert_eq!(second.state, JobState::Pending);

        let all = db
            .get_all_stored_items::<ExtractionJob>()
            .await
            .expect("all");
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn claim_marks_running_and_assigns_worker() {
        let db = memory_db().await;
        ExtractionJob::enqueue(&db, "doc-1").await.expect("enqueue");

        let claimed =
            ExtractionJob::claim_next_ready(&db, "worker-1", chrono::Utc::now(), Duration::from_secs(60))
                .await
                .expect("claim")
                .expect("job available");

        assert_eq!(claimed.state, JobState::Running);
        assert_eq!(claimed.worker_id.as_deref(), Some("worker-1"));
        assert_eq!(claimed.attempts, 1);

        // Nothing else to claim while the lease is held.
        let second =
            ExtractionJob::claim_next_ready(&db, "worker-2", chrono::Utc::now(), Duration::from_secs(60))
                .await
                .expect("claim");
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn failed_jobs_are_reclaimable_after_delay() {
        let db = memory_db().await;
        ExtractionJob::enqueue(&db, "doc-1").await.expect("enqueue");

        let claimed =
            ExtractionJob::claim_next_ready(&db, "worker-1", chrono::Utc::now(), Duration::from_secs(60))
                .await
                .expect("claim")
                .expect("job");

        let failed = claimed
            .mark_failed("blob fetch timed out", Duration::from_secs(0), &db)
            .await
            .expect("mark failed");
        assert_eq!(failed.state, JobState::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("blob fetch timed out"));
        assert!(failed.worker_id.is_none());

        let reclaimed =
            ExtractionJob::claim_next_ready(&db, "worker-2", chrono::Utc::now(), Duration::from_secs(60))
                .await
                .expect("claim")
                .expect("job claimable again");
        assert_eq!(reclaimed.attempts, 2);
    }

    #[tokio::test]
    async fn succeed_then_enqueue_resets_for_retry() {
        let db = memory_db().await;
        ExtractionJob::enqueue(&db, "doc-1").await.expect("enqueue");

        let claimed =
            ExtractionJob::claim_next_ready(&db, "worker-1", chrono::Utc::now(), Duration::from_secs(60))
                .await
                .expect("claim")
                .expect("job");
        let done = claimed.mark_succeeded(&db).await.expect("succeed");
        assert_eq!(done.state, JobState::Succeeded);

        // Explicit re-extraction request resets the finished job.
        let requeued = ExtractionJob::enqueue(&db, "doc-1").await.expect("requeue");
        assert_eq!(requeued.state, JobState::Pending);
        assert_eq!(requeued.attempts, 0);
    }

    #[tokio::test]
    async fn exhausted_attempts_dead_letter() {
        let db = memory_db().await;
        ExtractionJob::enqueue(&db, "doc-1").await.expect("enqueue");

        for attempt in 1..=MAX_ATTEMPTS {
            let claimed = ExtractionJob::claim_next_ready(
                &db,
                "worker-1",
                chrono::Utc::now(),
                Duration::from_secs(60),
            )
            .await
            .expect("claim")
            .expect("job");
            assert_eq!(claimed.attempts, attempt);

            if claimed.can_retry() {
                claimed
                    .mark_failed("still broken", Duration::from_secs(0), &db)
                    .await
                    .expect("fail");
            } else {
                let dead = claimed
                    .mark_dead_letter("still broken", &db)
                    .await
                    .expect("dead letter");
                assert_eq!(dead.state, JobState::DeadLetter);
            }
        }

        let after = ExtractionJob::claim_next_ready(
            &db,
            "worker-1",
            chrono::Utc::now(),
            Duration::from_secs(60),
        )
        .await
        .expect("claim");
        assert!(after.is_none(), "dead-lettered jobs are not claimable");
    }
}
