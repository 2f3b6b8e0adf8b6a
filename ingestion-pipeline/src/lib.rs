#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod chunker;
pub mod extract;
pub mod lifecycle;
pub mod pipeline;

use chrono::Utc;
use common::storage::{
    db::SurrealDbClient,
    types::extraction_job::{ExtractionJob, DEFAULT_LEASE_SECS},
};
pub use lifecycle::{DocumentLifecycle, NewDocumentUpload};
pub use pipeline::{ExtractionOutcome, ExtractionPipeline};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Claim-and-process loop for extraction jobs. Runs until the process
/// stops; failures back off instead of spinning.
pub async fn run_worker_loop(
    db: Arc<SurrealDbClient>,
    pipeline: Arc<ExtractionPipeline>,
) -> Result<(), Box<dyn std::error::Error>> {
    let worker_id = format!("extraction-worker-{}", Uuid::new_v4());
    let lease_duration = Duration::from_secs(DEFAULT_LEASE_SECS as u64);
    let idle_backoff = Duration::from_millis(500);

    loop {
        match ExtractionJob::claim_next_ready(&db, &worker_id, Utc::now(), lease_duration).await {
            Ok(Some(job)) => {
                let job_id = job.id.clone();
                info!(
                    %worker_id,
                    %job_id,
                    attempt = job.attempts,
                    "claimed extraction job"
                );
                if let Err(err) = pipeline.process_job(job).await {
                    error!(%worker_id, %job_id, error = %err, "extraction job failed");
                }
            }
            Ok(None) => {
                sleep(idle_backoff).await;
            }
            Err(err) => {
                error!(%worker_id, error = %err, "failed to claim extraction job");
                warn!("Backing off for 1s after claim error");
                sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
