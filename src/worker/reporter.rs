use std::sync::Arc;

use uuid::Uuid;

use crate::error::Result;
use crate::store::{JobOutcome, JobStore};

/// Writes finished executions back to the store.
///
/// The write is a blind update by id: the claim already made this instance
/// the only possible writer. Failed writes are returned, never retried here.
#[derive(Clone)]
pub struct CompletionReporter {
    store: Arc<dyn JobStore>,
}

impl CompletionReporter {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    pub async fn report(&self, job_id: Uuid, outcome: &JobOutcome) -> Result<()> {
        self.store.complete(job_id, outcome).await?;
        match outcome {
            JobOutcome::Succeeded { result, duration } => tracing::info!(
                job_id = %job_id,
                result,
                duration_ms = duration.as_millis() as u64,
                "Reported completion"
            ),
            JobOutcome::Failed { error, duration } => tracing::info!(
                job_id = %job_id,
                error = %error,
                duration_ms = duration.as_millis() as u64,
                "Reported failed completion"
            ),
        }
        Ok(())
    }
}
