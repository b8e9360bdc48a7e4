use std::sync::Arc;

use crate::error::Result;
use crate::store::{JobRecord, JobStore};
use crate::worker::instance::InstanceId;

/// Claims pending jobs on behalf of one worker instance.
///
/// Mutual exclusion comes entirely from the store's atomic claim; this type
/// holds no locks of its own.
#[derive(Clone)]
pub struct ClaimEngine {
    store: Arc<dyn JobStore>,
    instance: InstanceId,
}

impl ClaimEngine {
    pub fn new(store: Arc<dyn JobStore>, instance: InstanceId) -> Self {
        Self { store, instance }
    }

    pub fn instance(&self) -> &InstanceId {
        &self.instance
    }

    /// Claim one unclaimed job, or `None` if there is no work.
    ///
    /// Store failures are returned as errors so the caller can back off; they
    /// are never reported as an empty queue.
    pub async fn try_claim(&self) -> Result<Option<JobRecord>> {
        let claimed = self.store.try_claim(self.instance.as_str()).await?;
        if let Some(ref job) = claimed {
            tracing::info!(
                instance = %self.instance,
                job_id = %job.id,
                payload = ?job.payload,
                "Claimed job"
            );
        }
        Ok(claimed)
    }
}
