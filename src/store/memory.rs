use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{Result, WorkerError};
use crate::store::job::{JobOutcome, JobRecord};
use crate::store::JobStore;

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<Uuid, JobRecord>,
    /// Unclaimed job ids in insertion order.
    pending: VecDeque<Uuid>,
}

/// Process-local job store.
///
/// Every operation runs under a single lock acquisition, which is what makes
/// claim and completion atomic here. Shared between tasks via `Arc`.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    inner: Mutex<Inner>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a prepared record, e.g. one carrying a fixed id.
    pub async fn insert(&self, job: JobRecord) {
        let mut inner = self.inner.lock().await;
        if !job.claimed {
            inner.pending.push_back(job.id);
        }
        inner.jobs.insert(job.id, job);
    }

    pub async fn pending_count(&self) -> usize {
        self.inner.lock().await.pending.len()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.jobs.is_empty()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn try_claim(&self, claimed_by: &str) -> Result<Option<JobRecord>> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        while let Some(id) = inner.pending.pop_front() {
            if let Some(job) = inner.jobs.get_mut(&id) {
                if job.mark_claimed(claimed_by, now) {
                    return Ok(Some(job.clone()));
                }
            }
        }
        Ok(None)
    }

    async fn complete(&self, job_id: Uuid, outcome: &JobOutcome) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or(WorkerError::JobNotFound(job_id))?;
        if job.mark_completed(outcome, Utc::now()) {
            Ok(())
        } else {
            Err(WorkerError::NotClaimed(job_id))
        }
    }

    async fn enqueue(&self, payload: Option<i64>) -> Result<JobRecord> {
        let job = JobRecord::new(payload);
        self.insert(job.clone()).await;
        Ok(job)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<JobRecord>> {
        Ok(self.inner.lock().await.jobs.get(&job_id).cloned())
    }

    async fn list(&self) -> Result<Vec<JobRecord>> {
        let inner = self.inner.lock().await;
        let mut jobs: Vec<JobRecord> = inner.jobs.values().cloned().collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }
}
