use std::collections::HashMap;
use std::time::Instant;

use tokio::task::{Id, JoinError, JoinSet};
use uuid::Uuid;

use crate::error::{Result, WorkerError};
use crate::store::{JobOutcome, JobRecord};
use crate::worker::executor::{ExecutionResult, JobExecutor};

/// Handle to a job accepted by [`ExecutionPool::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobHandle {
    pub job_id: Uuid,
    pub task_id: Id,
}

/// Fixed set of K execution slots.
///
/// Each slot runs on tokio's blocking thread pool so CPU-heavy tasks never
/// stall the poll loop. A slot stays occupied until its result has been
/// collected by [`poll_ready`](Self::poll_ready) or
/// [`join_next`](Self::join_next).
pub struct ExecutionPool {
    capacity: usize,
    executor: JobExecutor,
    running: JoinSet<ExecutionResult>,
    in_flight: HashMap<Id, (JobRecord, Instant)>,
}

impl ExecutionPool {
    pub fn new(capacity: usize, executor: JobExecutor) -> Self {
        Self {
            capacity,
            executor,
            running: JoinSet::new(),
            in_flight: HashMap::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots occupied by executions that have not been collected yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn capacity_remaining(&self) -> usize {
        self.capacity.saturating_sub(self.in_flight.len())
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight.is_empty()
    }

    /// Start `job` on a free slot.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::PoolFull`] if every slot is occupied; callers
    /// check [`capacity_remaining`](Self::capacity_remaining) first.
    pub fn submit(&mut self, job: JobRecord) -> Result<JobHandle> {
        if self.capacity_remaining() == 0 {
            return Err(WorkerError::PoolFull {
                capacity: self.capacity,
            });
        }

        let executor = self.executor.clone();
        let slot_job = job.clone();
        let abort = self
            .running
            .spawn_blocking(move || executor.execute(&slot_job));
        let task_id = abort.id();

        let handle = JobHandle {
            job_id: job.id,
            task_id,
        };
        self.in_flight.insert(task_id, (job, Instant::now()));
        Ok(handle)
    }

    /// Collect every execution that has finished, without waiting.
    pub fn poll_ready(&mut self) -> Vec<(JobRecord, JobOutcome)> {
        let mut ready = Vec::new();
        while let Some(joined) = self.running.try_join_next_with_id() {
            if let Some(done) = self.collect(joined) {
                ready.push(done);
            }
        }
        ready
    }

    /// Wait for the next execution to finish. Returns `None` when the pool is idle.
    pub async fn join_next(&mut self) -> Option<(JobRecord, JobOutcome)> {
        while let Some(joined) = self.running.join_next_with_id().await {
            if let Some(done) = self.collect(joined) {
                return Some(done);
            }
        }
        None
    }

    fn collect(
        &mut self,
        joined: std::result::Result<(Id, ExecutionResult), JoinError>,
    ) -> Option<(JobRecord, JobOutcome)> {
        match joined {
            Ok((id, result)) => {
                let (job, _) = self.in_flight.remove(&id)?;
                Some((job, result.outcome))
            }
            Err(e) => {
                // The executor catches panics, so this is an aborted slot.
                let (job, started) = self.in_flight.remove(&e.id())?;
                tracing::error!(job_id = %job.id, error = %e, "Execution slot terminated");
                let outcome = JobOutcome::Failed {
                    error: format!("execution slot terminated: {}", e),
                    duration: started.elapsed(),
                };
                Some((job, outcome))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::worker::task::FibonacciTask;

    fn pool(capacity: usize) -> ExecutionPool {
        let executor = JobExecutor::new(Arc::new(FibonacciTask::new(45)), 10);
        ExecutionPool::new(capacity, executor)
    }

    async fn drain(pool: &mut ExecutionPool) -> Vec<(JobRecord, JobOutcome)> {
        let mut done = Vec::new();
        while let Some(item) = pool.join_next().await {
            done.push(item);
        }
        done
    }

    #[tokio::test]
    async fn submit_rejected_when_full() {
        let mut pool = pool(2);
        pool.submit(JobRecord::new(Some(5))).unwrap();
        pool.submit(JobRecord::new(Some(5))).unwrap();
        assert_eq!(pool.capacity_remaining(), 0);

        let err = pool.submit(JobRecord::new(Some(5))).unwrap_err();
        assert!(matches!(err, WorkerError::PoolFull { capacity: 2 }));
        assert_eq!(pool.in_flight(), 2);

        drain(&mut pool).await;
    }

    #[tokio::test]
    async fn slot_freed_only_after_collection() {
        let mut pool = pool(1);
        let job = JobRecord::new(Some(1));
        let handle = pool.submit(job.clone()).unwrap();
        assert_eq!(handle.job_id, job.id);

        // Finished but uncollected executions still hold their slot.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pool.capacity_remaining(), 0);

        let done = drain(&mut pool).await;
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].0.id, job.id);
        assert_eq!(pool.capacity_remaining(), 1);
        assert!(pool.is_idle());
    }

    #[tokio::test]
    async fn poll_ready_does_not_block() {
        let mut pool = pool(1);
        assert!(pool.poll_ready().is_empty());

        pool.submit(JobRecord::new(Some(3))).unwrap();
        let mut collected = Vec::new();
        for _ in 0..200 {
            collected.extend(pool.poll_ready());
            if !collected.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(collected.len(), 1);
        assert!(collected[0].1.is_success());
    }

    #[tokio::test]
    async fn failure_in_one_slot_does_not_affect_others() {
        let mut pool = pool(3);
        let bad = JobRecord::new(Some(-1));
        let good_a = JobRecord::new(Some(12));
        let good_b = JobRecord::new(Some(15));
        pool.submit(bad.clone()).unwrap();
        pool.submit(good_a.clone()).unwrap();
        pool.submit(good_b.clone()).unwrap();

        let done = drain(&mut pool).await;
        assert_eq!(done.len(), 3);
        for (job, outcome) in done {
            if job.id == bad.id {
                assert!(!outcome.is_success());
            } else if job.id == good_a.id {
                assert!(matches!(outcome, JobOutcome::Succeeded { result: 144, .. }));
            } else {
                assert!(matches!(outcome, JobOutcome::Succeeded { result: 610, .. }));
            }
        }
    }
}
