use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use uuid::Uuid;

use crate::error::WorkerError;
use crate::store::{JobOutcome, JobRecord};
use crate::worker::task::Task;

/// Result of running one job inside a slot
#[derive(Debug)]
pub struct ExecutionResult {
    pub job_id: Uuid,
    pub outcome: JobOutcome,
}

/// Runs a claimed job's task synchronously and times it.
///
/// Task errors and panics both become [`JobOutcome::Failed`]; nothing a task
/// does escapes the slot it runs in.
#[derive(Clone)]
pub struct JobExecutor {
    task: Arc<dyn Task>,
    default_payload: i64,
}

impl JobExecutor {
    pub fn new(task: Arc<dyn Task>, default_payload: i64) -> Self {
        Self {
            task,
            default_payload,
        }
    }

    /// Execute a job on the current thread. Blocks for as long as the task runs.
    pub fn execute(&self, job: &JobRecord) -> ExecutionResult {
        let payload = job.payload.unwrap_or(self.default_payload);
        tracing::info!(job_id = %job.id, task = self.task.name(), payload, "Executing job");

        let start = Instant::now();
        let run = panic::catch_unwind(AssertUnwindSafe(|| self.task.run(payload)));
        let duration = start.elapsed();

        let outcome = match run {
            Ok(Ok(result)) => {
                tracing::info!(
                    job_id = %job.id,
                    result,
                    duration_ms = duration.as_millis() as u64,
                    "Job completed"
                );
                JobOutcome::Succeeded { result, duration }
            }
            Ok(Err(e)) => {
                tracing::warn!(job_id = %job.id, error = %e, "Job failed");
                JobOutcome::Failed {
                    error: e.to_string(),
                    duration,
                }
            }
            Err(panic) => {
                let e = WorkerError::TaskPanicked(panic_message(panic.as_ref()));
                tracing::warn!(job_id = %job.id, error = %e, "Job panicked");
                JobOutcome::Failed {
                    error: e.to_string(),
                    duration,
                }
            }
        };

        ExecutionResult {
            job_id: job.id,
            outcome,
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
