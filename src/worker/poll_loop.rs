use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::error::Result;
use crate::store::JobStore;
use crate::worker::claim::ClaimEngine;
use crate::worker::executor::JobExecutor;
use crate::worker::instance::InstanceId;
use crate::worker::pool::ExecutionPool;
use crate::worker::reporter::CompletionReporter;
use crate::worker::task::Task;

/// Where the poll loop currently is. There is no terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    IdleWait,
    Claiming,
    Dispatching,
    Draining,
    ErrorWait,
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopState::IdleWait => write!(f, "idle_wait"),
            LoopState::Claiming => write!(f, "claiming"),
            LoopState::Dispatching => write!(f, "dispatching"),
            LoopState::Draining => write!(f, "draining"),
            LoopState::ErrorWait => write!(f, "error_wait"),
        }
    }
}

/// How a successful cycle ended; decides the wait before the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The store had no unclaimed job left.
    NoWork { claimed: usize, reported: usize },
    /// Every slot is occupied.
    AtCapacity { claimed: usize, reported: usize },
}

impl CycleOutcome {
    pub fn claimed(&self) -> usize {
        match self {
            CycleOutcome::NoWork { claimed, .. } | CycleOutcome::AtCapacity { claimed, .. } => {
                *claimed
            }
        }
    }

    pub fn reported(&self) -> usize {
        match self {
            CycleOutcome::NoWork { reported, .. } | CycleOutcome::AtCapacity { reported, .. } => {
                *reported
            }
        }
    }
}

/// Counters accumulated over the life of a poll loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub cycles: u64,
    pub claimed: u64,
    pub reported: u64,
    pub failed_jobs: u64,
    pub report_errors: u64,
    pub cycle_errors: u64,
}

/// Drives the claim -> dispatch -> reap cycle for one worker instance.
///
/// Each cycle first reports every finished execution, then claims greedily
/// until the store runs dry or the pool is full. The caller of
/// [`run_cycle`](Self::run_cycle) decides how long to wait; [`run`](Self::run)
/// does it with the configured idle, busy-poll and error intervals.
pub struct PollLoop {
    claims: ClaimEngine,
    pool: ExecutionPool,
    reporter: CompletionReporter,
    idle_interval: Duration,
    busy_poll_interval: Duration,
    error_interval: Duration,
    state: LoopState,
    stats: LoopStats,
}

impl PollLoop {
    pub fn new(
        config: &WorkerConfig,
        store: Arc<dyn JobStore>,
        task: Arc<dyn Task>,
        instance: InstanceId,
    ) -> Self {
        let executor = JobExecutor::new(task, config.default_payload);
        Self {
            claims: ClaimEngine::new(store.clone(), instance),
            pool: ExecutionPool::new(config.slots, executor),
            reporter: CompletionReporter::new(store),
            idle_interval: config.idle_interval(),
            busy_poll_interval: config.busy_poll_interval(),
            error_interval: config.error_interval(),
            state: LoopState::IdleWait,
            stats: LoopStats::default(),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    pub fn pool(&self) -> &ExecutionPool {
        &self.pool
    }

    pub fn instance(&self) -> &InstanceId {
        self.claims.instance()
    }

    /// Run one drain-then-claim cycle.
    ///
    /// # Errors
    ///
    /// Returns the first store error hit while reporting or claiming. Jobs
    /// already dispatched in this cycle keep running.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome> {
        let reported = self.drain_finished().await?;

        self.state = LoopState::Claiming;
        let mut claimed = 0;
        while self.pool.capacity_remaining() > 0 {
            match self.claims.try_claim().await? {
                Some(job) => {
                    self.state = LoopState::Dispatching;
                    self.pool.submit(job)?;
                    claimed += 1;
                    self.stats.claimed += 1;
                    self.state = LoopState::Claiming;
                }
                None => return Ok(CycleOutcome::NoWork { claimed, reported }),
            }
        }
        Ok(CycleOutcome::AtCapacity { claimed, reported })
    }

    /// Pick the state and wait that follow a cycle.
    pub fn backoff(&mut self, cycle: &Result<CycleOutcome>) -> Duration {
        let (state, wait) = match cycle {
            Ok(CycleOutcome::NoWork { .. }) => {
                tracing::debug!(
                    instance = %self.claims.instance(),
                    in_flight = self.pool.in_flight(),
                    wait_ms = self.idle_interval.as_millis() as u64,
                    "No work available"
                );
                (LoopState::IdleWait, self.idle_interval)
            }
            Ok(CycleOutcome::AtCapacity { .. }) => {
                tracing::debug!(
                    instance = %self.claims.instance(),
                    slots = self.pool.capacity(),
                    "All slots busy"
                );
                (LoopState::Dispatching, self.busy_poll_interval)
            }
            Err(e) => {
                self.stats.cycle_errors += 1;
                tracing::error!(
                    instance = %self.claims.instance(),
                    error = %e,
                    transient = e.is_transient(),
                    "Error in worker loop"
                );
                (LoopState::ErrorWait, self.error_interval)
            }
        };
        tracing::trace!(
            instance = %self.claims.instance(),
            from = %self.state,
            to = %state,
            wait_ms = wait.as_millis() as u64,
            "Loop state change"
        );
        self.state = state;
        wait
    }

    /// Poll until `shutdown` is cancelled, then wait for in-flight jobs and
    /// report them.
    pub async fn run(mut self, shutdown: CancellationToken) -> LoopStats {
        tracing::info!(
            instance = %self.claims.instance(),
            slots = self.pool.capacity(),
            "Worker started, polling for work"
        );

        while !shutdown.is_cancelled() {
            let cycle = self.run_cycle().await;
            self.stats.cycles += 1;
            let wait = self.backoff(&cycle);

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.cancelled() => break,
            }
        }

        self.finish().await;
        self.stats
    }

    /// Report every finished execution without waiting for the rest.
    async fn drain_finished(&mut self) -> Result<usize> {
        self.state = LoopState::Draining;
        let mut reported = 0;
        let mut first_error = None;

        for (job, outcome) in self.pool.poll_ready() {
            if !outcome.is_success() {
                self.stats.failed_jobs += 1;
            }
            match self.reporter.report(job.id, &outcome).await {
                Ok(()) => reported += 1,
                Err(e) => {
                    self.stats.report_errors += 1;
                    tracing::error!(
                        job_id = %job.id,
                        error = %e,
                        "Failed to report completion, job stays claimed"
                    );
                    first_error.get_or_insert(e);
                }
            }
        }

        self.stats.reported += reported as u64;
        match first_error {
            Some(e) => Err(e),
            None => Ok(reported),
        }
    }

    async fn finish(&mut self) {
        self.state = LoopState::Draining;
        tracing::info!(
            instance = %self.claims.instance(),
            in_flight = self.pool.in_flight(),
            "Stopping, waiting for in-flight jobs"
        );

        while let Some((job, outcome)) = self.pool.join_next().await {
            if !outcome.is_success() {
                self.stats.failed_jobs += 1;
            }
            match self.reporter.report(job.id, &outcome).await {
                Ok(()) => self.stats.reported += 1,
                Err(e) => {
                    self.stats.report_errors += 1;
                    tracing::error!(job_id = %job.id, error = %e, "Failed to report completion");
                }
            }
        }

        tracing::info!(instance = %self.claims.instance(), "Worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loop_state_names() {
        let names: Vec<String> = [
            LoopState::IdleWait,
            LoopState::Claiming,
            LoopState::Dispatching,
            LoopState::Draining,
            LoopState::ErrorWait,
        ]
        .iter()
        .map(ToString::to_string)
        .collect();
        assert_eq!(
            names,
            ["idle_wait", "claiming", "dispatching", "draining", "error_wait"]
        );
    }

    #[test]
    fn cycle_outcome_counts() {
        let outcome = CycleOutcome::AtCapacity {
            claimed: 2,
            reported: 1,
        };
        assert_eq!(outcome.claimed(), 2);
        assert_eq!(outcome.reported(), 1);
    }
}
