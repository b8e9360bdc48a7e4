//! Per-instance work claiming and execution.
//!
//! One worker instance runs a single [`PollLoop`] that drives K execution
//! slots against the shared job store:
//!
//! - [`ClaimEngine`]: atomically claims one unclaimed job
//! - [`ExecutionPool`]: runs claimed jobs off the polling path
//! - [`CompletionReporter`]: writes results back by job id
//! - [`PollLoop`]: drain -> claim -> dispatch, with idle/busy/error backoff
//!
//! # Cycle
//!
//! 1. Report every execution that finished since the last cycle
//! 2. While a slot is free, claim and dispatch immediately
//! 3. Sleep the idle interval if the store ran dry, the busy-poll interval
//!    if every slot is taken, or the error interval if the cycle failed
//!
//! Instances never talk to each other; the store's atomic claim is the only
//! thing keeping two of them off the same job.

pub mod claim;
pub mod executor;
pub mod instance;
pub mod poll_loop;
pub mod pool;
pub mod reporter;
pub mod task;

pub use claim::ClaimEngine;
pub use executor::JobExecutor;
pub use instance::InstanceId;
pub use poll_loop::{CycleOutcome, LoopState, LoopStats, PollLoop};
pub use pool::ExecutionPool;
pub use reporter::CompletionReporter;
pub use task::{FibonacciTask, Task};
