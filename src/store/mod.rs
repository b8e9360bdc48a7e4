//! Job store abstraction shared by every worker instance.
//!
//! The store is the only coordination point between workers. Both mutating
//! operations must be atomic with respect to all instances:
//!
//! - [`JobStore::try_claim`]: find one unclaimed record and mark it claimed in
//!   the same atomic step
//! - [`JobStore::complete`]: targeted update of one record by id
//!
//! # Implementations
//!
//! - [`InMemoryJobStore`]: one lock guards every record; for a single process
//! - [`RedisJobStore`]: server-side Lua scripts; for any number of processes

pub mod job;
pub mod memory;
pub mod redis;

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::config::{StoreConfig, StoreKind};
use crate::error::Result;

pub use job::{JobOutcome, JobRecord, JobState};
pub use memory::InMemoryJobStore;
pub use self::redis::RedisJobStore;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Atomically claim one unclaimed job for `claimed_by`.
    ///
    /// Returns `Ok(None)` when no unclaimed job exists. Connectivity problems
    /// are errors, never `None`.
    async fn try_claim(&self, claimed_by: &str) -> Result<Option<JobRecord>>;

    /// Write the completion transition for a claimed job.
    async fn complete(&self, job_id: Uuid, outcome: &JobOutcome) -> Result<()>;

    /// Insert a new unclaimed job.
    async fn enqueue(&self, payload: Option<i64>) -> Result<JobRecord>;

    async fn get(&self, job_id: Uuid) -> Result<Option<JobRecord>>;

    /// All jobs, oldest first.
    async fn list(&self) -> Result<Vec<JobRecord>>;
}

/// Open the store named by `config.url`.
///
/// # Errors
///
/// Returns a configuration error for an unsupported URL, or a store error if
/// the backend cannot be reached.
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn JobStore>> {
    match config.kind()? {
        StoreKind::Memory => Ok(Arc::new(InMemoryJobStore::new())),
        StoreKind::Redis => {
            let store = RedisJobStore::connect(&config.url, &config.key_prefix).await?;
            Ok(Arc::new(store))
        }
    }
}
