use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::error::Result;
use crate::store::{self, JobStore};
use crate::worker::{FibonacciTask, InstanceId, LoopStats, PollLoop, Task};

/// One worker process: validated configuration, store connection and identity.
pub struct WorkerNode {
    pub config: WorkerConfig,
    pub store: Arc<dyn JobStore>,
    pub instance: InstanceId,
    task: Arc<dyn Task>,
}

impl WorkerNode {
    /// Validate `config` and open the store it names.
    ///
    /// # Errors
    ///
    /// Configuration problems surface here, before any job is claimed. A store
    /// that cannot be reached at startup is also fatal.
    pub async fn connect(config: WorkerConfig) -> Result<Self> {
        config.validate()?;
        let store = store::connect(&config.store).await?;
        Self::with_store(config, store)
    }

    /// Build a node on an already-open store, e.g. one shared by several
    /// nodes in the same process.
    pub fn with_store(config: WorkerConfig, store: Arc<dyn JobStore>) -> Result<Self> {
        config.validate()?;
        let instance = config
            .instance_id
            .clone()
            .map(InstanceId::new)
            .unwrap_or_else(InstanceId::detect);
        let task: Arc<dyn Task> = Arc::new(FibonacciTask::new(config.max_payload));
        Ok(Self {
            config,
            store,
            instance,
            task,
        })
    }

    /// Replace the workload run in each slot.
    pub fn with_task(mut self, task: Arc<dyn Task>) -> Self {
        self.task = task;
        self
    }

    pub fn poll_loop(&self) -> PollLoop {
        PollLoop::new(
            &self.config,
            self.store.clone(),
            self.task.clone(),
            self.instance.clone(),
        )
    }

    /// Run the poll loop until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) -> LoopStats {
        tracing::info!(
            instance = %self.instance,
            slots = self.config.slots,
            idle_ms = self.config.idle_interval_ms,
            busy_poll_ms = self.config.busy_poll_interval_ms,
            error_ms = self.config.error_interval_ms,
            "Starting worker node"
        );
        self.poll_loop().run(shutdown).await
    }
}
