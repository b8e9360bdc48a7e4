use std::time::Duration;

use crate::error::{Result, WorkerError};
use crate::worker::task::MAX_FIBONACCI_INPUT;

/// Backend selected by the scheme of the store URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// `memory://` - process-local store, useful for development and tests.
    Memory,
    /// `redis://` or `rediss://` - shared store for multiple worker processes.
    Redis,
}

/// Connection settings for the job store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Store endpoint, e.g. `redis://127.0.0.1:6379/0` or `memory://`.
    pub url: String,
    /// Namespace for every key written to a shared store.
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            key_prefix: "heavy_worker".to_string(),
        }
    }
}

impl StoreConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Resolve the backend from the URL scheme.
    pub fn kind(&self) -> Result<StoreKind> {
        let url = self.url.trim();
        if url.is_empty() {
            return Err(WorkerError::Config(
                "store URL is required (--store-url or HEAVY_WORKER_STORE_URL)".to_string(),
            ));
        }
        match url.split_once("://").map(|(scheme, _)| scheme) {
            Some("memory") => Ok(StoreKind::Memory),
            Some("redis") | Some("rediss") => Ok(StoreKind::Redis),
            _ => Err(WorkerError::Config(format!(
                "unsupported store URL '{}', expected memory:// or redis://",
                url
            ))),
        }
    }
}

/// Configuration for one worker instance.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub store: StoreConfig,
    /// Number of execution slots (K).
    pub slots: usize,
    /// Sleep after a cycle that found no work.
    pub idle_interval_ms: u64,
    /// Sleep after a cycle that found every slot occupied.
    pub busy_poll_interval_ms: u64,
    /// Sleep after a cycle that failed.
    pub error_interval_ms: u64,
    /// Largest payload the task accepts.
    pub max_payload: i64,
    /// Payload used when a job record carries none.
    pub default_payload: i64,
    /// Overrides the `<hostname>-<pid>` identity stamped into claims.
    pub instance_id: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            slots: 1,
            idle_interval_ms: 5000,
            busy_poll_interval_ms: 250,
            error_interval_ms: 5000,
            max_payload: 45,
            default_payload: 40,
            instance_id: None,
        }
    }
}

impl WorkerConfig {
    pub fn new(store_url: impl Into<String>) -> Self {
        Self {
            store: StoreConfig::new(store_url),
            ..Default::default()
        }
    }

    pub fn with_slots(mut self, slots: usize) -> Self {
        self.slots = slots;
        self
    }

    pub fn with_intervals(mut self, idle_ms: u64, busy_poll_ms: u64, error_ms: u64) -> Self {
        self.idle_interval_ms = idle_ms;
        self.busy_poll_interval_ms = busy_poll_ms;
        self.error_interval_ms = error_ms;
        self
    }

    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    pub fn busy_poll_interval(&self) -> Duration {
        Duration::from_millis(self.busy_poll_interval_ms)
    }

    pub fn error_interval(&self) -> Duration {
        Duration::from_millis(self.error_interval_ms)
    }

    /// Check the configuration before the worker enters its poll loop.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Config`] for a missing or unsupported store URL,
    /// zero slots, zero intervals, a busy-poll interval that is not shorter
    /// than the idle interval, or an inconsistent payload range.
    pub fn validate(&self) -> Result<()> {
        self.store.kind()?;

        if self.slots == 0 {
            return Err(WorkerError::Config("slots must be at least 1".to_string()));
        }
        if self.idle_interval_ms == 0
            || self.busy_poll_interval_ms == 0
            || self.error_interval_ms == 0
        {
            return Err(WorkerError::Config(
                "poll intervals must be greater than zero".to_string(),
            ));
        }
        if self.busy_poll_interval_ms >= self.idle_interval_ms {
            return Err(WorkerError::Config(format!(
                "busy-poll interval ({}ms) must be shorter than idle interval ({}ms)",
                self.busy_poll_interval_ms, self.idle_interval_ms
            )));
        }
        if !(0..=MAX_FIBONACCI_INPUT).contains(&self.max_payload) {
            return Err(WorkerError::Config(format!(
                "max payload {} is outside 0..={}",
                self.max_payload, MAX_FIBONACCI_INPUT
            )));
        }
        if !(0..=self.max_payload).contains(&self.default_payload) {
            return Err(WorkerError::Config(format!(
                "default payload {} is outside 0..={}",
                self.default_payload, self.max_payload
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_config_default() {
        let cfg = WorkerConfig::default();
        assert!(cfg.store.url.is_empty());
        assert_eq!(cfg.store.key_prefix, "heavy_worker");
        assert_eq!(cfg.slots, 1);
        assert_eq!(cfg.idle_interval(), Duration::from_secs(5));
        assert_eq!(cfg.busy_poll_interval(), Duration::from_millis(250));
        assert_eq!(cfg.error_interval(), Duration::from_secs(5));
        assert_eq!(cfg.max_payload, 45);
        assert_eq!(cfg.default_payload, 40);
        assert!(cfg.instance_id.is_none());
    }

    #[test]
    fn store_kind_from_scheme() {
        assert_eq!(
            StoreConfig::new("memory://").kind().unwrap(),
            StoreKind::Memory
        );
        assert_eq!(
            StoreConfig::new("redis://127.0.0.1:6379/0").kind().unwrap(),
            StoreKind::Redis
        );
        assert_eq!(
            StoreConfig::new("rediss://cache.internal:6380").kind().unwrap(),
            StoreKind::Redis
        );
    }

    #[test]
    fn missing_store_url_is_config_error() {
        let err = WorkerConfig::default().validate().unwrap_err();
        assert!(matches!(err, WorkerError::Config(_)));
        assert!(err.to_string().contains("store URL is required"));
    }

    #[test]
    fn unsupported_scheme_is_config_error() {
        let err = WorkerConfig::new("mongodb://localhost:27017")
            .validate()
            .unwrap_err();
        assert!(matches!(err, WorkerError::Config(_)));
    }

    #[test]
    fn zero_slots_rejected() {
        let cfg = WorkerConfig::new("memory://").with_slots(0);
        assert!(matches!(cfg.validate(), Err(WorkerError::Config(_))));
    }

    #[test]
    fn busy_poll_must_be_shorter_than_idle() {
        let cfg = WorkerConfig::new("memory://").with_intervals(100, 100, 100);
        assert!(matches!(cfg.validate(), Err(WorkerError::Config(_))));

        let cfg = WorkerConfig::new("memory://").with_intervals(100, 10, 100);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_interval_rejected() {
        let cfg = WorkerConfig::new("memory://").with_intervals(100, 10, 0);
        assert!(matches!(cfg.validate(), Err(WorkerError::Config(_))));
    }

    #[test]
    fn default_payload_must_fit_bound() {
        let mut cfg = WorkerConfig::new("memory://");
        cfg.max_payload = 30;
        assert!(matches!(cfg.validate(), Err(WorkerError::Config(_))));
        cfg.default_payload = 30;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn max_payload_capped_at_u64_fibonacci() {
        let mut cfg = WorkerConfig::new("memory://");
        cfg.max_payload = 93;
        assert!(cfg.validate().is_ok());
        cfg.max_payload = 94;
        assert!(matches!(cfg.validate(), Err(WorkerError::Config(_))));
        cfg.max_payload = -1;
        assert!(matches!(cfg.validate(), Err(WorkerError::Config(_))));
    }

    #[test]
    fn builder_helpers() {
        let cfg = WorkerConfig::new("memory://")
            .with_slots(3)
            .with_intervals(5000, 100, 2000)
            .with_instance_id("worker-a");
        assert_eq!(cfg.slots, 3);
        assert_eq!(cfg.busy_poll_interval_ms, 100);
        assert_eq!(cfg.error_interval_ms, 2000);
        assert_eq!(cfg.instance_id.as_deref(), Some("worker-a"));
        assert!(cfg.validate().is_ok());
    }
}
