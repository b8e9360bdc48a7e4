use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Execution pool is full ({capacity} slots occupied)")]
    PoolFull { capacity: usize },

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Malformed job record: {0}")]
    MalformedRecord(String),

    #[error("Job {0} has not been claimed")]
    NotClaimed(Uuid),

    #[error("Invalid payload {payload}: must be between 0 and {max}")]
    InvalidPayload { payload: i64, max: i64 },

    #[error("Task panicked: {0}")]
    TaskPanicked(String),
}

impl WorkerError {
    /// Errors the poll loop should back off from and retry on the next cycle.
    pub fn is_transient(&self) -> bool {
        matches!(self, WorkerError::Store(_))
    }
}

impl From<redis::RedisError> for WorkerError {
    fn from(e: redis::RedisError) -> Self {
        WorkerError::Store(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WorkerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_are_transient() {
        assert!(WorkerError::Store("timeout".to_string()).is_transient());
        assert!(!WorkerError::Config("missing".to_string()).is_transient());
        assert!(!WorkerError::PoolFull { capacity: 2 }.is_transient());
        assert!(!WorkerError::MalformedRecord("missing id".to_string()).is_transient());
    }

    #[test]
    fn invalid_payload_message_names_bound() {
        let err = WorkerError::InvalidPayload {
            payload: -1,
            max: 45,
        };
        assert_eq!(
            err.to_string(),
            "Invalid payload -1: must be between 0 and 45"
        );
    }
}
