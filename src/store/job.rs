use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Lifecycle position of a job, derived from its flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Claimed,
    Completed,
    Failed,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Pending => write!(f, "pending"),
            JobState::Claimed => write!(f, "claimed"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
        }
    }
}

/// Terminal result of one execution, written back with the completion transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded { result: u64, duration: Duration },
    Failed { error: String, duration: Duration },
}

impl JobOutcome {
    pub fn duration(&self) -> Duration {
        match self {
            JobOutcome::Succeeded { duration, .. } | JobOutcome::Failed { duration, .. } => {
                *duration
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Succeeded { .. })
    }
}

/// A unit of work as persisted in the job store.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub id: Uuid,
    pub payload: Option<i64>,
    pub claimed: bool,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub completed: bool,
    pub result: Option<u64>,
    pub error: Option<String>,
    pub duration: Option<Duration>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(payload: Option<i64>) -> Self {
        Self::with_id(Uuid::new_v4(), payload, Utc::now())
    }

    pub fn with_id(id: Uuid, payload: Option<i64>, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            payload,
            claimed: false,
            claimed_by: None,
            claimed_at: None,
            completed: false,
            result: None,
            error: None,
            duration: None,
            completed_at: None,
            created_at,
        }
    }

    pub fn state(&self) -> JobState {
        match (self.claimed, self.completed) {
            (_, true) if self.error.is_some() => JobState::Failed,
            (_, true) => JobState::Completed,
            (true, false) => JobState::Claimed,
            (false, false) => JobState::Pending,
        }
    }

    /// Apply the claim transition. Returns false if the job was already claimed.
    ///
    /// Stores call this while holding whatever makes the update atomic; it is
    /// not a substitute for that atomicity.
    pub fn mark_claimed(&mut self, claimed_by: &str, at: DateTime<Utc>) -> bool {
        if self.claimed {
            return false;
        }
        self.claimed = true;
        self.claimed_by = Some(claimed_by.to_string());
        self.claimed_at = Some(at);
        true
    }

    /// Apply the completion transition. Returns false if the job was never claimed.
    ///
    /// Writing the same outcome twice leaves the record unchanged apart from
    /// `completed_at`.
    pub fn mark_completed(&mut self, outcome: &JobOutcome, at: DateTime<Utc>) -> bool {
        if !self.claimed {
            return false;
        }
        self.completed = true;
        match outcome {
            JobOutcome::Succeeded { result, duration } => {
                self.result = Some(*result);
                self.error = None;
                self.duration = Some(*duration);
            }
            JobOutcome::Failed { error, duration } => {
                self.result = None;
                self.error = Some(error.clone());
                self.duration = Some(*duration);
            }
        }
        self.completed_at = Some(at);
        true
    }
}
