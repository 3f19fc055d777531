//! Wire types for the compute-task status endpoint.

use serde::{Deserialize, Serialize};

use crate::error::JobError;

/// `requested -> in-progress -> (succeeded | failed | cancelling -> cancelled)`.
/// All non-terminal statuses mean "keep polling".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    Requested,
    #[serde(alias = "in progress")]
    InProgress,
    Cancelling,
    Cancelled,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Requested => "requested",
            JobStatus::InProgress => "in-progress",
            JobStatus::Cancelling => "cancelling",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One snapshot of a job's status, as returned by `get_status`.
#[derive(Debug, Clone)]
pub struct JobProgress {
    pub status: JobStatus,
    /// A number between 0 and 100.
    pub progress: Option<f64>,
    pub message: Option<String>,
    pub error: Option<JobError>,
}

impl std::fmt::Display for JobProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.status)?;
        if let Some(progress) = self.progress {
            write!(f, " {progress}%")?;
        }
        if let Some(message) = &self.message {
            write!(f, " > {message}")?;
        }
        if let Some(error) = &self.error {
            write!(f, "\n{error}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct StatusResponseBody {
    pub status: JobStatus,
    pub progress: Option<f64>,
    pub message: Option<String>,
    pub error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub(super) struct CompletedJobResponseBody {
    pub status: JobStatus,
    #[serde(default)]
    pub results: Option<serde_json::Value>,
    pub error: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_spelling_round_trips() {
        let s = serde_json::to_string(&JobStatus::InProgress).unwrap();
        assert_eq!(s, "\"in-progress\"");
        let parsed: JobStatus = serde_json::from_str(&s).unwrap();
        assert_eq!(parsed, JobStatus::InProgress);
    }

    #[test]
    fn legacy_spaced_spelling_still_parses() {
        let parsed: JobStatus = serde_json::from_str("\"in progress\"").unwrap();
        assert_eq!(parsed, JobStatus::InProgress);
    }

    #[test]
    fn terminal_statuses() {
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Requested.is_terminal());
        assert!(!JobStatus::InProgress.is_terminal());
        assert!(!JobStatus::Cancelling.is_terminal());
    }
}
