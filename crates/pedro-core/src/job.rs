//! Job identity, status, and the job record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// `job-<unix-millis>-<yyyymmdd>-<hhmmss>`, validated on construction.
///
/// The wire format is a fixed literal shape rather than a generated id,
/// so validation is a shape check against that format rather than a
/// library call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Construct from a pre-formatted string, validating its shape.
    pub fn parse(raw: impl Into<String>) -> Result<Self, InvalidJobId> {
        let raw = raw.into();
        let rest = raw
            .strip_prefix("job-")
            .ok_or_else(|| InvalidJobId(raw.clone()))?;
        let mut parts = rest.splitn(3, '-');
        let millis = parts.next().ok_or_else(|| InvalidJobId(raw.clone()))?;
        let date = parts.next().ok_or_else(|| InvalidJobId(raw.clone()))?;
        let time = parts.next().ok_or_else(|| InvalidJobId(raw.clone()))?;
        let shape_ok = !millis.is_empty()
            && millis.chars().all(|c| c.is_ascii_digit())
            && date.len() == 8
            && date.chars().all(|c| c.is_ascii_digit())
            && time.len() == 6
            && time.chars().all(|c| c.is_ascii_digit());
        if !shape_ok {
            return Err(InvalidJobId(raw));
        }
        Ok(Self(raw))
    }

    /// Build directly from timestamp components, skipping the string parse.
    /// Used by the scheduler at job-creation time.
    pub fn from_parts(unix_millis: i64, created_at: DateTime<Utc>) -> Self {
        Self(format!(
            "job-{}-{}",
            unix_millis,
            created_at.format("%Y%m%d-%H%M%S")
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidJobId(pub String);

impl fmt::Display for InvalidJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid job id '{}': expected job-<unix-millis>-<yyyymmdd>-<hhmmss>", self.0)
    }
}

impl std::error::Error for InvalidJobId {}

/// Status DAG: pending -> running -> {completed, failed, cancelled}. No reverse transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Whether `self -> next` is a legal transition under the DAG.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Job record. Mutated only by the worker that owns it and by an explicit
/// cancel call routed through the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub agent_kind: String,
    pub input: BTreeMap<String, String>,
    pub status: JobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub output: BTreeMap<String, String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl Job {
    pub fn new(id: JobId, agent_kind: impl Into<String>, input: BTreeMap<String, String>) -> Self {
        Self {
            id,
            agent_kind: agent_kind.into(),
            input,
            status: JobStatus::Pending,
            started_at: None,
            completed_at: None,
            output: BTreeMap::new(),
            error: None,
        }
    }

    /// Apply a status transition, enforcing the DAG (invariant 3).
    pub fn transition(&mut self, next: JobStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }
        match next {
            JobStatus::Running => self.started_at = Some(Utc::now()),
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => {
                self.completed_at = Some(Utc::now());
            }
            JobStatus::Pending => {}
        }
        self.status = next;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "illegal job status transition: {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for TransitionError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_round_trips() {
        let now = Utc::now();
        let id = JobId::from_parts(1_700_000_000_000, now);
        let parsed = JobId::parse(id.as_str()).expect("valid id");
        assert_eq!(id, parsed);
    }

    #[test]
    fn job_id_rejects_bad_shape() {
        assert!(JobId::parse("not-a-job-id").is_err());
        assert!(JobId::parse("job-abc-20260101-010203").is_err());
    }

    #[test]
    fn status_dag_forbids_reverse_transitions() {
        let mut job = Job::new(
            JobId::from_parts(0, Utc::now()),
            "builder",
            BTreeMap::new(),
        );
        job.transition(JobStatus::Running).unwrap();
        job.transition(JobStatus::Completed).unwrap();
        assert!(job.transition(JobStatus::Running).is_err());
    }

    #[test]
    fn status_dag_forbids_skipping_running() {
        let mut job = Job::new(
            JobId::from_parts(0, Utc::now()),
            "builder",
            BTreeMap::new(),
        );
        assert!(job.transition(JobStatus::Completed).is_err());
    }
}
