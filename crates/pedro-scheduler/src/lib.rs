//! Job manager: assigns job IDs, starts a job as a detached worker,
//! tracks `{pending, running, completed, failed, cancelled}`, and
//! surfaces status and final output.
//!
//! The job index is a single guarded mapping owned by the job manager —
//! no ambient globals, one owner per resource, never reached into from
//! outside this module.

use chrono::Utc;
use pedro_core::job::{Job, JobId, JobStatus};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default total wall-clock cap for one job, enforced by the worker that
/// drives it. A job that is still running when this elapses is cancelled
/// and reported failed with `wall_clock_exceeded`, regardless of what
/// round it is on.
const DEFAULT_WALL_CLOCK_CAP: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("no worker registered for agent kind '{0}'")]
    UnknownAgentKind(String),
    #[error("no job with id '{0}'")]
    UnknownJob(String),
    #[error("job '{0}' has already reached a terminal status")]
    AlreadyTerminal(String),
}

/// Outcome a registered worker reports back to the job manager once it
/// stops driving a job, whatever caused it to stop.
pub struct WorkerOutcome {
    pub output: BTreeMap<String, String>,
    pub error: Option<String>,
    pub cancelled: bool,
}

impl WorkerOutcome {
    pub fn completed(output: BTreeMap<String, String>) -> Self {
        Self { output, error: None, cancelled: false }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { output: BTreeMap::new(), error: Some(error.into()), cancelled: false }
    }

    pub fn cancelled() -> Self {
        Self { output: BTreeMap::new(), error: None, cancelled: true }
    }
}

type WorkerFuture = Pin<Box<dyn Future<Output = WorkerOutcome> + Send>>;

/// A per-agent-kind driver: given the job record and its cancellation
/// token, runs the job to completion and reports the outcome. The agent
/// layer supplies this; the scheduler never inspects agent-kind
/// semantics itself.
pub type WorkerFn = Arc<dyn Fn(Job, CancellationToken) -> WorkerFuture + Send + Sync>;

struct JobEntry {
    job: Job,
    cancellation: CancellationToken,
}

/// `submit`/`get`/`list`/`cancel`. The in-memory index is lost on process
/// restart; the on-disk journal (owned by each worker) is the durable
/// state.
#[derive(Clone)]
pub struct JobManager {
    index: Arc<Mutex<HashMap<JobId, JobEntry>>>,
    workers: Arc<HashMap<String, WorkerFn>>,
    concurrency: Option<Arc<Semaphore>>,
    wall_clock_cap: Duration,
}

pub struct JobManagerBuilder {
    workers: HashMap<String, WorkerFn>,
    concurrency: Option<usize>,
    wall_clock_cap: Duration,
}

impl JobManagerBuilder {
    pub fn new() -> Self {
        Self { workers: HashMap::new(), concurrency: None, wall_clock_cap: DEFAULT_WALL_CLOCK_CAP }
    }

    pub fn register_agent(mut self, kind: impl Into<String>, worker: WorkerFn) -> Self {
        self.workers.insert(kind.into(), worker);
        self
    }

    /// Bound the number of jobs running concurrently via a semaphore
    /// acquired between `submit` and worker start. Optional — without it,
    /// submissions spawn unboundedly.
    pub fn with_concurrency_limit(mut self, permits: usize) -> Self {
        self.concurrency = Some(permits);
        self
    }

    /// Override the default 30-minute total wall-clock cap per job.
    pub fn with_wall_clock_cap(mut self, cap: Duration) -> Self {
        self.wall_clock_cap = cap;
        self
    }

    pub fn build(self) -> JobManager {
        JobManager {
            index: Arc::new(Mutex::new(HashMap::new())),
            workers: Arc::new(self.workers),
            concurrency: self.concurrency.map(|n| Arc::new(Semaphore::new(n))),
            wall_clock_cap: self.wall_clock_cap,
        }
    }
}

impl Default for JobManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl JobManager {
    pub fn builder() -> JobManagerBuilder {
        JobManagerBuilder::new()
    }

    /// Allocate an ID, record `pending`, and spawn a detached worker that
    /// transitions the job through `running` to a terminal status.
    pub fn submit(
        &self,
        agent_kind: &str,
        input: BTreeMap<String, String>,
    ) -> Result<JobId, SchedulerError> {
        let worker = self
            .workers
            .get(agent_kind)
            .cloned()
            .ok_or_else(|| SchedulerError::UnknownAgentKind(agent_kind.to_string()))?;

        let now = Utc::now();
        let id = JobId::from_parts(now.timestamp_millis(), now);
        let job = Job::new(id.clone(), agent_kind, input);
        let cancellation = CancellationToken::new();

        {
            let mut index = self.index.lock().expect("job index mutex poisoned");
            index.insert(id.clone(), JobEntry { job: job.clone(), cancellation: cancellation.clone() });
        }

        let index = self.index.clone();
        let concurrency = self.concurrency.clone();
        let job_id = id.clone();
        let wall_clock_cap = self.wall_clock_cap;
        let agent_kind = agent_kind.to_string();

        tokio::spawn(async move {
            let _permit = match &concurrency {
                Some(sem) => Some(sem.clone().acquire_owned().await.expect("semaphore closed")),
                None => None,
            };

            if cancellation.is_cancelled() {
                Self::finish(&index, &job_id, JobStatus::Cancelled, BTreeMap::new(), None);
                return;
            }

            Self::transition(&index, &job_id, JobStatus::Running);
            info!(job_id = %job_id, agent_kind, "job started");

            let (status, output, error) =
                match tokio::time::timeout(wall_clock_cap, worker(job, cancellation.clone())).await {
                    Ok(outcome) if outcome.cancelled => (JobStatus::Cancelled, outcome.output, None),
                    Ok(outcome) => match outcome.error {
                        Some(err) => (JobStatus::Failed, outcome.output, Some(err)),
                        None => (JobStatus::Completed, outcome.output, None),
                    },
                    Err(_) => {
                        warn!(job_id = %job_id, cap_secs = wall_clock_cap.as_secs(), "job exceeded wall-clock cap");
                        cancellation.cancel();
                        (JobStatus::Failed, BTreeMap::new(), Some("wall_clock_exceeded".to_string()))
                    }
                };
            Self::finish(&index, &job_id, status, output, error);
        });

        Ok(id)
    }

    pub fn get(&self, id: &JobId) -> Result<Job, SchedulerError> {
        self.index
            .lock()
            .expect("job index mutex poisoned")
            .get(id)
            .map(|entry| entry.job.clone())
            .ok_or_else(|| SchedulerError::UnknownJob(id.to_string()))
    }

    pub fn list(&self) -> Vec<Job> {
        self.index
            .lock()
            .expect("job index mutex poisoned")
            .values()
            .map(|entry| entry.job.clone())
            .collect()
    }

    /// Signal cancellation. Eventual, not instantaneous: the worker
    /// observes it at the next tool boundary or backend completion.
    pub fn cancel(&self, id: &JobId) -> Result<(), SchedulerError> {
        let index = self.index.lock().expect("job index mutex poisoned");
        let entry = index.get(id).ok_or_else(|| SchedulerError::UnknownJob(id.to_string()))?;
        if entry.job.status.is_terminal() {
            return Err(SchedulerError::AlreadyTerminal(id.to_string()));
        }
        entry.cancellation.cancel();
        Ok(())
    }

    fn transition(index: &Arc<Mutex<HashMap<JobId, JobEntry>>>, id: &JobId, next: JobStatus) {
        let mut index = index.lock().expect("job index mutex poisoned");
        if let Some(entry) = index.get_mut(id) {
            if let Err(err) = entry.job.transition(next) {
                warn!(job_id = %id, error = %err, "illegal status transition attempted");
            }
        }
    }

    fn finish(
        index: &Arc<Mutex<HashMap<JobId, JobEntry>>>,
        id: &JobId,
        status: JobStatus,
        output: BTreeMap<String, String>,
        error: Option<String>,
    ) {
        let mut index = index.lock().expect("job index mutex poisoned");
        if let Some(entry) = index.get_mut(id) {
            if entry.job.status.can_transition_to(status) {
                let _ = entry.job.transition(status);
            } else if !entry.job.status.is_terminal() {
                warn!(job_id = %id, from = %entry.job.status, to = %status, "dropping illegal terminal transition");
            }
            entry.job.output = output;
            entry.job.error = error;
        }
    }
}
