//! Agent specializations.
//!
//! Each agent kind is a value — a system-prompt template, an allowed tool
//! subset, extra completion sentinels, and the output-mapping key its
//! final response populates — never a second code path through the
//! executor. Adding an agent kind means wiring a fixed prompt template
//! and tool subset to the one shared executor, not implementing a new
//! loop.

use pedro_backend::BackendAdapter;
use pedro_budget::CompactionLog;
use pedro_core::job::Job;
use pedro_executor::{run_job, ExecutorConfig, JobOutcome};
use pedro_format::Dialect;
use pedro_journal::Journal;
use pedro_scheduler::WorkerOutcome;
use pedro_tools::{BashTool, FileTool, SearchTool, ToolRegistry};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Data, not behavior: adding a new agent kind is adding one more value
/// of this type, never touching `pedro-executor`.
#[derive(Debug, Clone)]
pub struct AgentSpec {
    pub kind: &'static str,
    pub system_prompt: &'static str,
    pub allowed_tools: &'static [&'static str],
    pub extra_sentinels: Vec<String>,
    pub output_key: &'static str,
}

/// `builder` populates `response`.
pub fn builder_agent() -> AgentSpec {
    AgentSpec {
        kind: "builder",
        system_prompt: "You are a builder agent. Implement the requested feature in the \
                         working copy using the available tools, then report what changed.",
        allowed_tools: &["file", "bash", "search"],
        extra_sentinels: Vec::new(),
        output_key: "response",
    }
}

/// `debugger` populates `response`.
pub fn debugger_agent() -> AgentSpec {
    AgentSpec {
        kind: "debugger",
        system_prompt: "You are a debugger agent. Reproduce the reported symptom, find its \
                         root cause, and fix it using the available tools.",
        allowed_tools: &["file", "bash", "search"],
        extra_sentinels: Vec::new(),
        output_key: "response",
    }
}

/// `reviewer` populates `review_text`. It does not receive the `bash`
/// tool: a reviewer inspects a branch, it does not execute it, and its
/// constructor installs only the tools it is allowed to use.
pub fn reviewer_agent() -> AgentSpec {
    AgentSpec {
        kind: "reviewer",
        system_prompt: "You are a reviewer agent. Read the changes on the given branch and \
                         produce a review covering correctness, style, and risk.",
        allowed_tools: &["file", "search"],
        extra_sentinels: Vec::new(),
        output_key: "review_text",
    }
}

/// `triager` populates `diagnosis`.
pub fn triager_agent() -> AgentSpec {
    AgentSpec {
        kind: "triager",
        system_prompt: "You are a triager agent. Read the reported description, investigate \
                         with the available tools, and produce a diagnosis with a suggested \
                         severity and owning area.",
        allowed_tools: &["file", "search"],
        extra_sentinels: Vec::new(),
        output_key: "diagnosis",
    }
}

/// All four built-in agent kinds, for registration convenience.
pub fn built_in_agents() -> Vec<AgentSpec> {
    vec![builder_agent(), debugger_agent(), reviewer_agent(), triager_agent()]
}

/// Build the tool registry an agent is allowed to use from its
/// `allowed_tools` allow-list. Unrecognized entries are a configuration
/// mistake, not a runtime condition, so they're dropped with a warning
/// rather than surfaced as a job error.
fn build_registry(spec: &AgentSpec) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for name in spec.allowed_tools {
        match *name {
            "file" => registry.register(Arc::new(FileTool)),
            "bash" => registry.register(Arc::new(BashTool::default())),
            "search" => registry.register(Arc::new(SearchTool)),
            other => tracing::warn!(agent = spec.kind, tool = other, "unknown tool in allow-list, skipping"),
        }
    }
    registry
}

fn task_description(input: &BTreeMap<String, String>) -> String {
    input
        .iter()
        .map(|(k, v)| format!("{k}: {v}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Drive one job through `pedro_executor::run_job` using `spec`'s system
/// prompt, tool subset, and output key, then translate the executor's
/// outcome into the `WorkerOutcome` shape `pedro-scheduler` expects.
/// The output map always includes the agent's key; `job_id` and terminal
/// `status` are added by the scheduler's own `Job` record.
pub async fn run_agent_job(
    spec: &AgentSpec,
    job: &Job,
    cancellation: CancellationToken,
    base_dir: &Path,
    working_dir: &Path,
    backend: &dyn BackendAdapter,
    dialect: Dialect,
    window_total: usize,
    max_rounds: u32,
    max_retries: u32,
    compaction_log: &dyn CompactionLog,
) -> WorkerOutcome {
    let journal = match Journal::open(base_dir, job.id.as_str()) {
        Ok(journal) => journal,
        Err(err) => return WorkerOutcome::failed(format!("journal_error: {err}")),
    };
    let registry = build_registry(spec);
    let mut config = ExecutorConfig::new(spec.system_prompt, task_description(&job.input), window_total);
    config.max_rounds = max_rounds;
    config.max_retries = max_retries;
    config.extra_sentinels = spec.extra_sentinels.clone();

    let outcome = run_job(
        job.id.as_str(),
        backend,
        dialect,
        &registry,
        &journal,
        working_dir,
        &config,
        compaction_log,
        cancellation,
    )
    .await;

    match outcome {
        JobOutcome::Completed { final_response } => {
            let mut output = BTreeMap::new();
            output.insert(spec.output_key.to_string(), final_response);
            WorkerOutcome::completed(output)
        }
        JobOutcome::Failed { error } => WorkerOutcome::failed(format!("{}: {error}", error.reason_code())),
        JobOutcome::Cancelled => WorkerOutcome::cancelled(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pedro_backend::mock::MockBackend;
    use pedro_backend::{InferResponse, Usage};
    use pedro_budget::InMemoryCompactionLog;
    use pedro_core::job::JobId;
    use tempfile::tempdir;

    #[tokio::test]
    async fn builder_agent_completes_and_populates_response_key() {
        let base = tempdir().unwrap();
        let backend = MockBackend::new(vec![Ok(InferResponse {
            text: "Added the feature. TASK_COMPLETE".into(),
            usage: Usage { prompt_tokens: 5, completion_tokens: 5 },
        })]);
        let spec = builder_agent();
        let mut input = BTreeMap::new();
        input.insert("description".to_string(), "Add a health check endpoint".to_string());
        let job = Job::new(JobId::from_parts(0, chrono::Utc::now()), spec.kind, input);
        let log = InMemoryCompactionLog::new();

        let outcome = run_agent_job(
            &spec,
            &job,
            CancellationToken::new(),
            base.path(),
            base.path(),
            &backend,
            Dialect::Generic,
            8192,
            20,
            3,
            &log,
        )
        .await;

        assert!(outcome.error.is_none());
        assert!(!outcome.cancelled);
        assert_eq!(outcome.output.get("response").map(String::as_str), Some("Added the feature. TASK_COMPLETE"));
    }

    #[tokio::test]
    async fn reviewer_agent_has_no_bash_tool() {
        let registry = build_registry(&reviewer_agent());
        assert!(registry.get("bash").is_none());
        assert!(registry.get("file").is_some());
    }

    #[tokio::test]
    async fn triager_agent_populates_diagnosis_key() {
        let base = tempdir().unwrap();
        let backend = MockBackend::new(vec![Ok(InferResponse {
            text: "Looks like a null pointer in the parser. TASK_COMPLETE".into(),
            usage: Usage { prompt_tokens: 5, completion_tokens: 5 },
        })]);
        let spec = triager_agent();
        let mut input = BTreeMap::new();
        input.insert("description".to_string(), "Crash on startup".to_string());
        let job = Job::new(JobId::from_parts(0, chrono::Utc::now()), spec.kind, input);
        let log = InMemoryCompactionLog::new();

        let outcome = run_agent_job(
            &spec,
            &job,
            CancellationToken::new(),
            base.path(),
            base.path(),
            &backend,
            Dialect::Generic,
            8192,
            20,
            3,
            &log,
        )
        .await;

        assert!(outcome.output.contains_key("diagnosis"));
    }
}
