//! The inference loop: the iterative driver that assembles a prompt from
//! the journal within budget, calls the backend, parses tool calls,
//! dispatches them, and writes every artifact back to the journal, until
//! the model declares completion or a budget is exhausted.
//!
//! There is exactly one executor implementation: agents are data
//! describing a system prompt, an allowed tool subset, and extra
//! completion sentinels, never a second code path through this loop.

use pedro_backend::{infer_with_backoff, BackendAdapter, InferOptions};
use pedro_budget::{assemble_history, estimate_tokens, BudgetDescriptor, CompactionLog};
use pedro_core::error::JobError;
use pedro_core::round::{Round, ToolResult};
use pedro_core::sentinel::contains_sentinel;
use pedro_format::Dialect;
use pedro_journal::Journal;
use pedro_tools::{dispatch_batch, ToolContext, ToolRegistry};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const DEFAULT_MAX_ROUNDS: u32 = 20;
const DEFAULT_MAX_RETRIES: u32 = 3;
const CONTINUE_FOOTER: &str = "Continue. When finished, output TASK_COMPLETE.";

/// Per-job configuration the executor needs beyond what the journal and
/// registry already carry.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub system_prompt: String,
    pub task_description: String,
    pub window_total: usize,
    pub max_rounds: u32,
    pub max_retries: u32,
    pub extra_sentinels: Vec<String>,
}

impl ExecutorConfig {
    pub fn new(system_prompt: impl Into<String>, task_description: impl Into<String>, window_total: usize) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            task_description: task_description.into(),
            window_total,
            max_rounds: DEFAULT_MAX_ROUNDS,
            max_retries: DEFAULT_MAX_RETRIES,
            extra_sentinels: Vec::new(),
        }
    }
}

/// The terminal outcome of one call to `run_job`, before the agent layer
/// extracts this into the job's output mapping.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Completed { final_response: String },
    Failed { error: JobError },
    Cancelled,
}

/// Drive rounds against `backend` until completion, failure, or
/// cancellation. Every artifact is written through `journal` before the
/// in-memory loop acts on it, so re-running this function over the same
/// journal from the same round reproduces the same next prompt.
pub async fn run_job(
    job_id: &str,
    backend: &dyn BackendAdapter,
    dialect: Dialect,
    registry: &ToolRegistry,
    journal: &Journal,
    working_dir: &Path,
    config: &ExecutorConfig,
    compaction_log: &dyn CompactionLog,
    cancellation: CancellationToken,
) -> JobOutcome {
    let budget = BudgetDescriptor::new(config.window_total);
    let tool_section = dialect.render_tools(&registry.schemas());
    let system_prompt = format!("{}\n\n{}", config.system_prompt, tool_section);
    let system_tokens = estimate_tokens(&system_prompt);
    let tool_ctx = ToolContext {
        working_dir: working_dir.to_path_buf(),
        cancellation: cancellation.clone(),
    };

    loop {
        if cancellation.is_cancelled() {
            return JobOutcome::Cancelled;
        }

        let rounds = match journal.read_all_rounds() {
            Ok(rounds) => rounds,
            Err(err) => return JobOutcome::Failed { error: JobError::Journal(err.to_string()) },
        };
        let round_index = rounds.len() as u32 + 1;

        let user_prompt = build_user_prompt(&config.task_description, &rounds);
        let user_prompt_tokens = estimate_tokens(&user_prompt);

        let history = assemble_history(
            job_id,
            round_index,
            &rounds,
            &budget,
            system_tokens,
            user_prompt_tokens,
            compaction_log,
        );

        let final_prompt = format!("{system_prompt}\n\n{history}\n\n{user_prompt}");
        let prompt_tokens = estimate_tokens(&final_prompt);
        if prompt_tokens > budget.usable_window().saturating_sub(budget.reserve_for_response) {
            warn!(job_id, round_index, prompt_tokens, "prompt exceeds usable window after compaction");
            return JobOutcome::Failed { error: JobError::ContextExhausted };
        }

        if let Err(err) = journal.append_prompt(&final_prompt) {
            return JobOutcome::Failed { error: JobError::Journal(err.to_string()) };
        }

        let options = InferOptions::default();
        let response = match infer_with_backoff(backend, &final_prompt, &options, config.max_retries).await {
            Ok(response) => response,
            Err(err) => {
                let _ = journal.append_response(&format!("ERROR: {err}"));
                return JobOutcome::Failed { error: JobError::BackendExhausted(err.to_string()) };
            }
        };

        if let Err(err) = journal.append_response(&response.text) {
            return JobOutcome::Failed { error: JobError::Journal(err.to_string()) };
        }

        let calls = dialect.parse_calls(&response.text);

        if calls.is_empty() && contains_sentinel(&response.text, &config.extra_sentinels) {
            info!(job_id, round_index, "completion sentinel observed");
            return JobOutcome::Completed { final_response: response.text };
        }

        if let Err(err) = journal.append_tool_calls(&calls) {
            return JobOutcome::Failed { error: JobError::Journal(err.to_string()) };
        }

        // No sentinel and nothing parsed: feed the model a structured hint
        // rather than silently repeating the same prompt.
        let results = if calls.is_empty() {
            vec![ToolResult::error("parse", "no valid tool call detected, retry")]
        } else {
            dispatch_batch(registry, &tool_ctx, &calls).await
        };
        if let Err(err) = journal.append_tool_results(&results) {
            return JobOutcome::Failed { error: JobError::Journal(err.to_string()) };
        }

        if round_index >= config.max_rounds {
            return JobOutcome::Failed { error: JobError::MaxRoundsExceeded { limit: config.max_rounds } };
        }
    }
}

/// Concatenate the previous round's tool results with the continuation
/// footer; for the very first round, seed with the task description
/// instead.
fn build_user_prompt(task_description: &str, rounds: &[Round]) -> String {
    match rounds.last() {
        None => format!("{task_description}\n\n{CONTINUE_FOOTER}"),
        Some(last) => format!("{}\n\n{CONTINUE_FOOTER}", render_tool_results(&last.tool_results)),
    }
}

fn render_tool_results(results: &[ToolResult]) -> String {
    if results.is_empty() {
        return String::new();
    }
    results
        .iter()
        .map(|r| {
            if r.success {
                format!("[{}] {}", r.tool, r.output)
            } else {
                format!("[{}] ERROR: {}", r.tool, r.error)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pedro_backend::mock::MockBackend;
    use pedro_backend::{InferResponse, Usage};
    use pedro_budget::InMemoryCompactionLog;
    use pedro_core::job::JobStatus;
    use pedro_tools::BashTool;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn text_response(text: &str) -> Result<InferResponse, pedro_backend::BackendError> {
        Ok(InferResponse {
            text: text.to_string(),
            usage: Usage { prompt_tokens: 10, completion_tokens: 10 },
        })
    }

    fn registry_with_file_tool() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(pedro_tools::FileTool));
        registry
    }

    #[tokio::test]
    async fn one_shot_completion() {
        let base = tempdir().unwrap();
        let journal = Journal::open(base.path(), "job-1").unwrap();
        let backend = MockBackend::new(vec![text_response("Done. TASK_COMPLETE")]);
        let registry = ToolRegistry::new();
        let config = ExecutorConfig::new("You are a builder.", "Echo hello", 8192);
        let log = InMemoryCompactionLog::new();

        let outcome = run_job(
            "job-1",
            &backend,
            Dialect::Generic,
            &registry,
            &journal,
            base.path(),
            &config,
            &log,
            CancellationToken::new(),
        )
        .await;

        match outcome {
            JobOutcome::Completed { final_response } => {
                assert_eq!(final_response, "Done. TASK_COMPLETE");
            }
            other => panic!("expected Completed, got {other:?}"),
        }

        let rounds = journal.read_all_rounds().unwrap();
        assert_eq!(rounds.len(), 1);
        assert!(rounds[0].tool_calls.is_empty());
    }

    #[tokio::test]
    async fn two_round_tool_loop() {
        let base = tempdir().unwrap();
        std::fs::write(base.path().join("README.md"), "Hello").unwrap();
        let journal = Journal::open(base.path(), "job-2").unwrap();
        let backend = MockBackend::new(vec![
            text_response("```json\n{\"tool\": \"file\", \"args\": {\"op\": \"read\", \"path\": \"README.md\"}}\n```"),
            text_response("TASK_COMPLETE"),
        ]);
        let registry = registry_with_file_tool();
        let config = ExecutorConfig::new("You are a builder.", "Read the readme", 8192);
        let log = InMemoryCompactionLog::new();

        let outcome = run_job(
            "job-2",
            &backend,
            Dialect::Generic,
            &registry,
            &journal,
            base.path(),
            &config,
            &log,
            CancellationToken::new(),
        )
        .await;

        assert!(matches!(outcome, JobOutcome::Completed { .. }));
        let rounds = journal.read_all_rounds().unwrap();
        assert_eq!(rounds.len(), 2);
        assert_eq!(rounds[0].tool_calls.len(), 1);
        assert_eq!(rounds[0].tool_results.len(), 1);
        assert!(rounds[0].tool_results[0].success);
        assert!(rounds[1].tool_calls.is_empty());
    }

    #[tokio::test]
    async fn parse_error_self_correction() {
        let base = tempdir().unwrap();
        let journal = Journal::open(base.path(), "job-3").unwrap();
        let backend = MockBackend::new(vec![
            text_response("{not valid json"),
            text_response("TASK_COMPLETE"),
        ]);
        let registry = ToolRegistry::new();
        let config = ExecutorConfig::new("You are a builder.", "Do something", 8192);
        let log = InMemoryCompactionLog::new();

        let outcome = run_job(
            "job-3",
            &backend,
            Dialect::Generic,
            &registry,
            &journal,
            base.path(),
            &config,
            &log,
            CancellationToken::new(),
        )
        .await;

        assert!(matches!(outcome, JobOutcome::Completed { .. }));
        let rounds = journal.read_all_rounds().unwrap();
        assert_eq!(rounds.len(), 2);
        // Round 1 had no parseable calls and no sentinel, so the loop fed
        // back a structured hint instead of completing.
        assert!(rounds[0].tool_calls.is_empty());
        assert_eq!(rounds[0].tool_results.len(), 1);
        assert!(!rounds[0].tool_results[0].success);
        assert!(rounds[1].tool_calls.is_empty());
    }

    #[tokio::test]
    async fn max_rounds_guard() {
        let base = tempdir().unwrap();
        let journal = Journal::open(base.path(), "job-4").unwrap();
        let trivial_call = "```json\n{\"tool\": \"bash\", \"args\": {\"command\": \"echo hi\"}}\n```";
        let backend = MockBackend::new(vec![
            text_response(trivial_call),
            text_response(trivial_call),
            text_response(trivial_call),
        ]);
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(BashTool::default()));
        let mut config = ExecutorConfig::new("You are a builder.", "Loop forever", 8192);
        config.max_rounds = 3;
        let log = InMemoryCompactionLog::new();

        let outcome = run_job(
            "job-4",
            &backend,
            Dialect::Generic,
            &registry,
            &journal,
            base.path(),
            &config,
            &log,
            CancellationToken::new(),
        )
        .await;

        match outcome {
            JobOutcome::Failed { error } => {
                assert_eq!(error.reason_code(), "max_rounds_exceeded");
            }
            other => panic!("expected Failed, got {other:?}"),
        }
        let rounds = journal.read_all_rounds().unwrap();
        assert_eq!(rounds.len(), 3);
    }

    #[tokio::test]
    async fn cancellation_before_round_ends_job_cancelled() {
        let base = tempdir().unwrap();
        let journal = Journal::open(base.path(), "job-5").unwrap();
        let backend = MockBackend::new(vec![text_response("TASK_COMPLETE")]);
        let registry = ToolRegistry::new();
        let config = ExecutorConfig::new("You are a builder.", "Do something", 8192);
        let log = InMemoryCompactionLog::new();
        let cancellation = CancellationToken::new();
        cancellation.cancel();

        let outcome = run_job(
            "job-5",
            &backend,
            Dialect::Generic,
            &registry,
            &journal,
            base.path(),
            &config,
            &log,
            cancellation,
        )
        .await;

        assert!(matches!(outcome, JobOutcome::Cancelled));
        assert_eq!(JobStatus::Cancelled.to_string(), "cancelled");
    }

    #[tokio::test]
    async fn cancellation_during_tool_call_yields_cancelled_result_then_terminates() {
        let base = tempdir().unwrap();
        let journal = Journal::open(base.path(), "job-6").unwrap();
        let sleep_call = "```json\n{\"tool\": \"bash\", \"args\": {\"command\": \"sleep 5\"}}\n```";
        let backend = MockBackend::new(vec![text_response(sleep_call)]);
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(BashTool::default()));
        let config = ExecutorConfig::new("You are a debugger.", "Investigate the hang", 8192);
        let log = InMemoryCompactionLog::new();
        let cancellation = CancellationToken::new();

        let cancel_handle = cancellation.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            cancel_handle.cancel();
        });

        let outcome = run_job(
            "job-6",
            &backend,
            Dialect::Generic,
            &registry,
            &journal,
            base.path(),
            &config,
            &log,
            cancellation,
        )
        .await;

        assert!(matches!(outcome, JobOutcome::Cancelled));
        let rounds = journal.read_all_rounds().unwrap();
        assert_eq!(rounds.len(), 1);
        assert_eq!(rounds[0].tool_results.len(), 1);
        assert!(!rounds[0].tool_results[0].success);
        assert_eq!(rounds[0].tool_results[0].error, "cancelled");
    }
}
