//! Token-budget-aware history compaction engine.
//!
//! Token estimation is a coarse `ceil(chars / 4)` heuristic, deliberately
//! biased to over- rather than under-estimate so the engine never ships a
//! prompt it believes fits but actually doesn't. The two-threshold
//! (soft/hard) shape separates "usable window" from "spent on reserves +
//! history", the same way an allocated/used split keeps a budget honest.

use pedro_core::round::Round;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

/// `{window_total, reserve_for_response, reserve_for_system,
/// reserve_for_user_prompt, verbatim_recent_rounds}`.
#[derive(Debug, Clone, Copy)]
pub struct BudgetDescriptor {
    pub window_total: usize,
    pub reserve_for_response: usize,
    pub reserve_for_system: usize,
    pub reserve_for_user_prompt: usize,
    pub verbatim_recent_rounds: usize,
}

impl BudgetDescriptor {
    pub fn new(window_total: usize) -> Self {
        let usable = usable_window(window_total);
        Self {
            window_total,
            reserve_for_response: default_response_reserve(usable),
            reserve_for_system: 0,
            reserve_for_user_prompt: 0,
            verbatim_recent_rounds: 3,
        }
    }

    pub fn usable_window(&self) -> usize {
        usable_window(self.window_total)
    }

    /// The remaining token budget for history, after the caller has told
    /// us the actual rendered size of the system prompt and the new
    /// user-prompt footer for this round.
    pub fn history_budget(&self, system_tokens: usize, user_prompt_tokens: usize) -> usize {
        self.usable_window()
            .saturating_sub(self.reserve_for_system.max(system_tokens))
            .saturating_sub(self.reserve_for_user_prompt.max(user_prompt_tokens))
            .saturating_sub(self.reserve_for_response)
    }
}

/// `usable = floor(window_total * 0.75)`.
pub fn usable_window(window_total: usize) -> usize {
    (window_total as f64 * 0.75).floor() as usize
}

/// `min(8192, 25% of usable)`.
pub fn default_response_reserve(usable: usize) -> usize {
    std::cmp::min(8192, usable / 4)
}

/// Seam for a future tokenizer-accurate implementation. The default
/// `HeuristicEstimator` is the only implementation this crate ships;
/// callers that need exact counts for a specific model family can supply
/// their own without touching the compaction algorithm.
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, text: &str) -> usize;
}

/// `ceil(char_count / 4)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicEstimator;

impl TokenEstimator for HeuristicEstimator {
    fn estimate(&self, text: &str) -> usize {
        (text.chars().count() as f64 / 4.0).ceil() as usize
    }
}

/// Convenience wrapper around `HeuristicEstimator`, applied per-segment by
/// the caller as needed.
pub fn estimate_tokens(text: &str) -> usize {
    HeuristicEstimator.estimate(text)
}

/// One compaction event, recorded for observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionEvent {
    pub job_id: String,
    pub round_index: u32,
    pub tokens_before: usize,
    pub tokens_after: usize,
    pub rounds_compacted: usize,
    pub rounds_kept: usize,
    pub threshold_hit: usize,
}

/// Sink for compaction events. Persistence is optional observability, not
/// a correctness dependency — the default implementation just keeps them
/// in memory.
pub trait CompactionLog: Send + Sync {
    fn record(&self, event: CompactionEvent);
}

#[derive(Default)]
pub struct InMemoryCompactionLog(Mutex<Vec<CompactionEvent>>);

impl InMemoryCompactionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CompactionEvent> {
        self.0.lock().expect("compaction log mutex poisoned").clone()
    }
}

/// Append-only JSONL sink for compaction events. A write failure is
/// logged and swallowed rather than propagated, since losing an
/// observability record must never fail the job it describes.
pub struct JsonlCompactionLog {
    file: Mutex<File>,
}

impl JsonlCompactionLog {
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file: Mutex::new(file) })
    }
}

impl CompactionLog for JsonlCompactionLog {
    fn record(&self, event: CompactionEvent) {
        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(err) => {
                tracing::warn!(job_id = %event.job_id, error = %err, "failed to serialize compaction event");
                return;
            }
        };
        let mut file = self.file.lock().expect("compaction log mutex poisoned");
        if let Err(err) = writeln!(file, "{line}") {
            tracing::warn!(job_id = %event.job_id, error = %err, "failed to append compaction event");
        }
    }
}

impl CompactionLog for InMemoryCompactionLog {
    fn record(&self, event: CompactionEvent) {
        self.0.lock().expect("compaction log mutex poisoned").push(event);
    }
}

fn render_round_verbatim(round: &Round) -> String {
    let mut out = format!("--- Round {} ---\n", round.sequence);
    if let Some(response) = &round.response {
        out.push_str("response: ");
        out.push_str(response);
        out.push('\n');
    }
    for result in &round.tool_results {
        out.push_str(&format!(
            "tool[{}] success={} output={} error={}\n",
            result.tool, result.success, result.output, result.error
        ));
    }
    out
}

/// Assemble the history text for the next round: verbatim for the most
/// recent rounds, compacted to one-line summaries for older ones once the
/// verbatim tail alone would blow the budget. Returns the assembled text;
/// records a `CompactionEvent` on `log` only when compaction actually had
/// to engage.
pub fn assemble_history(
    job_id: &str,
    round_index: u32,
    rounds: &[Round],
    budget: &BudgetDescriptor,
    system_tokens: usize,
    user_prompt_tokens: usize,
    log: &dyn CompactionLog,
) -> String {
    let b = budget.history_budget(system_tokens, user_prompt_tokens);

    let full_verbatim: String = rounds.iter().map(render_round_verbatim).collect();
    let tokens_before = estimate_tokens(&full_verbatim);
    if tokens_before <= b {
        return full_verbatim;
    }

    // Step 1-4: shrink the verbatim tail from `verbatim_recent_rounds` down
    // to 0, converting dropped rounds to one-line summaries, until it fits.
    let mut k = budget.verbatim_recent_rounds.min(rounds.len());
    let mut combined = combine(rounds, k);
    let mut tokens_after = estimate_tokens(&combined);

    while tokens_after > b && k > 0 {
        k -= 1;
        combined = combine(rounds, k);
        tokens_after = estimate_tokens(&combined);
    }

    // Step 5: K=0 and still too big — truncate oldest summary lines.
    if tokens_after > b && k == 0 {
        loop {
            let mut lines: Vec<&str> = combined.lines().collect();
            if tokens_after <= b || lines.is_empty() {
                break;
            }
            lines.remove(0);
            let truncated = lines.join("\n");
            tokens_after = estimate_tokens(&truncated);
            combined = truncated;
        }
    }

    log.record(CompactionEvent {
        job_id: job_id.to_string(),
        round_index,
        tokens_before,
        tokens_after,
        rounds_compacted: rounds.len().saturating_sub(k),
        rounds_kept: k,
        threshold_hit: b,
    });

    combined
}

fn combine(rounds: &[Round], verbatim_tail: usize) -> String {
    let split = rounds.len().saturating_sub(verbatim_tail);
    let (older, tail) = rounds.split_at(split);
    let summaries: String = older
        .iter()
        .map(|r| r.summary_line())
        .collect::<Vec<_>>()
        .join("\n");
    let verbatim: String = tail.iter().map(render_round_verbatim).collect();
    if summaries.is_empty() {
        verbatim
    } else {
        format!("{summaries}\n{verbatim}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pedro_core::round::{ToolResult};

    fn round(seq: u32, response_len: usize) -> Round {
        Round {
            sequence: seq,
            prompt: Some("p".repeat(10)),
            response: Some("r".repeat(response_len)),
            tool_calls: vec![],
            tool_results: vec![ToolResult {
                tool: "file".into(),
                success: true,
                output: "o".repeat(response_len),
                error: String::new(),
                modified_files: vec![format!("f{seq}.rs")],
                data: Default::default(),
            }],
        }
    }

    #[test]
    fn fits_without_compaction_stays_verbatim() {
        let budget = BudgetDescriptor::new(4096);
        let rounds = vec![round(1, 10), round(2, 10)];
        let log = InMemoryCompactionLog::new();
        let text = assemble_history("job-1", 3, &rounds, &budget, 100, 50, &log);
        assert!(text.contains("--- Round 1 ---"));
        assert!(text.contains("--- Round 2 ---"));
        assert!(log.events().is_empty());
    }

    #[test]
    fn compaction_keeps_verbatim_tail_and_summarizes_the_rest() {
        let budget = BudgetDescriptor::new(4096);
        let rounds: Vec<Round> = (1..=10).map(|i| round(i, 400)).collect();
        let log = InMemoryCompactionLog::new();
        let text = assemble_history("job-2", 11, &rounds, &budget, 100, 50, &log);

        let b = budget.history_budget(100, 50);
        assert!(estimate_tokens(&text) <= b);
        assert!(text.contains("Round 10: called tools") || text.contains("--- Round 10 ---"));

        let events = log.events();
        assert_eq!(events.len(), 1);
        assert!(events[0].rounds_kept >= 1);
        assert_eq!(events[0].rounds_compacted + events[0].rounds_kept, 10);
    }

    #[test]
    fn heuristic_estimator_matches_free_function() {
        let text = "a quick brown fox jumps over the lazy dog";
        assert_eq!(HeuristicEstimator.estimate(text), estimate_tokens(text));
    }

    #[test]
    fn jsonl_compaction_log_appends_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compaction.jsonl");
        let log = JsonlCompactionLog::open(&path).unwrap();
        log.record(CompactionEvent {
            job_id: "job-3".into(),
            round_index: 4,
            tokens_before: 500,
            tokens_after: 200,
            rounds_compacted: 2,
            rounds_kept: 1,
            threshold_hit: 400,
        });
        log.record(CompactionEvent {
            job_id: "job-3".into(),
            round_index: 6,
            tokens_before: 600,
            tokens_after: 250,
            rounds_compacted: 3,
            rounds_kept: 1,
            threshold_hit: 400,
        });

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: CompactionEvent = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.job_id, "job-3");
        assert_eq!(first.round_index, 4);
    }
}
