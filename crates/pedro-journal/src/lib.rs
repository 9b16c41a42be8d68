//! Durable, append-only, file-per-artifact job journal.
//!
//! File-per-artifact is chosen over a single log so that (a) process
//! crashes can never leave a round half-written: the next startup either
//! sees a complete artifact or ignores a partially-renamed temp file; (b) a
//! human can inspect any intermediate state with a text editor; (c) the
//! reader does not need a lock to read while the worker writes new rounds,
//! because appends only add higher-numbered filenames.
//!
//! Atomic appends follow a write-temp-then-rename idiom: write to a
//! unique temp file in the job directory, then `fs::rename` into place.

use anyhow::{Context, Result};
use pedro_core::round::{Round, ToolInvocation, ToolResult};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArtifactKind {
    Prompt,
    Response,
    ToolCalls,
    ToolResults,
}

impl ArtifactKind {
    fn suffix(self) -> &'static str {
        match self {
            ArtifactKind::Prompt => "prompt.txt",
            ArtifactKind::Response => "response.txt",
            ArtifactKind::ToolCalls => "tool-calls.json",
            ArtifactKind::ToolResults => "tool-results.json",
        }
    }

    fn from_filename(name: &str) -> Option<(u32, ArtifactKind)> {
        let (digits, rest) = name.split_once('-')?;
        let seq: u32 = digits.parse().ok()?;
        let kind = match rest {
            "prompt.txt" => ArtifactKind::Prompt,
            "response.txt" => ArtifactKind::Response,
            "tool-calls.json" => ArtifactKind::ToolCalls,
            "tool-results.json" => ArtifactKind::ToolResults,
            _ => return None,
        };
        Some((seq, kind))
    }
}

/// Handle to one job's journal directory. Owned by exactly one worker;
/// never shared across workers.
pub struct Journal {
    dir: PathBuf,
    next_seq: AtomicU32,
}

impl Journal {
    /// Open (creating if absent) the journal directory for `job_id` under
    /// `base`. If artifacts already exist (resuming after a crash), the
    /// next sequence number picks up where the directory left off.
    pub fn open(base: &Path, job_id: &str) -> Result<Self> {
        let dir = base.join(job_id);
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create journal directory: {}", dir.display()))?;

        let mut max_seq = 0u32;
        for entry in fs::read_dir(&dir)
            .with_context(|| format!("failed to read journal directory: {}", dir.display()))?
        {
            let entry = entry.context("failed to read journal directory entry")?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some((seq, _)) = ArtifactKind::from_filename(&name) {
                max_seq = max_seq.max(seq);
            }
        }

        Ok(Self {
            dir,
            next_seq: AtomicU32::new(max_seq.saturating_add(1).max(1)),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write_artifact(&self, kind: ArtifactKind, bytes: &[u8]) -> Result<u32> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let final_name = format!("{:03}-{}", seq, kind.suffix());
        let tmp_name = format!(".tmp-{:03}-{}", seq, kind.suffix());
        let final_path = self.dir.join(&final_name);
        let tmp_path = self.dir.join(&tmp_name);

        let write_result = fs::write(&tmp_path, bytes)
            .with_context(|| format!("failed to write temp journal file: {}", tmp_path.display()))
            .and_then(|_| {
                fs::rename(&tmp_path, &final_path).with_context(|| {
                    format!(
                        "failed to rename journal artifact into place: {}",
                        final_path.display()
                    )
                })
            });

        if let Err(ref err) = write_result {
            error!(job_dir = %self.dir.display(), seq, error = %err, "journal write failed");
        }
        write_result.map(|_| seq)
    }

    pub fn append_prompt(&self, text: &str) -> Result<u32> {
        self.write_artifact(ArtifactKind::Prompt, text.as_bytes())
    }

    pub fn append_response(&self, text: &str) -> Result<u32> {
        self.write_artifact(ArtifactKind::Response, text.as_bytes())
    }

    pub fn append_tool_calls(&self, calls: &[ToolInvocation]) -> Result<u32> {
        let bytes = serde_json::to_vec_pretty(calls).context("failed to serialize tool calls")?;
        self.write_artifact(ArtifactKind::ToolCalls, &bytes)
    }

    pub fn append_tool_results(&self, results: &[ToolResult]) -> Result<u32> {
        let bytes =
            serde_json::to_vec_pretty(results).context("failed to serialize tool results")?;
        self.write_artifact(ArtifactKind::ToolResults, &bytes)
    }

    /// Reconstruct rounds by scanning filenames in numeric order and
    /// grouping by shape: prompt -> response -> [tool-calls ->
    /// tool-results]. A malformed or missing artifact fails only that
    /// round's field, not the whole read.
    pub fn read_all_rounds(&self) -> Result<Vec<Round>> {
        let mut artifacts: BTreeMap<u32, ArtifactKind> = BTreeMap::new();
        for entry in fs::read_dir(&self.dir)
            .with_context(|| format!("failed to read journal directory: {}", self.dir.display()))?
        {
            let entry = entry.context("failed to read journal directory entry")?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') {
                continue; // stray temp file from an interrupted write
            }
            if let Some((seq, kind)) = ArtifactKind::from_filename(&name) {
                artifacts.insert(seq, kind);
            }
        }

        let mut rounds: Vec<Round> = Vec::new();
        let mut current = Round::default();
        let mut has_content = false;

        for (seq, kind) in artifacts {
            let path = self.dir.join(format!(
                "{:03}-{}",
                seq,
                kind.suffix()
            ));
            let read = fs::read_to_string(&path);
            match kind {
                ArtifactKind::Prompt => {
                    if has_content {
                        rounds.push(std::mem::take(&mut current));
                    }
                    current.sequence = rounds.len() as u32 + 1;
                    current.prompt = Some(read.unwrap_or_default());
                    has_content = true;
                }
                ArtifactKind::Response => {
                    current.response = Some(read.unwrap_or_default());
                }
                ArtifactKind::ToolCalls => {
                    current.tool_calls = read
                        .ok()
                        .and_then(|s| serde_json::from_str(&s).ok())
                        .unwrap_or_default();
                }
                ArtifactKind::ToolResults => {
                    current.tool_results = read
                        .ok()
                        .and_then(|s| serde_json::from_str(&s).ok())
                        .unwrap_or_default();
                }
            }
        }
        if has_content {
            rounds.push(current);
        }
        Ok(rounds)
    }

    /// No-op: all writes are already fsync'd via rename; kept so callers
    /// have an explicit point to signal "done with this journal".
    pub fn close(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use pedro_core::round::ToolInvocation;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn journal_monotonicity_and_round_shape() {
        let base = tempdir().unwrap();
        let journal = Journal::open(base.path(), "job-1").unwrap();

        journal.append_prompt("p1").unwrap();
        journal.append_response("Done. TASK_COMPLETE").unwrap();

        let rounds = journal.read_all_rounds().unwrap();
        assert_eq!(rounds.len(), 1);
        assert_eq!(rounds[0].prompt.as_deref(), Some("p1"));
        assert_eq!(rounds[0].response.as_deref(), Some("Done. TASK_COMPLETE"));
        assert!(rounds[0].tool_calls.is_empty());

        let mut names: Vec<String> = fs::read_dir(journal.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["001-prompt.txt", "002-response.txt"]);
    }

    #[test]
    fn dispatch_mirror_tool_calls_and_results_same_length() {
        let base = tempdir().unwrap();
        let journal = Journal::open(base.path(), "job-2").unwrap();

        journal.append_prompt("p1").unwrap();
        journal.append_response("calling a tool").unwrap();
        let calls = vec![ToolInvocation {
            tool: "file".into(),
            arguments: json!({"op": "read", "path": "README.md"})
                .as_object()
                .unwrap()
                .clone(),
            raw_text: "{}".into(),
        }];
        journal.append_tool_calls(&calls).unwrap();
        let results = vec![ToolResult {
            tool: "file".into(),
            success: true,
            output: "Hello".into(),
            error: String::new(),
            modified_files: vec![],
            data: Default::default(),
        }];
        journal.append_tool_results(&results).unwrap();

        let rounds = journal.read_all_rounds().unwrap();
        assert_eq!(rounds.len(), 1);
        assert_eq!(rounds[0].tool_calls.len(), rounds[0].tool_results.len());
        assert_eq!(rounds[0].tool_calls[0].tool, rounds[0].tool_results[0].tool);
    }

    #[test]
    fn resumes_sequence_after_reopen() {
        let base = tempdir().unwrap();
        {
            let journal = Journal::open(base.path(), "job-3").unwrap();
            journal.append_prompt("p1").unwrap();
            journal.append_response("r1").unwrap();
        }
        let journal = Journal::open(base.path(), "job-3").unwrap();
        let seq = journal.append_prompt("p2").unwrap();
        assert_eq!(seq, 3);
    }

    #[test]
    fn ignores_stray_temp_files() {
        let base = tempdir().unwrap();
        let journal = Journal::open(base.path(), "job-4").unwrap();
        journal.append_prompt("p1").unwrap();
        fs::write(journal.dir().join(".tmp-002-response.txt"), b"partial").unwrap();
        let rounds = journal.read_all_rounds().unwrap();
        assert_eq!(rounds.len(), 1);
        assert_eq!(rounds[0].response, None);
    }
}
