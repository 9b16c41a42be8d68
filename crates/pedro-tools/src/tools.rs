//! Built-in illustrative tools: file, bash, search.
//!
//! `file` and `search` restrict every path to a root directory via
//! canonicalize-then-prefix-check. `bash` gates commands with an
//! allow/deny prefix list and captures stdout/stderr/exit-status as a
//! result rather than treating a non-zero exit as a crash — sandboxing
//! stops at that list, there is no process-level isolation.

use crate::registry::{resolve_within_root, Tool, ToolContext};
use async_trait::async_trait;
use pedro_core::round::ToolResult;
use pedro_core::schema::{ParamType, ToolParameter, ToolSchema};
use regex::Regex;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

fn arg_str<'a>(args: &'a serde_json::Map<String, serde_json::Value>, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str())
}

/// Read/write/list files rooted at the job's working directory.
pub struct FileTool;

#[async_trait]
impl Tool for FileTool {
    fn name(&self) -> &str {
        "file"
    }

    fn description(&self) -> &str {
        "Read, write, or list files within the working directory."
    }

    fn parameter_schema(&self) -> ToolSchema {
        ToolSchema {
            name: "file".into(),
            description: self.description().into(),
            parameters: vec![
                ToolParameter {
                    name: "op".into(),
                    kind: ParamType::String,
                    required: true,
                    description: "one of: read, write, list".into(),
                },
                ToolParameter {
                    name: "path".into(),
                    kind: ParamType::String,
                    required: true,
                    description: "path relative to the working directory".into(),
                },
                ToolParameter {
                    name: "content".into(),
                    kind: ParamType::String,
                    required: false,
                    description: "content to write (required for op=write)".into(),
                },
            ],
        }
    }

    async fn invoke(
        &self,
        ctx: &ToolContext,
        args: &serde_json::Map<String, serde_json::Value>,
    ) -> ToolResult {
        let Some(op) = arg_str(args, "op") else {
            return ToolResult::error("file", "missing 'op'");
        };
        let Some(path) = arg_str(args, "path") else {
            return ToolResult::error("file", "missing 'path'");
        };

        let resolved = match resolve_within_root(&ctx.working_dir, path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error("file", e),
        };

        match op {
            "read" => match tokio::fs::read_to_string(&resolved).await {
                Ok(content) => ToolResult {
                    tool: "file".into(),
                    success: true,
                    output: content,
                    error: String::new(),
                    modified_files: vec![],
                    data: Default::default(),
                },
                Err(e) => ToolResult::error("file", format!("read failed: {e}")),
            },
            "write" => {
                let content = arg_str(args, "content").unwrap_or_default();
                if let Some(parent) = resolved.parent() {
                    if let Err(e) = tokio::fs::create_dir_all(parent).await {
                        return ToolResult::error("file", format!("mkdir failed: {e}"));
                    }
                }
                match tokio::fs::write(&resolved, content).await {
                    Ok(()) => ToolResult {
                        tool: "file".into(),
                        success: true,
                        output: format!("wrote {} bytes to {}", content.len(), path),
                        error: String::new(),
                        modified_files: vec![path.to_string()],
                        data: Default::default(),
                    },
                    Err(e) => ToolResult::error("file", format!("write failed: {e}")),
                }
            }
            "list" => match tokio::fs::read_dir(&resolved).await {
                Ok(mut entries) => {
                    let mut names = Vec::new();
                    loop {
                        match entries.next_entry().await {
                            Ok(Some(entry)) => {
                                names.push(entry.file_name().to_string_lossy().to_string())
                            }
                            Ok(None) => break,
                            Err(e) => return ToolResult::error("file", format!("list failed: {e}")),
                        }
                    }
                    names.sort();
                    ToolResult {
                        tool: "file".into(),
                        success: true,
                        output: names.join("\n"),
                        error: String::new(),
                        modified_files: vec![],
                        data: Default::default(),
                    }
                }
                Err(e) => ToolResult::error("file", format!("list failed: {e}")),
            },
            other => ToolResult::error("file", format!("unknown op '{other}'")),
        }
    }
}

/// Execute a shell command gated by an allow/deny list. No process-level
/// sandboxing beyond that list.
pub struct BashTool {
    pub allowed_prefixes: Option<Vec<String>>,
    pub denied_prefixes: Vec<String>,
    pub timeout: Duration,
}

impl Default for BashTool {
    fn default() -> Self {
        Self {
            allowed_prefixes: None,
            denied_prefixes: vec!["rm -rf /".into(), "sudo".into()],
            timeout: Duration::from_secs(5 * 60),
        }
    }
}

impl BashTool {
    fn is_permitted(&self, command: &str) -> bool {
        if self.denied_prefixes.iter().any(|d| command.starts_with(d)) {
            return false;
        }
        match &self.allowed_prefixes {
            None => true,
            Some(allowed) => allowed.iter().any(|a| command.starts_with(a)),
        }
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Run a shell command in the working directory, subject to an allow/deny list."
    }

    fn parameter_schema(&self) -> ToolSchema {
        ToolSchema {
            name: "bash".into(),
            description: self.description().into(),
            parameters: vec![ToolParameter {
                name: "command".into(),
                kind: ParamType::String,
                required: true,
                description: "the shell command to run".into(),
            }],
        }
    }

    fn default_timeout(&self) -> Duration {
        self.timeout
    }

    async fn invoke(
        &self,
        ctx: &ToolContext,
        args: &serde_json::Map<String, serde_json::Value>,
    ) -> ToolResult {
        let Some(command) = arg_str(args, "command") else {
            return ToolResult::error("bash", "missing 'command'");
        };

        if !self.is_permitted(command) {
            return ToolResult::error("bash", "command denied by allow/deny list");
        }

        let output = Command::new("/bin/sh")
            .arg("-c")
            .arg(command)
            .current_dir(&ctx.working_dir)
            .stdin(Stdio::null())
            .output()
            .await;

        match output {
            Ok(output) => ToolResult {
                tool: "bash".into(),
                success: output.status.success(),
                output: String::from_utf8_lossy(&output.stdout).into_owned(),
                error: String::from_utf8_lossy(&output.stderr).into_owned(),
                modified_files: vec![],
                data: Default::default(),
            },
            Err(e) => ToolResult::error("bash", format!("spawn failed: {e}")),
        }
    }
}

/// Regex search over files under the working directory, walking the tree
/// with `.gitignore` semantics via the `ignore` crate.
pub struct SearchTool;

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Search for a regex pattern across files in the working directory."
    }

    fn parameter_schema(&self) -> ToolSchema {
        ToolSchema {
            name: "search".into(),
            description: self.description().into(),
            parameters: vec![ToolParameter {
                name: "pattern".into(),
                kind: ParamType::String,
                required: true,
                description: "regex pattern to search for".into(),
            }],
        }
    }

    async fn invoke(
        &self,
        ctx: &ToolContext,
        args: &serde_json::Map<String, serde_json::Value>,
    ) -> ToolResult {
        let Some(pattern) = arg_str(args, "pattern") else {
            return ToolResult::error("search", "missing 'pattern'");
        };
        let re = match Regex::new(pattern) {
            Ok(re) => re,
            Err(e) => return ToolResult::error("search", format!("invalid pattern: {e}")),
        };

        let working_dir = ctx.working_dir.clone();
        let pattern_owned = pattern.to_string();
        let matches = tokio::task::spawn_blocking(move || search_blocking(&working_dir, &re))
            .await
            .unwrap_or_else(|e| Err(format!("search task failed: {e}")));

        match matches {
            Ok(lines) => ToolResult {
                tool: "search".into(),
                success: true,
                output: lines.join("\n"),
                error: String::new(),
                modified_files: vec![],
                data: [(
                    "pattern".to_string(),
                    serde_json::Value::String(pattern_owned),
                )]
                .into_iter()
                .collect(),
            },
            Err(e) => ToolResult::error("search", e),
        }
    }
}

fn search_blocking(root: &PathBuf, re: &Regex) -> Result<Vec<String>, String> {
    let mut matches = Vec::new();
    for entry in ignore::WalkBuilder::new(root).build() {
        let entry = entry.map_err(|e| e.to_string())?;
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        for (lineno, line) in content.lines().enumerate() {
            if re.is_match(line) {
                matches.push(format!("{}:{}: {}", entry.path().display(), lineno + 1, line));
            }
        }
    }
    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn file_write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let ctx = ToolContext::new(dir.path());
        let tool = FileTool;

        let write_args = json!({"op": "write", "path": "a.txt", "content": "hello"})
            .as_object()
            .unwrap()
            .clone();
        let write_result = tool.invoke(&ctx, &write_args).await;
        assert!(write_result.success);
        assert_eq!(write_result.modified_files, vec!["a.txt".to_string()]);

        let read_args = json!({"op": "read", "path": "a.txt"}).as_object().unwrap().clone();
        let read_result = tool.invoke(&ctx, &read_args).await;
        assert!(read_result.success);
        assert_eq!(read_result.output, "hello");
    }

    #[tokio::test]
    async fn file_rejects_path_traversal() {
        let dir = tempdir().unwrap();
        let ctx = ToolContext::new(dir.path());
        let tool = FileTool;
        let args = json!({"op": "read", "path": "../../../etc/passwd"})
            .as_object()
            .unwrap()
            .clone();
        let result = tool.invoke(&ctx, &args).await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn bash_denies_listed_prefix() {
        let dir = tempdir().unwrap();
        let ctx = ToolContext::new(dir.path());
        let tool = BashTool::default();
        let args = json!({"command": "sudo rm -rf /"}).as_object().unwrap().clone();
        let result = tool.invoke(&ctx, &args).await;
        assert!(!result.success);
        assert_eq!(result.error, "command denied by allow/deny list");
    }

    #[tokio::test]
    async fn bash_runs_permitted_command() {
        let dir = tempdir().unwrap();
        let ctx = ToolContext::new(dir.path());
        let tool = BashTool::default();
        let args = json!({"command": "echo hi"}).as_object().unwrap().clone();
        let result = tool.invoke(&ctx, &args).await;
        assert!(result.success);
        assert_eq!(result.output.trim(), "hi");
    }

    #[tokio::test]
    async fn search_finds_matching_line() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn main() {}\n// TODO: fix\n").unwrap();
        let ctx = ToolContext::new(dir.path());
        let tool = SearchTool;
        let args = json!({"pattern": "TODO"}).as_object().unwrap().clone();
        let result = tool.invoke(&ctx, &args).await;
        assert!(result.success);
        assert!(result.output.contains("TODO"));
    }
}
