//! Round and artifact shapes: one model turn plus the tool calls it made
//! and the results those calls produced.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `{tool, arguments, raw_text}`. Invariant: when the parse yields a name
/// not registered for the active agent, dispatch turns it into a synthetic
/// error result rather than a hard failure — see `pedro-executor`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool: String,
    pub arguments: serde_json::Map<String, serde_json::Value>,
    pub raw_text: String,
}

/// `{tool, success, output, error, modified_files, data}`. Only `output`
/// and `error` are textually injected into the next prompt; `modified_files`
/// feeds the summary path for compaction (`pedro-budget`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool: String,
    pub success: bool,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub modified_files: Vec<String>,
    #[serde(default)]
    pub data: BTreeMap<String, serde_json::Value>,
}

impl ToolResult {
    pub fn error(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            success: false,
            output: String::new(),
            error: message.into(),
            modified_files: Vec::new(),
            data: BTreeMap::new(),
        }
    }
}

/// Logical grouping of the four journal artifact kinds produced by one
/// inference iteration. The final round of a job may lack tool-calls /
/// tool-results if the model declared completion without calling tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Round {
    pub sequence: u32,
    pub prompt: Option<String>,
    pub response: Option<String>,
    pub tool_calls: Vec<ToolInvocation>,
    pub tool_results: Vec<ToolResult>,
}

impl Round {
    /// One-line compaction summary: `Round n: called tools [..]; modified
    /// files [..]; success=yes/no`.
    pub fn summary_line(&self) -> String {
        let tools: Vec<&str> = self.tool_calls.iter().map(|c| c.tool.as_str()).collect();
        let mut files: Vec<&str> = self
            .tool_results
            .iter()
            .flat_map(|r| r.modified_files.iter().map(String::as_str))
            .collect();
        files.sort_unstable();
        files.dedup();
        let success = !self.tool_results.is_empty() && self.tool_results.iter().all(|r| r.success);
        format!(
            "Round {}: called tools [{}]; modified files [{}]; success={}",
            self.sequence,
            tools.join(","),
            files.join(","),
            if success { "yes" } else { "no" }
        )
    }
}
