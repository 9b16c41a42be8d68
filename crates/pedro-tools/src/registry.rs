//! `{name(), description(), parameter_schema(), invoke(context, args)}`
//! contract and sequential batch dispatch.

use async_trait::async_trait;
use pedro_core::round::{ToolInvocation, ToolResult};
use pedro_core::schema::ToolSchema;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Carries the cancellation signal and working directory a tool executes
/// against.
#[derive(Clone)]
pub struct ToolContext {
    pub working_dir: PathBuf,
    pub cancellation: CancellationToken,
}

impl ToolContext {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            cancellation: CancellationToken::new(),
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameter_schema(&self) -> ToolSchema;

    /// Default per-invocation timeout: 30s for search/file tools, longer
    /// for test/build-shaped tools that override it.
    fn default_timeout(&self) -> Duration {
        Duration::from_secs(30)
    }

    async fn invoke(
        &self,
        ctx: &ToolContext,
        args: &serde_json::Map<String, serde_json::Value>,
    ) -> ToolResult;
}

/// Immutable once the owning agent is constructed; no locking required.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> =
            self.tools.values().map(|t| t.parameter_schema()).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }
}

/// Dispatch one parsed invocation: unknown name, schema mismatch, and
/// timeout are all non-fatal structured errors fed back to the model.
async fn dispatch_one(registry: &ToolRegistry, ctx: &ToolContext, call: &ToolInvocation) -> ToolResult {
    let Some(tool) = registry.get(&call.tool) else {
        return ToolResult::error(call.tool.clone(), "unknown tool");
    };

    if let Err(err) = tool.parameter_schema().coerce(&call.arguments) {
        return ToolResult::error(call.tool.clone(), err.to_string());
    }

    if ctx.cancellation.is_cancelled() {
        return ToolResult::error(call.tool.clone(), "cancelled");
    }

    let timeout = tool.default_timeout();
    tokio::select! {
        result = tool.invoke(ctx, &call.arguments) => result,
        _ = tokio::time::sleep(timeout) => {
            warn!(tool = %call.tool, timeout_secs = timeout.as_secs(), "tool invocation timed out");
            ToolResult::error(call.tool.clone(), "timed out")
        }
        _ = ctx.cancellation.cancelled() => {
            ToolResult::error(call.tool.clone(), "cancelled")
        }
    }
}

/// Invocations in one batch run sequentially in emission order so the
/// model's mental model of repo state stays consistent round-to-round.
pub async fn dispatch_batch(
    registry: &ToolRegistry,
    ctx: &ToolContext,
    calls: &[ToolInvocation],
) -> Vec<ToolResult> {
    let mut results = Vec::with_capacity(calls.len());
    for call in calls {
        results.push(dispatch_one(registry, ctx, call).await);
    }
    results
}

/// Resolve `rel_path` under `root`, rejecting any path that escapes it —
/// grounded in `csa-executor::context_loader::try_load_file`'s
/// canonicalize-and-prefix-check traversal guard.
pub fn resolve_within_root(root: &Path, rel_path: &str) -> Result<PathBuf, String> {
    let candidate = root.join(rel_path);
    let canonical_root = root
        .canonicalize()
        .map_err(|e| format!("cannot canonicalize root: {e}"))?;
    // The file may not exist yet (e.g. a write), so canonicalize the
    // parent directory and re-attach the file name.
    let (check_dir, file_name) = if candidate.exists() {
        (candidate.clone(), None)
    } else {
        match candidate.parent() {
            Some(parent) => (parent.to_path_buf(), candidate.file_name()),
            None => (candidate.clone(), None),
        }
    };
    let canonical_check = check_dir
        .canonicalize()
        .map_err(|e| format!("cannot resolve path: {e}"))?;
    if !canonical_check.starts_with(&canonical_root) {
        return Err(format!("path '{rel_path}' escapes the working directory"));
    }
    match file_name {
        Some(name) => Ok(canonical_check.join(name)),
        None => Ok(canonical_check),
    }
}
