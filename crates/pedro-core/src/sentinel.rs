//! Completion sentinel detection.
//!
//! The literal string `TASK_COMPLETE` (ASCII, case-insensitive), or an
//! agent-configured alternate pattern, terminates the loop successfully —
//! but only when it appears outside a fenced code block, to avoid the
//! false positives the source repository's fuzzy matching produced.

const DEFAULT_SENTINEL: &str = "TASK_COMPLETE";

/// Strip fenced ``` code blocks (of any tag) from `text`, returning the
/// remaining "commentary" content that sentinel matching is scoped to.
pub fn strip_fenced_blocks(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_fence = false;
    for line in text.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if !in_fence {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

/// Whether `response` contains the default sentinel, or any of
/// `extra_patterns`, outside fenced code blocks.
pub fn contains_sentinel(response: &str, extra_patterns: &[String]) -> bool {
    let commentary = strip_fenced_blocks(response);
    let upper = commentary.to_uppercase();
    if upper.contains(DEFAULT_SENTINEL) {
        return true;
    }
    extra_patterns
        .iter()
        .any(|pattern| upper.contains(&pattern.to_uppercase()))
}
