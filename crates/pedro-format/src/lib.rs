//! Tool-call formatter: model-family dialect translation.
//!
//! Each dialect implements the identical bidirectional contract —
//! `render_tools` for the system-prompt tool section, `parse_calls` for
//! extracting invocations from a response — in the surface syntax that
//! model family expects. Dialect selection is a pure, substring/prefix
//! based function of the configured model name.

use pedro_core::round::ToolInvocation;
use pedro_core::schema::{ParamType, ToolSchema};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

/// Matches a fenced ```json block (the generic dialect's call shape).
static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```json\s*(.*?)```").expect("valid regex"));

/// Capability record rather than a trait-object hierarchy — each dialect
/// is a small set of function-valued behavior selected by a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Generic,
    Qwen,
    Llama,
    Mistral,
}

impl Dialect {
    /// Select by prefix/substring match on the configured model name,
    /// defaulting conservatively to `Generic`.
    pub fn from_model_name(model_name: &str) -> Self {
        let lower = model_name.to_lowercase();
        if lower.contains("qwen") {
            Dialect::Qwen
        } else if lower.contains("llama") {
            Dialect::Llama
        } else if lower.contains("mistral") || lower.contains("mixtral") {
            Dialect::Mistral
        } else {
            Dialect::Generic
        }
    }

    pub fn render_tools(&self, tools: &[ToolSchema]) -> String {
        let catalog = render_tool_catalog(tools);
        match self {
            Dialect::Generic => format!(
                "To call a tool, emit exactly one fenced code block tagged `json` \
                 containing a single JSON object: {{\"tool\": \"<name>\", \"args\": {{...}}}}.\n\n\
                 Available tools:\n{catalog}"
            ),
            Dialect::Qwen => format!(
                "To call a tool, wrap a single JSON object in <tool_call></tool_call> \
                 tags: <tool_call>{{\"tool\": \"<name>\", \"args\": {{...}}}}</tool_call>.\n\n\
                 Available tools:\n{catalog}"
            ),
            Dialect::Llama => format!(
                "To call a tool, emit <|python_tag|>{{\"tool\": \"<name>\", \"args\": {{...}}}}<|eot_id|>.\n\n\
                 Available tools:\n{catalog}"
            ),
            Dialect::Mistral => format!(
                "To call tools, emit [TOOL_CALLS] followed by a JSON array of \
                 {{\"tool\": \"<name>\", \"args\": {{...}}}} objects.\n\n\
                 Available tools:\n{catalog}"
            ),
        }
    }

    pub fn parse_calls(&self, text: &str) -> Vec<ToolInvocation> {
        match self {
            Dialect::Generic => parse_generic(text),
            Dialect::Qwen => parse_marker_wrapped(text, "<tool_call>", "</tool_call>"),
            Dialect::Llama => parse_marker_wrapped(text, "<|python_tag|>", "<|eot_id|>"),
            Dialect::Mistral => parse_mistral(text),
        }
    }
}

fn param_type_str(kind: ParamType) -> &'static str {
    match kind {
        ParamType::String => "string",
        ParamType::Number => "number",
        ParamType::Boolean => "boolean",
    }
}

fn render_tool_catalog(tools: &[ToolSchema]) -> String {
    let mut out = String::new();
    for tool in tools {
        out.push_str(&format!("- {}: {}\n", tool.name, tool.description));
        for param in &tool.parameters {
            out.push_str(&format!(
                "    {} ({}{}): {}\n",
                param.name,
                param_type_str(param.kind),
                if param.required { ", required" } else { "" },
                param.description
            ));
        }
    }
    out
}

fn call_from_value(value: &Value, raw_text: &str) -> Option<ToolInvocation> {
    let obj = value.as_object()?;
    let tool = obj.get("tool")?.as_str()?.to_string();
    let arguments = obj
        .get("args")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    Some(ToolInvocation {
        tool,
        arguments,
        raw_text: raw_text.to_string(),
    })
}

/// Fenced ```json blocks first, then any bare JSON object with a `tool`
/// key.
fn parse_generic(text: &str) -> Vec<ToolInvocation> {
    let mut calls = Vec::new();
    for captures in FENCE_RE.captures_iter(text) {
        let raw = captures.get(0).map(|m| m.as_str()).unwrap_or_default();
        if let Ok(value) = serde_json::from_str::<Value>(captures[1].trim()) {
            if let Some(call) = call_from_value(&value, raw) {
                calls.push(call);
            }
        }
    }
    if !calls.is_empty() {
        return calls;
    }
    bare_json_objects(text)
        .into_iter()
        .filter_map(|(raw, value)| call_from_value(&value, &raw))
        .collect()
}

/// Extract the region between `open`/`close` markers, then JSON-decode it
/// (the Qwen/Llama dialect shape).
fn parse_marker_wrapped(text: &str, open: &str, close: &str) -> Vec<ToolInvocation> {
    let mut calls = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find(open) {
        let after_open = &rest[start + open.len()..];
        let Some(end) = after_open.find(close) else {
            break;
        };
        let inner = &after_open[..end];
        let raw = &rest[start..start + open.len() + end + close.len()];
        if let Ok(value) = serde_json::from_str::<Value>(inner.trim()) {
            if let Some(call) = call_from_value(&value, raw) {
                calls.push(call);
            }
        }
        rest = &after_open[end + close.len()..];
    }
    calls
}

/// `[TOOL_CALLS]` prefix followed by a JSON array of call objects.
fn parse_mistral(text: &str) -> Vec<ToolInvocation> {
    let Some(marker_pos) = text.find("[TOOL_CALLS]") else {
        return Vec::new();
    };
    let after = &text[marker_pos + "[TOOL_CALLS]".len()..];
    let Some(array_start) = after.find('[') else {
        return Vec::new();
    };
    let Some((raw, value)) = balanced_json_at(after, array_start) else {
        return Vec::new();
    };
    let Some(array) = value.as_array() else {
        return Vec::new();
    };
    array
        .iter()
        .filter_map(|v| call_from_value(v, &raw))
        .collect()
}

/// Scan `text` for top-level `{...}` substrings and return those that
/// parse as JSON and contain a `tool` key.
fn bare_json_objects(text: &str) -> Vec<(String, Value)> {
    let mut found = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some((raw, value)) = balanced_json_at(text, i) {
                if value.get("tool").is_some() {
                    found.push((raw.clone(), value));
                }
                i += raw.len().max(1);
                continue;
            }
        }
        i += 1;
    }
    found
}

/// Starting at byte offset `start` (which must point at `{` or `[`),
/// find the matching close delimiter by depth counting and try to parse
/// the span as JSON. `{`/`[`/`}`/`]` are all single-byte ASCII so these
/// offsets are always valid UTF-8 char boundaries.
fn balanced_json_at(text: &str, start: usize) -> Option<(String, Value)> {
    let bytes = text.as_bytes();
    let (open, close) = match bytes[start] {
        b'{' => (b'{', b'}'),
        b'[' => (b'[', b']'),
        _ => return None,
    };
    let mut depth = 0i32;
    let mut j = start;
    while j < bytes.len() {
        if bytes[j] == open {
            depth += 1;
        } else if bytes[j] == close {
            depth -= 1;
            if depth == 0 {
                let candidate = &text[start..=j];
                return serde_json::from_str::<Value>(candidate)
                    .ok()
                    .map(|v| (candidate.to_string(), v));
            }
        }
        j += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_tools() -> Vec<ToolSchema> {
        vec![ToolSchema {
            name: "file".into(),
            description: "read or write files".into(),
            parameters: vec![],
        }]
    }

    #[test]
    fn dialect_selection_defaults_to_generic() {
        assert_eq!(Dialect::from_model_name("gpt-4o"), Dialect::Generic);
        assert_eq!(Dialect::from_model_name("Qwen2.5-72B"), Dialect::Qwen);
        assert_eq!(Dialect::from_model_name("meta-llama-3.1"), Dialect::Llama);
        assert_eq!(Dialect::from_model_name("mistral-large"), Dialect::Mistral);
    }

    #[test]
    fn generic_round_trip_fenced_block() {
        let text = "Here's my call:\n```json\n{\"tool\": \"file\", \"args\": {\"op\": \"read\"}}\n```\n";
        let calls = Dialect::Generic.parse_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool, "file");
        assert_eq!(calls[0].arguments.get("op").unwrap(), "read");
    }

    #[test]
    fn generic_accepts_bare_json_object() {
        let text = "{\"tool\": \"file\", \"args\": {\"op\": \"read\"}} some trailing commentary";
        let calls = Dialect::Generic.parse_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool, "file");
    }

    #[test]
    fn qwen_round_trip() {
        let text = "<tool_call>{\"tool\": \"bash\", \"args\": {\"cmd\": \"ls\"}}</tool_call>";
        let calls = Dialect::Qwen.parse_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool, "bash");
    }

    #[test]
    fn llama_round_trip() {
        let text = "<|python_tag|>{\"tool\": \"search\", \"args\": {}}<|eot_id|>";
        let calls = Dialect::Llama.parse_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool, "search");
    }

    #[test]
    fn mistral_round_trip_array() {
        let text = "[TOOL_CALLS] [{\"tool\": \"file\", \"args\": {\"op\": \"read\"}}, {\"tool\": \"bash\", \"args\": {}}]";
        let calls = Dialect::Mistral.parse_calls(text);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].tool, "file");
        assert_eq!(calls[1].tool, "bash");
    }

    #[test]
    fn unparseable_text_yields_empty_list() {
        assert!(Dialect::Generic.parse_calls("{not valid json").is_empty());
        assert!(Dialect::Qwen.parse_calls("no markers here").is_empty());
    }

    #[test]
    fn render_tools_lists_every_tool_for_each_dialect() {
        let tools = sample_tools();
        for dialect in [Dialect::Generic, Dialect::Qwen, Dialect::Llama, Dialect::Mistral] {
            let rendered = dialect.render_tools(&tools);
            assert!(rendered.contains("file"));
        }
    }

    #[test]
    fn parsing_a_rendered_call_recovers_the_same_tool_and_args() {
        let call = json!({"tool": "file", "args": {"op": "read"}});
        let rendered = format!("```json\n{call}\n```");
        let parsed = Dialect::Generic.parse_calls(&rendered);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].tool, "file");
        assert_eq!(parsed[0].arguments, call["args"].as_object().unwrap().clone());
    }
}
