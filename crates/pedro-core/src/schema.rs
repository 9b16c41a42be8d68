//! Tool schema. Used by `pedro-format` to render the system-prompt tool
//! section and by `pedro-tools` to coerce and validate parsed invocation
//! arguments.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParamType,
    pub required: bool,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Number,
    Boolean,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
}

impl ToolSchema {
    /// Coerce and validate a parsed argument map against this schema.
    /// Unknown keys and missing required keys are structured errors, never
    /// a silent drop.
    pub fn coerce(
        &self,
        args: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), SchemaError> {
        let known: std::collections::HashSet<&str> =
            self.parameters.iter().map(|p| p.name.as_str()).collect();
        for key in args.keys() {
            if !known.contains(key.as_str()) {
                return Err(SchemaError::UnknownArgument(key.clone()));
            }
        }
        for param in &self.parameters {
            match args.get(&param.name) {
                None if param.required => {
                    return Err(SchemaError::MissingArgument(param.name.clone()));
                }
                None => {}
                Some(value) => {
                    if !type_matches(param.kind, value) {
                        return Err(SchemaError::TypeMismatch {
                            name: param.name.clone(),
                            expected: param.kind,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

fn type_matches(kind: ParamType, value: &serde_json::Value) -> bool {
    match kind {
        ParamType::String => value.is_string(),
        ParamType::Number => value.is_number(),
        ParamType::Boolean => value.is_boolean(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("unknown argument '{0}'")]
    UnknownArgument(String),
    #[error("missing required argument '{0}'")]
    MissingArgument(String),
    #[error("argument '{name}' does not match expected type {expected:?}")]
    TypeMismatch { name: String, expected: ParamType },
}
