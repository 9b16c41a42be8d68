//! Ambient configuration. The core accepts a configuration record by
//! value; this module is the one place that touches a well-known file
//! path, TOML-backed with a `directories`-resolved default path.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory under which per-job journal directories are created.
    pub base_dir: PathBuf,
    pub backend: BackendConfig,
    pub window_total: usize,
    pub max_rounds: u32,
    pub max_retries: u32,
    /// Caps jobs running concurrently across the whole process. `None`
    /// (the default) leaves submissions unbounded.
    pub max_concurrent_jobs: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// One of `openai`, `ollama`, `mock`. `mock` exists for dry runs and
    /// is never selected by default.
    pub kind: String,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            backend: BackendConfig::default(),
            window_total: 128_000,
            max_rounds: 20,
            max_retries: 3,
            max_concurrent_jobs: None,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: "openai".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
        }
    }
}

fn default_base_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "pedrocli", "pedro")
        .map(|dirs| dirs.data_dir().join("jobs"))
        .unwrap_or_else(|| PathBuf::from(".pedro/jobs"))
}

impl Config {
    /// Load from an explicit path, falling back to defaults entirely when
    /// no path is given — a missing config file is not an error.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let Some(path) = explicit_path else {
            return Ok(Config::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("failed to parse config file: {}", path.display()))
    }
}
