use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::memory::HistoryWindow;
use crate::model::SamplingParams;

/// Complete configuration for the rollout harness.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub env: EnvConfig,
    pub inference: InferenceConfig,
    pub dataset: DatasetConfig,
}

/// Environment batch and history configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvConfig {
    /// Records rendered by `fetch` and used by the `Recent` window (default: 3).
    pub history_length: usize,
    /// Maximum screenshots kept in a rebuilt message history (default: 3).
    pub max_images: usize,
    /// History windowing policy (default: full log, latest message preserved).
    pub window: HistoryWindow,
    /// Number of distinct tasks sampled per reset (default: 4).
    pub env_num: usize,
    /// Instances started from each sampled task (default: 2).
    pub group_n: usize,
    /// Seed for task sampling (default: 0).
    pub seed: u64,
    /// Per-instance step/reset timeout in seconds (default: 120).
    pub step_timeout_secs: u64,
    /// Whether a failed browser action ends the episode (default: false).
    pub fail_action_terminates: bool,
    /// Reward subtracted for actions flagged invalid (default: 0.1).
    pub invalid_action_penalty: f64,
    /// Maximum interaction steps per episode (default: 15).
    pub max_steps: usize,
    /// Root for per-task working directories (default: "downloads").
    pub download_dir: PathBuf,
    /// Use accessibility-tree text instead of screenshots (default: false).
    pub text_only: bool,
    /// Dump the accessibility tree next to each screenshot (default: false).
    pub save_accessibility_tree: bool,
    /// Pause for `Wait` and page-changing actions, in seconds (default: 5).
    pub wait_secs: u64,
    /// Pause after the initial navigation, in seconds (default: 3).
    pub settle_secs: u64,
}

/// Inference server configuration (OpenAI-compatible chat completions).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Base URL of the server (default: "http://localhost:8000/v1").
    pub base_url: String,
    /// Served model name.
    pub model: String,
    /// Bearer token; empty for local servers.
    pub api_key: String,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u32>,
    pub max_tokens: Option<u32>,
    pub n: Option<u32>,
    pub skip_special_tokens: bool,
    /// HTTP read timeout in seconds (default: 120).
    pub request_timeout_secs: u64,
    /// Requests in flight during batch generation (default: 100).
    pub max_concurrency: usize,
}

/// Task dataset locations (newline-delimited JSON).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    pub train_path: PathBuf,
    pub test_path: PathBuf,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            history_length: 3,
            max_images: 3,
            window: HistoryWindow::Full,
            env_num: 4,
            group_n: 2,
            seed: 0,
            step_timeout_secs: 120,
            fail_action_terminates: false,
            invalid_action_penalty: 0.1,
            max_steps: 15,
            download_dir: PathBuf::from("downloads"),
            text_only: false,
            save_accessibility_tree: false,
            wait_secs: 5,
            settle_secs: 3,
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/v1".into(),
            model: "Qwen2.5-VL-7B-Instruct".into(),
            api_key: String::new(),
            temperature: Some(1.0),
            top_p: Some(0.95),
            top_k: Some(100),
            max_tokens: Some(8192),
            n: Some(1),
            skip_special_tokens: true,
            request_timeout_secs: 120,
            max_concurrency: 100,
        }
    }
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            train_path: PathBuf::from("$WEBVOYAGER_DATA/train.jsonl"),
            test_path: PathBuf::from("$WEBVOYAGER_DATA/test.jsonl"),
        }
    }
}

impl HarnessConfig {
    /// Load from a JSON file, or fall back to defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config from {}", path.display()))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("Failed to parse config from {}", path.display()))
            }
            None => Ok(Self::default()),
        }
    }

    /// Override inference settings from environment variables.
    ///
    /// Recognised: `BASE_URL`, `MODEL`, `OPENAI_API_KEY`, `MAX_TOKENS`,
    /// `TEMPERATURE`, `TOP_P`, `TOP_K`, `N`, `REQUEST_TIMEOUT`. Empty
    /// variables are ignored; unparseable ones are ignored with a warning.
    pub fn apply_env_overrides(&mut self) {
        let inf = &mut self.inference;
        if let Some(v) = env_or::<String>("BASE_URL") {
            inf.base_url = v;
        }
        if let Some(v) = env_or::<String>("MODEL") {
            inf.model = v;
        }
        if inf.api_key.is_empty() {
            if let Some(v) = env_or::<String>("OPENAI_API_KEY") {
                inf.api_key = v;
            }
        }
        if let Some(v) = env_or("MAX_TOKENS") {
            inf.max_tokens = Some(v);
        }
        if let Some(v) = env_or("TEMPERATURE") {
            inf.temperature = Some(v);
        }
        if let Some(v) = env_or("TOP_P") {
            inf.top_p = Some(v);
        }
        if let Some(v) = env_or("TOP_K") {
            inf.top_k = Some(v);
        }
        if let Some(v) = env_or("N") {
            inf.n = Some(v);
        }
        if let Some(v) = env_or::<f64>("REQUEST_TIMEOUT") {
            inf.request_timeout_secs = v.max(1.0).round() as u64;
        }
    }
}

impl EnvConfig {
    /// Total number of environment instances (`env_num * group_n`).
    pub fn num_instances(&self) -> usize {
        self.env_num * self.group_n
    }
}

impl InferenceConfig {
    /// Sampling parameters sent with every chat request.
    pub fn sampling(&self) -> SamplingParams {
        SamplingParams {
            temperature: self.temperature,
            top_p: self.top_p,
            top_k: self.top_k,
            max_tokens: self.max_tokens,
            n: self.n,
            skip_special_tokens: Some(self.skip_special_tokens),
        }
    }
}

fn env_or<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok().filter(|v| !v.is_empty())?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(variable = name, value = %raw, "ignoring unparseable environment override");
            None
        }
    }
}
