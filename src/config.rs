//! Session configuration: YAML scenario files and CLI-facing helpers

use crate::latency::DEFAULT_LATENCY_ROUNDS;
use crate::prompt::PromptSource;
use crate::{FailurePolicy, LatencyPolicy};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a benchmark session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    /// Base URL of the OpenAI-compatible API
    pub base_url: String,
    /// API key for authentication
    #[serde(default)]
    pub api_key: String,
    /// Model name; discovered from `/models` when absent
    #[serde(default)]
    pub model: Option<String>,
    /// Custom prompt text
    #[serde(default)]
    pub prompt: Option<String>,
    /// Generate random prompts of this many words instead (0 = off)
    #[serde(default)]
    pub num_words: usize,
    /// Maximum tokens to generate per request
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Concurrency levels to run, in order
    #[serde(default = "default_concurrency_levels")]
    pub concurrency: Vec<usize>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Per-request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Latency calibration probes
    #[serde(default = "default_latency_rounds")]
    pub latency_rounds: usize,
    #[serde(default)]
    pub latency_policy: LatencyPolicy,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

fn default_max_tokens() -> u32 {
    512
}
fn default_concurrency_levels() -> Vec<usize> {
    vec![1, 2, 4, 8, 16, 32, 64, 128]
}
fn default_temperature() -> f32 {
    1.0
}
fn default_timeout() -> u64 {
    300
}
fn default_latency_rounds() -> usize {
    DEFAULT_LATENCY_ROUNDS
}

impl BenchmarkConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        BenchmarkConfig {
            base_url: base_url.into(),
            api_key: String::new(),
            model: None,
            prompt: None,
            num_words: 0,
            max_tokens: default_max_tokens(),
            concurrency: default_concurrency_levels(),
            temperature: default_temperature(),
            timeout_secs: default_timeout(),
            latency_rounds: default_latency_rounds(),
            latency_policy: LatencyPolicy::default(),
            failure_policy: FailurePolicy::default(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn prompt_source(&self) -> PromptSource {
        PromptSource::resolve(self.prompt.as_deref(), self.num_words)
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(anyhow!("base_url is required"));
        }
        if self.max_tokens == 0 {
            return Err(anyhow!("max_tokens must be greater than zero"));
        }
        if self.concurrency.is_empty() {
            return Err(anyhow!("at least one concurrency level is required"));
        }
        if self.concurrency.contains(&0) {
            return Err(anyhow!("concurrency levels must be greater than zero"));
        }
        Ok(())
    }
}

/// Parse a comma-separated list of concurrency levels, e.g. `"1,2,4,8"`
pub fn parse_concurrency_levels(s: &str) -> Result<Vec<usize>> {
    let levels = s
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| -> Result<usize> {
            let level: usize = part
                .parse()
                .with_context(|| format!("invalid concurrency level: '{}'", part))?;
            if level == 0 {
                return Err(anyhow!("concurrency level must be greater than zero"));
            }
            Ok(level)
        })
        .collect::<Result<Vec<_>>>()?;

    if levels.is_empty() {
        return Err(anyhow!("no concurrency levels given"));
    }
    Ok(levels)
}

/// Substitute `${VAR}` references in a scenario value from the environment
///
/// Keeps API keys and hosts out of checked-in scenario files. Every unset variable is
/// reported in a single error.
fn expand_env_vars(s: &str) -> Result<String> {
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")?;
    let mut missing: Vec<String> = Vec::new();

    let expanded = re.replace_all(s, |caps: &regex::Captures| {
        let name = &caps[1];
        std::env::var(name).unwrap_or_else(|_| {
            if !missing.iter().any(|m| m == name) {
                missing.push(name.to_string());
            }
            String::new()
        })
    });

    if !missing.is_empty() {
        return Err(anyhow!(
            "Missing required environment variables: {}",
            missing.join(", ")
        ));
    }
    Ok(expanded.into_owned())
}

/// Expand environment variables in the fields that usually carry secrets or hosts
pub fn expand_config_env_vars(mut config: BenchmarkConfig) -> Result<BenchmarkConfig> {
    config.base_url = expand_env_vars(&config.base_url)?;
    config.api_key = expand_env_vars(&config.api_key)?;
    if let Some(model) = &config.model {
        config.model = Some(expand_env_vars(model)?);
    }
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<BenchmarkConfig> {
    let config: BenchmarkConfig =
        serde_yaml::from_str(content).context("Failed to parse benchmark config")?;
    let config = expand_config_env_vars(config)?;
    config.validate()?;
    Ok(config)
}

/// Load a benchmark config from a YAML file
pub fn load_config_from_file(path: &str) -> Result<BenchmarkConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path))?;
    parse_config(&content).with_context(|| format!("Invalid config file: {}", path))
}
