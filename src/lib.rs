//! LLM API Benchmark - throughput and TTFT probe for OpenAI-compatible streaming APIs

pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod latency;
pub mod metrics;
pub mod progress;
pub mod prompt;
pub mod report;
pub mod session;
pub mod tokens;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use client::{
    build_http_client, discover_model, probe_prompt_tokens, run_streaming_request, HttpRunner,
    StreamTracker,
};
pub use config::{load_config_from_file, parse_concurrency_levels, BenchmarkConfig};
pub use dispatch::{dispatch, Batch, StreamRunner};
pub use error::{BenchError, RunnerFailure};
pub use latency::{measure_latency, mean_latency_ms, DEFAULT_LATENCY_ROUNDS};
pub use metrics::aggregate;
pub use progress::{level_progress_bar, ProgressSink};
pub use prompt::{PromptSource, DEFAULT_PROMPT};
pub use report::{
    generate_output_filename, print_level_row, print_report_header, render_markdown,
    save_markdown_report, to_json, to_yaml, ConsoleObserver,
};
pub use session::{run_benchmark, SessionObserver};
pub use tokens::estimate_tokens;

// ============================================================================
// Measurement Types
// ============================================================================

/// Everything one dispatch round needs; shared read-only by all of its runners
#[derive(Debug, Clone)]
pub struct MeasurementConfig {
    /// Base URL of the OpenAI-compatible API (including any `/v1` prefix)
    pub base_url: String,
    /// API key; empty means no Authorization header
    pub api_key: String,
    pub model: String,
    pub prompt: PromptSource,
    pub max_tokens: u32,
    pub concurrency: usize,
    /// Calibrated network round trip in milliseconds
    pub latency_ms: f64,
    /// Prompt tokens to report when the stream carries no usage record
    pub fallback_prompt_tokens: u64,
    pub temperature: f32,
    /// Deadline for a single streaming request
    pub timeout: Duration,
}

impl MeasurementConfig {
    pub fn try_new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        prompt: PromptSource,
        max_tokens: u32,
        concurrency: usize,
    ) -> Result<Self, BenchError> {
        if concurrency == 0 {
            return Err(BenchError::InvalidConfig(
                "concurrency must be greater than zero".to_string(),
            ));
        }
        if max_tokens == 0 {
            return Err(BenchError::InvalidConfig(
                "max_tokens must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            prompt,
            max_tokens,
            concurrency,
            latency_ms: 0.0,
            fallback_prompt_tokens: 0,
            temperature: 1.0,
            timeout: Duration::from_secs(300),
        })
    }

    pub fn with_latency_ms(mut self, latency_ms: f64) -> Self {
        self.latency_ms = latency_ms.max(0.0);
        self
    }

    pub fn with_fallback_prompt_tokens(mut self, tokens: u64) -> Self {
        self.fallback_prompt_tokens = tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.timeout = timeout;
        }
        self
    }
}

/// Completion-token count, tagged by where it came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenCount {
    /// Sum of per-chunk heuristic estimates
    Estimated(u64),
    /// Reported by the server's usage record
    Authoritative(u64),
}

impl TokenCount {
    pub fn value(&self) -> u64 {
        match self {
            TokenCount::Estimated(n) | TokenCount::Authoritative(n) => *n,
        }
    }

    pub fn is_authoritative(&self) -> bool {
        matches!(self, TokenCount::Authoritative(_))
    }
}

/// Outcome of one successful streaming request
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Seconds until the first non-empty content chunk; `None` if none arrived
    pub ttft_secs: Option<f64>,
    pub completion_tokens: TokenCount,
    pub prompt_tokens: u64,
}

// ============================================================================
// Results
// ============================================================================

/// Statistics for one concurrency level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsRecord {
    pub concurrency: usize,
    pub sample_count: usize,
    /// Completion tokens per second, latency corrected
    pub generation_throughput: f64,
    /// Prompt tokens per second, using the slowest TTFT as processing time
    pub prompt_throughput: f64,
    pub min_ttft: f64,
    pub max_ttft: f64,
}

/// A concurrency level that produced no statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelFailure {
    /// Position of the level in the requested list
    pub index: usize,
    pub concurrency: usize,
    pub causes: Vec<String>,
}

/// Full session output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub model_name: String,
    pub input_tokens: u64,
    pub max_tokens: u32,
    /// Calibrated latency in milliseconds
    pub latency: f64,
    pub results: Vec<StatisticsRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<LevelFailure>,
}

// ============================================================================
// Policies
// ============================================================================

/// What to do when every latency probe fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyPolicy {
    /// Abort the session before any level runs
    #[default]
    Abort,
    /// Continue with a zero baseline (throughput is then not latency corrected)
    AssumeZero,
}

/// What to do when a concurrency level fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop the session and return the level's error
    #[default]
    Abort,
    /// Record the failure in the report and move on to the next level
    Continue,
}

// ============================================================================
// Statistics
// ============================================================================

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Round to two decimal places for reporting
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
