//! OpenAI-compatible API client: streaming runner and auxiliary probes

use crate::dispatch::StreamRunner;
use crate::error::BenchError;
use crate::progress::ProgressSink;
use crate::tokens::estimate_tokens;
use crate::{MeasurementConfig, Sample, TokenCount};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder};
use reqwest_eventsource::{Error as EventSourceError, Event, EventSource};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Marker data frame that ends an OpenAI stream
const DONE_MARKER: &str = "[DONE]";

/// `max_tokens` used by the non-streaming prompt-token probe
const PROBE_MAX_TOKENS: u32 = 4;

pub fn build_http_client(concurrency: usize) -> Result<Client, BenchError> {
    Client::builder()
        .pool_max_idle_per_host(concurrency.max(1) * 2)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_nodelay(true)
        .tcp_keepalive(Duration::from_secs(60))
        .build()
        .map_err(|e| BenchError::Transport(format!("failed to build HTTP client: {}", e)))
}

// ============================================================================
// Wire Types
// ============================================================================

/// Chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Message {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    // Older servers only understand `max_tokens`
    max_tokens: u32,
    max_completion_tokens: u32,
    temperature: f32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

impl ChatCompletionRequest {
    fn new(model: &str, prompt: &str, max_tokens: u32, temperature: f32, stream: bool) -> Self {
        ChatCompletionRequest {
            model: model.to_string(),
            messages: vec![Message::user(prompt)],
            max_tokens,
            max_completion_tokens: max_tokens,
            temperature,
            stream,
            stream_options: stream.then_some(StreamOptions {
                include_usage: true,
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<Usage>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

fn upstream_message(error: &serde_json::Value) -> String {
    error
        .get("message")
        .and_then(|m| m.as_str())
        .map(|m| m.to_string())
        .unwrap_or_else(|| match error.as_str() {
            Some(s) => s.to_string(),
            None => error.to_string(),
        })
}

pub(crate) fn authorized(builder: RequestBuilder, api_key: &str) -> RequestBuilder {
    if api_key.is_empty() {
        builder
    } else {
        builder.header("Authorization", format!("Bearer {}", api_key))
    }
}

pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path)
}

// ============================================================================
// Stream Tracking
// ============================================================================

/// Per-request bookkeeping while a completion stream is consumed
#[derive(Debug)]
pub struct StreamTracker {
    start: Instant,
    ttft_secs: Option<f64>,
    estimated_tokens: u64,
    usage: Option<Usage>,
    chunks: u64,
}

impl StreamTracker {
    pub fn new(start: Instant) -> Self {
        StreamTracker {
            start,
            ttft_secs: None,
            estimated_tokens: 0,
            usage: None,
            chunks: 0,
        }
    }

    /// Feed one content delta received at `at`
    pub fn on_content(&mut self, content: &str, at: Instant, progress: Option<&dyn ProgressSink>) {
        if content.is_empty() {
            return;
        }

        if self.ttft_secs.is_none() && !content.trim().is_empty() {
            self.ttft_secs = Some(at.duration_since(self.start).as_secs_f64());
        }

        let tokens = estimate_tokens(content);
        self.estimated_tokens += tokens;
        if let Some(sink) = progress {
            if tokens > 0 {
                sink.add_tokens(tokens as i64);
            }
        }
    }

    /// Record the server's usage summary; the latest one wins
    pub fn on_usage(&mut self, prompt_tokens: u64, completion_tokens: u64) {
        self.usage = Some(Usage {
            prompt_tokens,
            completion_tokens,
        });
    }

    /// Handle one SSE data frame. Returns `true` once the stream-end marker is seen.
    pub fn on_event_data(
        &mut self,
        data: &str,
        at: Instant,
        progress: Option<&dyn ProgressSink>,
    ) -> Result<bool, BenchError> {
        let data = data.trim();
        if data == DONE_MARKER {
            return Ok(true);
        }
        if data.is_empty() {
            return Ok(false);
        }

        let chunk: ChatCompletionChunk = serde_json::from_str(data).map_err(|e| {
            BenchError::Protocol(format!("malformed stream chunk ({}): {}", e, data))
        })?;
        self.chunks += 1;

        if let Some(error) = &chunk.error {
            return Err(BenchError::Upstream {
                status: None,
                message: upstream_message(error),
            });
        }

        if let Some(content) = chunk
            .choices
            .first()
            .and_then(|c| c.delta.as_ref())
            .and_then(|d| d.content.as_deref())
        {
            self.on_content(content, at, progress);
        }

        if let Some(usage) = chunk.usage {
            debug!(
                "Got usage stats: prompt={}, completion={}",
                usage.prompt_tokens, usage.completion_tokens
            );
            self.on_usage(usage.prompt_tokens, usage.completion_tokens);
        }

        Ok(false)
    }

    pub fn ttft_secs(&self) -> Option<f64> {
        self.ttft_secs
    }

    pub fn estimated_tokens(&self) -> u64 {
        self.estimated_tokens
    }

    /// Resolve the final sample, correcting live progress if usage overrides the estimate
    pub fn finish(self, fallback_prompt_tokens: u64, progress: Option<&dyn ProgressSink>) -> Sample {
        let (completion_tokens, prompt_tokens) = match self.usage {
            Some(usage) => {
                if let Some(sink) = progress {
                    let delta = usage.completion_tokens as i64 - self.estimated_tokens as i64;
                    if delta != 0 {
                        sink.add_tokens(delta);
                    }
                }
                (
                    TokenCount::Authoritative(usage.completion_tokens),
                    usage.prompt_tokens,
                )
            }
            None => (
                TokenCount::Estimated(self.estimated_tokens),
                fallback_prompt_tokens,
            ),
        };

        debug!(
            "Stream finished: {} chunks, ttft={:?}, completion={:?}",
            self.chunks, self.ttft_secs, completion_tokens
        );

        Sample {
            ttft_secs: self.ttft_secs,
            completion_tokens,
            prompt_tokens,
        }
    }
}

// ============================================================================
// Requests
// ============================================================================

async fn classify_stream_error(err: EventSourceError) -> BenchError {
    match err {
        EventSourceError::Transport(e) => BenchError::from_reqwest(e),
        EventSourceError::InvalidStatusCode(status, response) => {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| v.get("error").map(upstream_message))
                .unwrap_or(body);
            BenchError::Upstream {
                status: Some(status.as_u16()),
                message,
            }
        }
        EventSourceError::InvalidContentType(content_type, _) => BenchError::Protocol(format!(
            "unexpected content type {:?}, expected text/event-stream",
            content_type
        )),
        other => BenchError::Protocol(other.to_string()),
    }
}

/// Drive one streaming chat completion to exhaustion
pub async fn run_streaming_request(
    client: &Client,
    config: &MeasurementConfig,
    prompt: &str,
    progress: Option<&dyn ProgressSink>,
) -> Result<Sample, BenchError> {
    let url = endpoint(&config.base_url, "chat/completions");
    let request = ChatCompletionRequest::new(
        &config.model,
        prompt,
        config.max_tokens,
        config.temperature,
        true,
    );

    let req_builder = authorized(
        client
            .post(&url)
            .header("Content-Type", "application/json")
            .timeout(config.timeout),
        &config.api_key,
    )
    .json(&request);

    let start = Instant::now();
    let mut es = EventSource::new(req_builder)
        .map_err(|e| BenchError::Transport(format!("cannot open event stream: {:?}", e)))?;
    let mut tracker = StreamTracker::new(start);

    let outcome = loop {
        let Some(event) = es.next().await else {
            break Ok(());
        };
        match event {
            Ok(Event::Open) => {
                debug!("SSE connection opened");
            }
            Ok(Event::Message(msg)) => match tracker.on_event_data(&msg.data, Instant::now(), progress) {
                Ok(true) => break Ok(()),
                Ok(false) => {}
                Err(e) => break Err(e),
            },
            Err(EventSourceError::StreamEnded) => break Ok(()),
            Err(e) => break Err(classify_stream_error(e).await),
        }
    };
    es.close();
    outcome?;

    let sample = tracker.finish(config.fallback_prompt_tokens, progress);
    if !sample.completion_tokens.is_authoritative() {
        warn!(
            "No usage stats received from API for model '{}'. \
             Completion tokens ({}) are estimated from streamed text. \
             Ensure the API supports 'stream_options.include_usage'.",
            config.model,
            sample.completion_tokens.value()
        );
    }
    Ok(sample)
}

/// Runs requests over HTTP with a shared client and an optional progress sink
#[derive(Clone)]
pub struct HttpRunner {
    client: Client,
    progress: Option<Arc<dyn ProgressSink>>,
}

impl HttpRunner {
    pub fn new(client: Client) -> Self {
        HttpRunner {
            client,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(progress);
        self
    }
}

#[async_trait]
impl StreamRunner for HttpRunner {
    async fn run(&self, worker: usize, config: &MeasurementConfig) -> Result<Sample, BenchError> {
        let prompt = config.prompt.render();
        debug!("Worker {} sending {} prompt chars", worker, prompt.len());
        run_streaming_request(&self.client, config, &prompt, self.progress.as_deref()).await
    }
}

// ============================================================================
// Probes
// ============================================================================

/// First model listed by `GET {base_url}/models`
pub async fn discover_model(
    client: &Client,
    base_url: &str,
    api_key: &str,
) -> Result<String, BenchError> {
    let url = endpoint(base_url, "models");
    let response = authorized(client.get(&url), api_key)
        .send()
        .await
        .map_err(BenchError::from_reqwest)?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(BenchError::Upstream {
            status: Some(status.as_u16()),
            message: body,
        });
    }

    let models: ModelList = response.json().await.map_err(BenchError::from_reqwest)?;
    models
        .data
        .into_iter()
        .next()
        .map(|m| m.id)
        .ok_or_else(|| BenchError::Upstream {
            status: Some(status.as_u16()),
            message: "no models available".to_string(),
        })
}

/// Prompt-token count for `prompt`, from a short non-streaming completion
pub async fn probe_prompt_tokens(
    client: &Client,
    base_url: &str,
    api_key: &str,
    model: &str,
    prompt: &str,
    timeout: Duration,
) -> Result<u64, BenchError> {
    let url = endpoint(base_url, "chat/completions");
    let request = ChatCompletionRequest::new(model, prompt, PROBE_MAX_TOKENS, 1.0, false);

    let response = authorized(client.post(&url).timeout(timeout), api_key)
        .json(&request)
        .send()
        .await
        .map_err(BenchError::from_reqwest)?;

    let status = response.status();
    let body = response.text().await.map_err(BenchError::from_reqwest)?;
    if !status.is_success() {
        return Err(BenchError::Upstream {
            status: Some(status.as_u16()),
            message: body,
        });
    }

    let parsed: ChatCompletionResponse = serde_json::from_str(&body)
        .map_err(|e| BenchError::Protocol(format!("invalid completion response: {}", e)))?;
    parsed
        .usage
        .map(|u| u.prompt_tokens)
        .ok_or_else(|| BenchError::Protocol("completion response carries no usage".to_string()))
}
