//! Benchmark session: setup, calibration and one measurement round per concurrency level

use crate::client::{build_http_client, discover_model, probe_prompt_tokens, HttpRunner};
use crate::config::BenchmarkConfig;
use crate::dispatch::dispatch;
use crate::error::BenchError;
use crate::latency::measure_latency;
use crate::metrics::aggregate;
use crate::progress::ProgressSink;
use crate::{
    BenchmarkReport, FailurePolicy, LatencyPolicy, LevelFailure, MeasurementConfig,
    StatisticsRecord,
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// Hooks for the presentation layer; every method defaults to doing nothing
pub trait SessionObserver {
    /// Called once calibration and setup are done, before the first level
    fn on_session_start(&mut self, _model: &str, _input_tokens: u64, _max_tokens: u32, _latency_ms: f64) {}

    /// Called before a level is dispatched; the returned sink receives token deltas
    fn on_level_start(&mut self, _concurrency: usize, _max_tokens: u32) -> Option<Arc<dyn ProgressSink>> {
        None
    }

    fn on_level_complete(&mut self, _record: &StatisticsRecord) {}

    fn on_level_failed(&mut self, _failure: &LevelFailure) {}
}

impl SessionObserver for () {}

fn level_causes(err: &BenchError) -> Vec<String> {
    match err {
        BenchError::LevelFailed { failures, .. } => {
            failures.iter().map(|f| f.to_string()).collect()
        }
        other => vec![other.to_string()],
    }
}

/// Run a complete benchmark session
pub async fn run_benchmark(
    config: &BenchmarkConfig,
    observer: &mut dyn SessionObserver,
) -> Result<BenchmarkReport> {
    config.validate()?;

    let peak_concurrency = config.concurrency.iter().copied().max().unwrap_or(1);
    let client = build_http_client(peak_concurrency)?;

    let model = match &config.model {
        Some(model) if !model.is_empty() => model.clone(),
        _ => {
            let model = discover_model(&client, &config.base_url, &config.api_key)
                .await
                .context("Failed to discover model")?;
            info!("Discovered model: {}", model);
            model
        }
    };

    let prompt_source = config.prompt_source();
    let input_tokens = probe_prompt_tokens(
        &client,
        &config.base_url,
        &config.api_key,
        &model,
        &prompt_source.render(),
        config.timeout(),
    )
    .await
    .context("Error getting prompt tokens")?;
    info!("Prompt tokens per request: {}", input_tokens);

    let latency = match measure_latency(
        &client,
        &config.base_url,
        &config.api_key,
        config.latency_rounds,
        config.timeout(),
    )
    .await
    {
        Ok(latency) => latency,
        Err(e) => match config.latency_policy {
            LatencyPolicy::Abort => return Err(e).context("Latency test failed"),
            LatencyPolicy::AssumeZero => {
                warn!("{}; continuing with zero latency baseline", e);
                0.0
            }
        },
    };

    observer.on_session_start(&model, input_tokens, config.max_tokens, latency);

    let mut results = Vec::with_capacity(config.concurrency.len());
    let mut failures = Vec::new();

    for (index, &concurrency) in config.concurrency.iter().enumerate() {
        let measurement = MeasurementConfig::try_new(
            config.base_url.clone(),
            config.api_key.clone(),
            model.clone(),
            prompt_source.clone(),
            config.max_tokens,
            concurrency,
        )?
        .with_latency_ms(latency)
        .with_fallback_prompt_tokens(input_tokens)
        .with_temperature(config.temperature)
        .with_timeout(config.timeout());

        let mut runner = HttpRunner::new(client.clone());
        if let Some(sink) = observer.on_level_start(concurrency, config.max_tokens) {
            runner = runner.with_progress(sink);
        }

        match dispatch(Arc::new(runner), Arc::new(measurement)).await {
            Ok(batch) => {
                let record = aggregate(concurrency, latency, batch.duration, &batch.samples);
                info!(
                    "Concurrency {}: {:.2} tok/s generation, {:.2} tok/s prompt",
                    concurrency, record.generation_throughput, record.prompt_throughput
                );
                observer.on_level_complete(&record);
                results.push(record);
            }
            Err(e) => {
                let failure = LevelFailure {
                    index,
                    concurrency,
                    causes: level_causes(&e),
                };
                observer.on_level_failed(&failure);
                match config.failure_policy {
                    FailurePolicy::Abort => {
                        return Err(e).with_context(|| format!("concurrency {}", concurrency));
                    }
                    FailurePolicy::Continue => {
                        warn!("Skipping failed concurrency level {}: {}", concurrency, e);
                        failures.push(failure);
                    }
                }
            }
        }
    }

    Ok(BenchmarkReport {
        model_name: model,
        input_tokens,
        max_tokens: config.max_tokens,
        latency,
        results,
        failures,
    })
}
