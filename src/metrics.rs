//! Reduction of a level's samples into throughput and TTFT statistics

use crate::{round2, Sample, StatisticsRecord};
use std::time::Duration;
use tracing::warn;

/// Aggregate the samples of one concurrency level
///
/// Throughput denominators are corrected by the calibrated latency. When the corrected
/// denominator is not positive the uncorrected one is used; if that is not positive
/// either, the throughput is reported as 0.
pub fn aggregate(
    concurrency: usize,
    latency_ms: f64,
    duration: Duration,
    samples: &[Sample],
) -> StatisticsRecord {
    let latency_secs = latency_ms.max(0.0) / 1000.0;

    let total_completion_tokens: u64 = samples.iter().map(|s| s.completion_tokens.value()).sum();
    let total_prompt_tokens: u64 = samples.iter().map(|s| s.prompt_tokens).sum();

    let ttfts: Vec<f64> = samples.iter().filter_map(|s| s.ttft_secs).collect();
    let (min_ttft, max_ttft) = if ttfts.is_empty() {
        (0.0, 0.0)
    } else {
        ttfts
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &t| {
                (lo.min(t), hi.max(t))
            })
    };

    let generation_throughput = corrected_rate(
        "generation",
        total_completion_tokens,
        duration.as_secs_f64(),
        latency_secs,
    );
    let prompt_throughput = corrected_rate("prompt", total_prompt_tokens, max_ttft, latency_secs);

    StatisticsRecord {
        concurrency,
        sample_count: samples.len(),
        generation_throughput: round2(generation_throughput),
        prompt_throughput: round2(prompt_throughput),
        min_ttft: round2(min_ttft),
        max_ttft: round2(max_ttft),
    }
}

fn corrected_rate(label: &str, tokens: u64, elapsed_secs: f64, latency_secs: f64) -> f64 {
    let corrected = elapsed_secs - latency_secs;
    let denominator = if corrected > 0.0 {
        corrected
    } else {
        if latency_secs > 0.0 {
            warn!(
                "Calibrated latency ({:.3}s) is not below the measured {} time ({:.3}s); \
                 reporting {} throughput without latency correction",
                latency_secs, label, elapsed_secs, label
            );
        }
        elapsed_secs
    };

    if denominator > 0.0 && denominator.is_finite() {
        tokens as f64 / denominator
    } else {
        0.0
    }
}
