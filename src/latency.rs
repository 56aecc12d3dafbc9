//! Baseline network latency calibration

use crate::client::{authorized, endpoint};
use crate::error::BenchError;
use crate::mean;
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const DEFAULT_LATENCY_ROUNDS: usize = 5;

/// Measure the mean round trip to `{base_url}/models` over `rounds` independent probes
///
/// Any HTTP response counts as a completed round trip, whatever its status. Probes that
/// fail at the transport level are left out of the mean.
pub async fn measure_latency(
    client: &Client,
    base_url: &str,
    api_key: &str,
    rounds: usize,
    timeout: Duration,
) -> Result<f64, BenchError> {
    let url = endpoint(base_url, "models");
    info!("Measuring latency to {} over {} rounds", url, rounds);

    let mut outcomes = Vec::with_capacity(rounds);
    for round in 0..rounds {
        let req = authorized(client.get(&url).timeout(timeout), api_key);

        let start = Instant::now();
        let outcome = match req.send().await {
            Ok(response) => {
                let elapsed = start.elapsed();
                debug!(
                    "Latency probe {}: {:?} (HTTP {})",
                    round,
                    elapsed,
                    response.status()
                );
                Ok(elapsed)
            }
            Err(e) => {
                warn!("Latency probe {} failed: {}", round, e);
                Err(BenchError::from_reqwest(e))
            }
        };
        outcomes.push(outcome);
    }

    let latency = mean_latency_ms(outcomes)?;
    info!("Calibrated latency: {:.2} ms", latency);
    Ok(latency)
}

/// Reduce probe outcomes to a mean in milliseconds, ignoring failed probes
pub fn mean_latency_ms<I>(outcomes: I) -> Result<f64, BenchError>
where
    I: IntoIterator<Item = Result<Duration, BenchError>>,
{
    let mut attempts = 0;
    let mut last_error = None;
    let mut millis = Vec::new();

    for outcome in outcomes {
        attempts += 1;
        match outcome {
            Ok(elapsed) => millis.push(elapsed.as_secs_f64() * 1000.0),
            Err(e) => last_error = Some(e),
        }
    }

    if millis.is_empty() {
        return Err(BenchError::LatencyUnavailable {
            attempts,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no probes were run".to_string()),
        });
    }

    Ok(mean(&millis))
}
