//! Concurrent dispatch of one concurrency level

use crate::error::{BenchError, RunnerFailure};
use crate::{MeasurementConfig, Sample};
use async_channel::{bounded, Receiver, Sender};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Executes a single request for the dispatcher
#[async_trait]
pub trait StreamRunner: Send + Sync + 'static {
    async fn run(&self, worker: usize, config: &MeasurementConfig) -> Result<Sample, BenchError>;
}

/// Every sample of a fully successful level, ordered by worker id
#[derive(Debug, Clone)]
pub struct Batch {
    pub samples: Vec<Sample>,
    /// Wall-clock time from the first spawn until the last runner finished
    pub duration: Duration,
}

/// Launch `config.concurrency` runners at once and wait for all of them
///
/// Failures do not cancel sibling runners. If any runner fails the whole level fails
/// with every cause listed.
pub async fn dispatch<R: StreamRunner>(
    runner: Arc<R>,
    config: Arc<MeasurementConfig>,
) -> Result<Batch, BenchError> {
    let concurrency = config.concurrency;
    if concurrency == 0 {
        return Err(BenchError::InvalidConfig(
            "concurrency must be greater than zero".to_string(),
        ));
    }

    info!("Dispatching {} concurrent requests", concurrency);

    let (tx, rx): (
        Sender<(usize, Result<Sample, BenchError>)>,
        Receiver<(usize, Result<Sample, BenchError>)>,
    ) = bounded(concurrency);

    let start = Instant::now();
    let mut handles = Vec::with_capacity(concurrency);

    for worker in 0..concurrency {
        let runner = runner.clone();
        let config = config.clone();
        let tx = tx.clone();

        handles.push(tokio::spawn(async move {
            let result = runner.run(worker, &config).await;
            if let Err(e) = &result {
                error!("Request {} failed: {}", worker, e);
            }
            // capacity equals the worker count, so this never waits
            let _ = tx.send((worker, result)).await;
        }));
    }
    drop(tx);

    let mut slots: Vec<Option<Result<Sample, BenchError>>> =
        (0..concurrency).map(|_| None).collect();

    for (worker, handle) in handles.into_iter().enumerate() {
        if let Err(e) = handle.await {
            slots[worker] = Some(Err(BenchError::TaskAborted(e.to_string())));
        }
    }
    let duration = start.elapsed();

    while let Ok((worker, result)) = rx.recv().await {
        slots[worker] = Some(result);
    }

    let mut samples = Vec::with_capacity(concurrency);
    let mut failures = Vec::new();
    for (worker, slot) in slots.into_iter().enumerate() {
        match slot {
            Some(Ok(sample)) => samples.push(sample),
            Some(Err(error)) => failures.push(RunnerFailure { worker, error }),
            None => failures.push(RunnerFailure {
                worker,
                error: BenchError::TaskAborted("runner produced no result".to_string()),
            }),
        }
    }

    if !failures.is_empty() {
        return Err(BenchError::LevelFailed {
            concurrency,
            failures,
        });
    }

    debug!(
        "Concurrency {} finished in {:.3}s",
        concurrency,
        duration.as_secs_f64()
    );

    Ok(Batch { samples, duration })
}
