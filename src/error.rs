//! Error kinds surfaced by the measurement engine

use thiserror::Error;

/// Errors produced while calibrating, streaming or dispatching requests
#[derive(Debug, Error)]
pub enum BenchError {
    /// Connection, DNS, TLS failure or an expired request deadline
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed or unexpected stream framing
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Non-2xx status or an API-level error payload
    #[error("upstream error{}: {message}", status_suffix(.status))]
    Upstream {
        status: Option<u16>,
        message: String,
    },

    #[error("latency unavailable: all {attempts} calibration probes failed (last error: {last_error})")]
    LatencyUnavailable { attempts: usize, last_error: String },

    /// At least one runner of a concurrency level failed
    #[error(
        "concurrency {concurrency}: {} of {concurrency} requests failed: {}",
        .failures.len(),
        join_failures(.failures)
    )]
    LevelFailed {
        concurrency: usize,
        failures: Vec<RunnerFailure>,
    },

    #[error("request task aborted: {0}")]
    TaskAborted(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Cause of one failed runner inside a concurrency level
#[derive(Debug)]
pub struct RunnerFailure {
    pub worker: usize,
    pub error: BenchError,
}

impl std::fmt::Display for RunnerFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "worker {}: {}", self.worker, self.error)
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status
        .map(|code| format!(" (HTTP {})", code))
        .unwrap_or_default()
}

fn join_failures(failures: &[RunnerFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl BenchError {
    /// Map a reqwest failure, keeping deadline expiry recognisable
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BenchError::Transport(format!("request timed out: {}", err))
        } else if let Some(status) = err.status() {
            BenchError::Upstream {
                status: Some(status.as_u16()),
                message: err.to_string(),
            }
        } else if err.is_decode() {
            BenchError::Protocol(err.to_string())
        } else {
            BenchError::Transport(err.to_string())
        }
    }
}
