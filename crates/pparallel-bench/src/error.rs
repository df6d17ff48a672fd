use crate::{ConfigError, ExecuteError, SourceError};
use std::path::PathBuf;

/// Errors which abort a benchmark run. Failures of individual records are not
/// represented here: they are logged and skipped by the worker which observed them.
#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    #[error("invalid configuration")]
    Config(#[from] ConfigError),

    #[error("failed to read input")]
    Source(#[from] SourceError),

    #[error("worker {worker} failed to start")]
    WorkerStartup {
        worker: usize,
        #[source]
        source: ExecuteError,
    },

    #[error("worker {worker} exited before it started")]
    WorkerExited { worker: usize },

    #[error("worker task failed")]
    WorkerTask(#[from] tokio::task::JoinError),

    #[error("worker {worker} could not hand off its results because the result channel closed")]
    ResultsClosed { worker: usize },

    #[error("failed to serialize report")]
    SerializeReport(#[from] serde_json::Error),

    #[error("failed to write report to {path:?}")]
    WriteReport {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
