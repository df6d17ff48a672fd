use std::collections::BTreeMap;
use std::time::Duration;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// One returned row, as a mapping of column name to rendered value.
pub type RowMap = BTreeMap<String, String>;

#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
    #[error("unable to connect to the database")]
    Connect(#[source] BoxError),
    #[error("unable to prepare query {query:?}")]
    Prepare {
        query: String,
        #[source]
        source: BoxError,
    },
    #[error("query was executed before it was prepared")]
    NotPrepared,
    #[error("unable to execute query")]
    Query(#[source] BoxError),
    #[error("unable to scan row {row}")]
    Scan {
        row: usize,
        #[source]
        source: BoxError,
    },
}

/// The result of running a prepared query once.
#[derive(Debug, Default)]
pub struct Execution {
    /// Rows which were scanned successfully.
    pub rows: Vec<RowMap>,
    /// Rows which were returned but could not be scanned.
    pub scan_failures: Vec<ExecuteError>,
    /// Time until the query produced its first row, or completed.
    pub execution: Duration,
    /// Time spent retrieving the remaining rows.
    pub retrieval: Duration,
}

/// Connector opens database sessions. Every worker opens its own session,
/// which is never shared with another worker.
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    type Session: Session + 'static;

    async fn connect(&self, worker: usize) -> Result<Self::Session, ExecuteError>;
}

/// Session is a private connection to the database, used by exactly one worker.
#[async_trait::async_trait]
pub trait Session: Send {
    /// Prepare the query template which subsequent calls to `execute` run.
    async fn prepare(&mut self, query: &str) -> Result<(), ExecuteError>;

    /// Execute the prepared query with positional `args`, one per placeholder.
    async fn execute(&mut self, args: &[String]) -> Result<Execution, ExecuteError>;

    /// Tear down the session.
    async fn close(self);
}
