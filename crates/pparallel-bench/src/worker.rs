use crate::{
    parse_record, Batch, BenchConfig, BenchError, Connector, ExecuteError, RowMap, Session,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};

/// The result of executing the query of a single record.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub key: String,
    pub rows: Vec<RowMap>,
    pub execution: Duration,
    pub retrieval: Duration,
}

/// All outcomes produced by one worker over its lifetime, in the order its
/// records were read.
#[derive(Debug, Default)]
pub struct WorkerAccumulation {
    pub worker: usize,
    pub outcomes: Vec<Outcome>,
}

/// Worker executes the records of batches it receives against its own,
/// private session.
pub struct Worker<S> {
    id: usize,
    config: Arc<BenchConfig>,
    session: S,
    query: String,
}

impl<S: Session> Worker<S> {
    /// Opens a session for the worker and prepares the query.
    /// Failure of either is fatal to the run. The session is closed if preparation fails.
    pub async fn start<C>(
        id: usize,
        config: Arc<BenchConfig>,
        connector: &C,
    ) -> Result<Self, ExecuteError>
    where
        C: Connector<Session = S>,
    {
        let mut session = connector.connect(id).await?;
        let query = config.resolved_query();

        if let Err(err) = session.prepare(&query).await {
            session.close().await;
            return Err(err);
        }
        tracing::debug!(worker = id, "worker started");

        Ok(Self {
            id,
            config,
            session,
            query,
        })
    }

    /// Runs until the batch channel is closed, then hands its accumulated
    /// outcomes to `results` and closes its session.
    pub async fn run(
        mut self,
        batches: Arc<Mutex<mpsc::Receiver<Batch>>>,
        results: mpsc::Sender<WorkerAccumulation>,
    ) -> Result<(), BenchError> {
        let mut accumulation = WorkerAccumulation {
            worker: self.id,
            outcomes: Vec::new(),
        };
        let mut failed = 0;

        loop {
            let batch = {
                let mut guard = batches.lock().await;
                guard.recv().await
            };
            let Some(batch) = batch else {
                break;
            };
            failed += self.process_batch(&batch, &mut accumulation.outcomes).await;
        }

        tracing::debug!(
            worker = self.id,
            outcomes = accumulation.outcomes.len(),
            failed,
            "worker completed all batches"
        );
        self.session.close().await;

        results
            .send(accumulation)
            .await
            .map_err(|_| BenchError::ResultsClosed { worker: self.id })
    }

    /// Executes every record of `batch` in order, appending successful outcomes.
    /// Returns the number of records which were skipped due to failures.
    async fn process_batch(&mut self, batch: &Batch, outcomes: &mut Vec<Outcome>) -> usize {
        let started = Instant::now();
        let mut failed = 0;

        for line in batch.records() {
            let record = parse_record(line, &self.config.split);

            let execution = match self.session.execute(&record.args).await {
                Ok(execution) => execution,
                Err(err) => {
                    tracing::warn!(
                        worker = self.id,
                        error = ?err,
                        query = %self.query,
                        args = ?record.args,
                        "unable to execute query"
                    );
                    failed += 1;
                    continue;
                }
            };

            for err in &execution.scan_failures {
                tracing::warn!(
                    worker = self.id,
                    error = ?err,
                    args = ?record.args,
                    "unable to scan row"
                );
            }

            outcomes.push(Outcome {
                key: record.key,
                rows: execution.rows,
                execution: execution.execution,
                retrieval: execution.retrieval,
            });
        }

        let took = started.elapsed();
        let rate = batch.len() as f64 / took.as_secs_f64();
        if self.config.verbose {
            tracing::info!(worker = self.id, ?took, batch_size = batch.len(), rate, "batch completed");
        } else {
            tracing::debug!(worker = self.id, ?took, batch_size = batch.len(), rate, "batch completed");
        }

        failed
    }
}
