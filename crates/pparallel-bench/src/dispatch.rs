use crate::{
    AggregateReport, Aggregator, Batch, BatchSource, BenchConfig, BenchError, Connector, Worker,
};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncBufRead;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

/// Dispatcher runs a benchmark: it starts the worker pool, feeds it batches read
/// from a [`BatchSource`], and aggregates the results into a report.
pub struct Dispatcher<C> {
    config: Arc<BenchConfig>,
    connector: Arc<C>,
}

impl<C: Connector> Dispatcher<C> {
    pub fn new(config: Arc<BenchConfig>, connector: Arc<C>) -> Self {
        Self { config, connector }
    }

    /// Runs every record of `source` through the worker pool.
    ///
    /// All workers must have started before any batch is read. If any of them
    /// fails to connect or prepare the query, or exits before starting, the run
    /// is aborted and the sessions of workers which did start are closed.
    #[tracing::instrument(level = "debug", skip_all, fields(workers = self.config.workers))]
    pub async fn run<R>(&self, mut source: BatchSource<R>) -> Result<AggregateReport, BenchError>
    where
        R: AsyncBufRead + Unpin,
    {
        let started = Instant::now();
        let workers = self.config.workers;

        let (batch_tx, batch_rx) = mpsc::channel::<Batch>(workers);
        let batch_rx = Arc::new(Mutex::new(batch_rx));
        let (result_tx, result_rx) = mpsc::channel(workers);

        let mut handles = Vec::with_capacity(workers);
        let mut ready = Vec::with_capacity(workers);

        for id in 0..workers {
            let (ready_tx, ready_rx) = oneshot::channel();
            let config = self.config.clone();
            let connector = self.connector.clone();
            let batch_rx = batch_rx.clone();
            let result_tx = result_tx.clone();

            handles.push(tokio::spawn(async move {
                let worker = match Worker::start(id, config, connector.as_ref()).await {
                    Ok(worker) => worker,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return Ok(());
                    }
                };
                if ready_tx.send(Ok(())).is_err() {
                    return Ok(());
                }
                worker.run(batch_rx, result_tx).await
            }));
            ready.push(ready_rx);
        }
        // Workers hold the only remaining senders, so the result channel
        // closes once all of them have handed off their results.
        std::mem::drop(result_tx);

        let mut startup_failure = None;
        for (id, ready_rx) in ready.into_iter().enumerate() {
            match ready_rx.await {
                Ok(Ok(())) => {}
                Ok(Err(source)) => {
                    startup_failure.get_or_insert(BenchError::WorkerStartup { worker: id, source });
                }
                // The task ended without signalling, which means it panicked.
                Err(_) => {
                    startup_failure.get_or_insert(BenchError::WorkerExited { worker: id });
                }
            }
        }
        if let Some(err) = startup_failure {
            std::mem::drop(batch_tx);
            let _ = join_workers(handles).await;
            return Err(err);
        }
        tracing::debug!(workers, "all workers started");

        // Aggregate concurrently with dispatching, so that workers which complete
        // are never blocked on handing off their results.
        let aggregator = Aggregator::new(AggregateReport::new(
            self.config.destination(),
            self.config.resolved_query(),
        ));
        let aggregation = tokio::spawn(aggregator.drain(result_rx));

        let scanning = Instant::now();
        let scanned = loop {
            let batch = match source.next_batch().await {
                Ok(Some(batch)) => batch,
                Ok(None) => break Ok(()),
                Err(err) => break Err(err),
            };
            if batch_tx.send(batch).await.is_err() {
                tracing::warn!("all workers exited before the input was consumed");
                break Ok(());
            }
        };
        let time_spent_scanning = scanning.elapsed();
        std::mem::drop(batch_tx);

        let joined = join_workers(handles).await;
        let mut report = aggregation.await?;
        scanned?;
        joined?;

        report.rows_read = source.rows_read();
        report.batches_dispatched = source.batches();
        report.workers = workers;
        report.time_spent_scanning = time_spent_scanning;
        report.time_spent_total = started.elapsed();

        tracing::debug!(
            rows_read = report.rows_read,
            batches = report.batches_dispatched,
            queries = report.query_counter,
            "dispatch completed"
        );
        Ok(report)
    }
}

/// Awaits every worker, returning the first failure observed.
async fn join_workers(
    handles: Vec<JoinHandle<Result<(), BenchError>>>,
) -> Result<(), BenchError> {
    let mut first = Ok(());
    for joined in join_all(handles).await {
        let outcome = match joined {
            Ok(result) => result,
            Err(err) => Err(BenchError::WorkerTask(err)),
        };
        if let Err(err) = outcome {
            if first.is_ok() {
                first = Err(err);
            } else {
                tracing::warn!(error = ?err, "additional worker failure");
            }
        }
    }
    first
}
