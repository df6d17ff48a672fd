use crate::{Outcome, RowMap, WorkerAccumulation};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// All rows returned for a single identificator, merged across workers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeyedResults {
    pub identificator: String,
    pub results: Vec<RowMap>,
    /// Number of executions merged into this entry.
    pub executions: u64,
    #[serde(with = "humantime_serde")]
    pub execution_time: Duration,
    #[serde(with = "humantime_serde")]
    pub retrieval_time: Duration,
}

/// AggregateReport is the merged result of a complete run.
///
/// It's mutated only by the single [`Aggregator`] which drains worker results,
/// and by the dispatcher which records timings once the run completes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AggregateReport {
    /// Quoted, schema-qualified destination table.
    pub table_name: String,
    /// The query which was executed.
    pub query_cmd: String,
    pub results: BTreeMap<String, KeyedResults>,
    /// Unset until the first outcome is merged.
    #[serde(with = "humantime_serde")]
    pub minimum_query_time: Option<Duration>,
    /// Execution time of every merged outcome, in milliseconds, in merge order.
    pub query_times: Vec<f64>,
    /// Unset until the first outcome is merged.
    #[serde(with = "humantime_serde")]
    pub maximum_query_time: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub total_query_time: Duration,
    pub query_counter: u64,
    pub result_counter: u64,
    pub rows_read: u64,
    pub batches_dispatched: u64,
    pub workers: usize,
    #[serde(with = "humantime_serde")]
    pub time_spent_scanning: Duration,
    /// Time spent merging worker results.
    #[serde(with = "humantime_serde")]
    pub time_spent_reading: Duration,
    #[serde(with = "humantime_serde")]
    pub time_spent_total: Duration,
}

impl AggregateReport {
    pub fn new(table_name: impl Into<String>, query_cmd: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            query_cmd: query_cmd.into(),
            results: BTreeMap::new(),
            minimum_query_time: None,
            query_times: Vec::new(),
            maximum_query_time: None,
            total_query_time: Duration::ZERO,
            query_counter: 0,
            result_counter: 0,
            rows_read: 0,
            batches_dispatched: 0,
            workers: 0,
            time_spent_scanning: Duration::ZERO,
            time_spent_reading: Duration::ZERO,
            time_spent_total: Duration::ZERO,
        }
    }

    /// Merges a single outcome into the report.
    pub fn add_outcome(&mut self, outcome: Outcome) {
        let Outcome {
            key,
            rows,
            execution,
            retrieval,
        } = outcome;

        self.minimum_query_time = Some(match self.minimum_query_time {
            Some(min) if min <= execution => min,
            _ => execution,
        });
        self.maximum_query_time = Some(match self.maximum_query_time {
            Some(max) if max >= execution => max,
            _ => execution,
        });

        self.result_counter += rows.len() as u64;
        self.query_counter += 1;
        self.total_query_time += execution;
        self.query_times.push(as_millis(execution));

        let entry = self
            .results
            .entry(key)
            .or_insert_with_key(|key| KeyedResults {
                identificator: key.clone(),
                results: Vec::new(),
                executions: 0,
                execution_time: Duration::ZERO,
                retrieval_time: Duration::ZERO,
            });
        entry.results.extend(rows);
        entry.executions += 1;
        entry.execution_time += execution;
        entry.retrieval_time += retrieval;
    }

    /// Arithmetic mean of `query_times`, or None if nothing was merged.
    pub fn mean_query_time(&self) -> Option<f64> {
        if self.query_times.is_empty() {
            return None;
        }
        Some(self.query_times.iter().sum::<f64>() / self.query_times.len() as f64)
    }

    /// Median of `query_times`, or None if nothing was merged.
    ///
    /// With `m = len / 2` over the sorted values, the two values at `m - 1` and `m`
    /// are averaged when `m` is even, and the value at `m` is used otherwise.
    /// A single value is its own median.
    pub fn median_query_time(&self) -> Option<f64> {
        let mut sorted = self.query_times.clone();
        sorted.sort_by(f64::total_cmp);

        let middle = sorted.len() / 2;
        match sorted.len() {
            0 => None,
            1 => Some(sorted[0]),
            _ if middle % 2 == 0 => Some((sorted[middle - 1] + sorted[middle]) / 2.0),
            _ => Some(sorted[middle]),
        }
    }
}

/// Aggregator drains worker results into an AggregateReport.
pub struct Aggregator {
    report: AggregateReport,
}

impl Aggregator {
    pub fn new(report: AggregateReport) -> Self {
        Self { report }
    }

    /// Merges every outcome of an accumulation, in order.
    pub fn merge(&mut self, accumulation: WorkerAccumulation) {
        tracing::debug!(
            worker = accumulation.worker,
            outcomes = accumulation.outcomes.len(),
            "merging worker results"
        );
        for outcome in accumulation.outcomes {
            self.report.add_outcome(outcome);
        }
    }

    /// Receives accumulations until `results` is closed, and returns the merged
    /// report. Accumulations are merged in the order they arrive.
    ///
    /// `time_spent_reading` is the time spent merging received accumulations,
    /// and excludes time spent waiting on workers.
    pub async fn drain(
        mut self,
        mut results: mpsc::Receiver<WorkerAccumulation>,
    ) -> AggregateReport {
        let mut reading = Duration::ZERO;

        while let Some(accumulation) = results.recv().await {
            let started = Instant::now();
            self.merge(accumulation);
            reading += started.elapsed();
        }

        self.report.time_spent_reading = reading;
        self.report
    }
}

fn as_millis(duration: Duration) -> f64 {
    duration.as_nanos() as f64 / 1e6
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn outcome(key: &str, millis: u64, rows: usize) -> Outcome {
        Outcome {
            key: key.to_string(),
            rows: (0..rows)
                .map(|i| RowMap::from([("val".to_string(), format!("{key}-{i}"))]))
                .collect(),
            execution: Duration::from_millis(millis),
            retrieval: Duration::from_millis(1),
        }
    }

    fn report_of(times: &[f64]) -> AggregateReport {
        let mut report = AggregateReport::new("t", "q");
        report.query_times = times.to_vec();
        report
    }

    #[test]
    fn min_and_max_are_unset_until_first_merge() {
        let mut report = AggregateReport::new(r#""public"."cpu_usage""#, "SELECT 1");
        assert_eq!(report.minimum_query_time, None);
        assert_eq!(report.maximum_query_time, None);
        assert_eq!(report.mean_query_time(), None);
        assert_eq!(report.median_query_time(), None);

        report.add_outcome(outcome("a", 7, 0));
        assert_eq!(report.minimum_query_time, Some(Duration::from_millis(7)));
        assert_eq!(report.maximum_query_time, Some(Duration::from_millis(7)));
    }

    #[test]
    fn counters_and_bounds_track_merged_outcomes() {
        let mut report = AggregateReport::new("t", "q");
        for (key, millis, rows) in [("a", 12, 2), ("b", 3, 0), ("a", 40, 1), ("c", 9, 3)] {
            report.add_outcome(outcome(key, millis, rows));
        }

        assert_eq!(report.query_counter, 4);
        assert_eq!(report.result_counter, 6);
        assert_eq!(report.total_query_time, Duration::from_millis(64));
        assert_eq!(report.minimum_query_time, Some(Duration::from_millis(3)));
        assert_eq!(report.maximum_query_time, Some(Duration::from_millis(40)));
        assert_eq!(report.query_times, vec![12.0, 3.0, 40.0, 9.0]);

        let min = report.minimum_query_time.unwrap().as_millis() as f64;
        let max = report.maximum_query_time.unwrap().as_millis() as f64;
        assert!(report.query_times.iter().all(|t| min <= *t && *t <= max));
    }

    #[test]
    fn rows_of_repeated_keys_are_appended() {
        let mut report = AggregateReport::new("t", "q");
        report.add_outcome(outcome("a", 1, 2));
        report.add_outcome(outcome("b", 1, 1));
        report.add_outcome(outcome("a", 2, 1));

        let a = &report.results["a"];
        assert_eq!(a.executions, 2);
        assert_eq!(a.execution_time, Duration::from_millis(3));
        assert_eq!(a.retrieval_time, Duration::from_millis(2));
        assert_eq!(
            a.results
                .iter()
                .map(|row| row["val"].as_str())
                .collect::<Vec<_>>(),
            vec!["a-0", "a-1", "a-0"]
        );
        assert_eq!(report.results["b"].results.len(), 1);
    }

    #[test]
    fn mean_is_independent_of_merge_order() {
        let forward = report_of(&[1.0, 2.0, 3.0, 10.0]);
        let backward = report_of(&[10.0, 3.0, 2.0, 1.0]);
        assert_eq!(forward.mean_query_time(), Some(4.0));
        assert_eq!(backward.mean_query_time(), Some(4.0));
    }

    #[test]
    fn median_follows_middle_index_parity() {
        // len 1: the only value.
        assert_eq!(report_of(&[5.0]).median_query_time(), Some(5.0));
        // len 2: middle 1 is odd, so the upper middle value is used.
        assert_eq!(report_of(&[4.0, 2.0]).median_query_time(), Some(4.0));
        // len 3: middle 1 is odd.
        assert_eq!(report_of(&[9.0, 1.0, 5.0]).median_query_time(), Some(5.0));
        // len 4: middle 2 is even, so values at 1 and 2 are averaged.
        assert_eq!(
            report_of(&[4.0, 1.0, 3.0, 2.0]).median_query_time(),
            Some(2.5)
        );
        // len 5: middle 2 is even, so values at 1 and 2 are averaged as well.
        assert_eq!(
            report_of(&[50.0, 10.0, 40.0, 20.0, 30.0]).median_query_time(),
            Some(25.0)
        );
        // len 6: middle 3 is odd.
        assert_eq!(
            report_of(&[6.0, 5.0, 4.0, 3.0, 2.0, 1.0]).median_query_time(),
            Some(4.0)
        );
    }

    #[test]
    fn median_does_not_reorder_query_times() {
        let report = report_of(&[3.0, 1.0, 2.0]);
        report.median_query_time();
        assert_eq!(report.query_times, vec![3.0, 1.0, 2.0]);
    }

    #[tokio::test]
    async fn drain_merges_all_accumulations() {
        let (tx, rx) = mpsc::channel(2);
        tx.send(WorkerAccumulation {
            worker: 0,
            outcomes: vec![outcome("a", 10, 1), outcome("b", 20, 2)],
        })
        .await
        .unwrap();
        tx.send(WorkerAccumulation {
            worker: 1,
            outcomes: vec![outcome("c", 30, 0)],
        })
        .await
        .unwrap();
        std::mem::drop(tx);

        let report = Aggregator::new(AggregateReport::new("t", "q"))
            .drain(rx)
            .await;

        assert_eq!(report.query_counter, 3);
        assert_eq!(report.result_counter, 3);
        assert_eq!(report.mean_query_time(), Some(20.0));
        assert_eq!(report.query_times, vec![10.0, 20.0, 30.0]);
    }

    #[tokio::test]
    async fn drain_does_not_count_time_waiting_on_workers() {
        let (tx, rx) = mpsc::channel(1);
        let started = Instant::now();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            tx.send(WorkerAccumulation {
                worker: 0,
                outcomes: vec![outcome("a", 1, 1)],
            })
            .await
            .unwrap();
        });

        let report = Aggregator::new(AggregateReport::new("t", "q"))
            .drain(rx)
            .await;
        let waited = started.elapsed();

        assert_eq!(report.query_counter, 1);
        assert!(waited >= Duration::from_millis(100));
        assert!(
            report.time_spent_reading < Duration::from_millis(20),
            "reading took {:?}",
            report.time_spent_reading
        );
    }

    #[test]
    fn report_serialization() {
        let mut report = AggregateReport::new(r#""public"."cpu_usage""#, "SELECT $1::text AS val");
        report.add_outcome(Outcome {
            key: "host_1".to_string(),
            rows: vec![RowMap::from([("val".to_string(), "host_1".to_string())])],
            execution: Duration::from_millis(10),
            retrieval: Duration::from_millis(2),
        });
        report.rows_read = 1;
        report.batches_dispatched = 1;
        report.workers = 1;
        report.time_spent_scanning = Duration::from_millis(1);
        report.time_spent_reading = Duration::from_micros(5);
        report.time_spent_total = Duration::from_millis(15);

        insta::assert_json_snapshot!(report, @r###"
        {
          "TableName": "\"public\".\"cpu_usage\"",
          "QueryCmd": "SELECT $1::text AS val",
          "Results": {
            "host_1": {
              "Identificator": "host_1",
              "Results": [
                {
                  "val": "host_1"
                }
              ],
              "Executions": 1,
              "ExecutionTime": "10ms",
              "RetrievalTime": "2ms"
            }
          },
          "MinimumQueryTime": "10ms",
          "QueryTimes": [
            10.0
          ],
          "MaximumQueryTime": "10ms",
          "TotalQueryTime": "10ms",
          "QueryCounter": 1,
          "ResultCounter": 1,
          "RowsRead": 1,
          "BatchesDispatched": 1,
          "Workers": 1,
          "TimeSpentScanning": "1ms",
          "TimeSpentReading": "5us",
          "TimeSpentTotal": "15ms"
        }
        "###);
    }
}
