//! Rendering of a completed [`AggregateReport`] as a console summary and as a
//! JSON document.

use crate::{AggregateReport, BenchError};
use chrono::{DateTime, SecondsFormat, Utc};
use humantime::format_duration;
use std::fmt::Display;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

const RULE: &str = "########################################";
const SECTION: &str = "################";

/// Statistics derived from a completed report.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    /// Mean query time in milliseconds.
    pub mean_ms: Option<f64>,
    /// Median query time in milliseconds.
    pub median_ms: Option<f64>,
    /// Returned rows per executed query.
    pub results_per_query: Option<f64>,
    /// Records read per second of total query time.
    pub row_rate: Option<f64>,
    /// Records which were read but did not produce a counted query.
    pub faulty: i64,
}

impl Summary {
    pub fn derive(report: &AggregateReport) -> Self {
        let results_per_query = if report.query_counter == 0 {
            None
        } else {
            Some(report.result_counter as f64 / report.query_counter as f64)
        };
        let row_rate = if report.total_query_time.is_zero() {
            None
        } else {
            Some(report.rows_read as f64 / report.total_query_time.as_secs_f64())
        };

        Self {
            mean_ms: report.mean_query_time(),
            median_ms: report.median_query_time(),
            results_per_query,
            row_rate,
            faulty: report.rows_read as i64 - report.query_counter as i64,
        }
    }
}

/// Writes the human-readable summary of `report`. Processing statistics and
/// result row counts are included only if `verbose`.
pub fn render<W: Write>(
    report: &AggregateReport,
    summary: &Summary,
    verbose: bool,
    completed_at: DateTime<Utc>,
    w: &mut W,
) -> std::io::Result<()> {
    writeln!(w, "{RULE}")?;
    writeln!(w, "Processing Complete")?;
    writeln!(
        w,
        "{}",
        completed_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    )?;
    writeln!(w, "{SECTION}")?;

    if verbose {
        writeln!(w, "Processingstats:")?;
        writeln!(
            w,
            "Time spent scanning the input: {}",
            format_duration(report.time_spent_scanning)
        )?;
        writeln!(
            w,
            "Time spent reading the responses: {}",
            format_duration(report.time_spent_reading)
        )?;
        writeln!(w, "{SECTION}")?;
    }

    writeln!(w, "Querystats:")?;
    writeln!(w, "MinimumQueryTime: {}", duration_or_na(report.minimum_query_time))?;
    writeln!(w, "MaximumQueryTime: {}", duration_or_na(report.maximum_query_time))?;
    writeln!(w, "TotalQueryTime: {}", format_duration(report.total_query_time))?;
    writeln!(w, "MeanQueryTime: {} ms", or_na(summary.mean_ms))?;
    writeln!(w, "MedianQueryTime: {} ms", or_na(summary.median_ms))?;
    writeln!(w, "Queries: {}", report.query_counter)?;

    if verbose {
        writeln!(w, "Result Rows received: {}", report.result_counter)?;
        writeln!(
            w,
            "Avg results per query: {}",
            or_na(summary.results_per_query)
        )?;
    }
    writeln!(w, "{RULE}")?;

    let rate = match summary.row_rate {
        Some(rate) => format!("{rate:.6}"),
        None => "n/a".to_string(),
    };
    writeln!(
        w,
        "Querying {} entries, took {} with {} worker(s) (mean rate {rate}/sec)",
        report.rows_read,
        format_duration(report.time_spent_total),
        report.workers,
    )?;

    Ok(())
}

/// Emits a warning if fewer queries were counted than records were read.
pub fn warn_on_faulty(summary: &Summary) {
    if summary.faulty != 0 {
        tracing::warn!(
            faulty_queries = summary.faulty,
            "more input was found than queries were executed, consult the log for errors"
        );
    }
}

/// Writes `report` as pretty-printed JSON to `path`, replacing any existing file.
pub fn write_json(report: &AggregateReport, path: &Path) -> Result<(), BenchError> {
    let map_io = |source| BenchError::WriteReport {
        path: path.to_owned(),
        source,
    };

    let file = std::fs::File::create(path).map_err(map_io)?;
    let mut w = std::io::BufWriter::new(file);

    serde_json::to_writer_pretty(&mut w, report)?;
    w.flush().map_err(map_io)?;

    tracing::info!(path = %path.display(), "wrote report");
    Ok(())
}

fn duration_or_na(duration: Option<Duration>) -> String {
    match duration {
        Some(duration) => format_duration(duration).to_string(),
        None => "n/a".to_string(),
    }
}

fn or_na<T: Display>(value: Option<T>) -> String {
    match value {
        Some(value) => value.to_string(),
        None => "n/a".to_string(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{Outcome, RowMap};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn fixture() -> AggregateReport {
        let mut report = AggregateReport::new(r#""public"."cpu_usage""#, "SELECT $1::text");
        for (key, millis, rows) in [("a", 10, 1), ("b", 20, 0), ("c", 30, 2), ("d", 40, 1)] {
            report.add_outcome(Outcome {
                key: key.to_string(),
                rows: vec![RowMap::from([("val".to_string(), key.to_string())]); rows],
                execution: Duration::from_millis(millis),
                retrieval: Duration::ZERO,
            });
        }
        report.rows_read = 5;
        report.batches_dispatched = 3;
        report.workers = 2;
        report.time_spent_scanning = Duration::from_millis(3);
        report.time_spent_reading = Duration::from_millis(1);
        report.time_spent_total = Duration::from_millis(120);
        report
    }

    fn completed_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap()
    }

    #[test]
    fn summary_is_derived_from_report() {
        let summary = Summary::derive(&fixture());
        assert_eq!(
            summary,
            Summary {
                mean_ms: Some(25.0),
                median_ms: Some(25.0),
                results_per_query: Some(1.0),
                row_rate: Some(50.0),
                faulty: 1,
            }
        );

        let empty = Summary::derive(&AggregateReport::new("t", "q"));
        assert_eq!(
            empty,
            Summary {
                mean_ms: None,
                median_ms: None,
                results_per_query: None,
                row_rate: None,
                faulty: 0,
            }
        );
    }

    #[test]
    fn verbose_console_summary() {
        let report = fixture();
        let mut out = Vec::new();
        render(&report, &Summary::derive(&report), true, completed_at(), &mut out).unwrap();

        insta::assert_snapshot!(String::from_utf8(out).unwrap(), @r###"
        ########################################
        Processing Complete
        2026-01-02T03:04:05Z
        ################
        Processingstats:
        Time spent scanning the input: 3ms
        Time spent reading the responses: 1ms
        ################
        Querystats:
        MinimumQueryTime: 10ms
        MaximumQueryTime: 40ms
        TotalQueryTime: 100ms
        MeanQueryTime: 25 ms
        MedianQueryTime: 25 ms
        Queries: 4
        Result Rows received: 4
        Avg results per query: 1
        ########################################
        Querying 5 entries, took 120ms with 2 worker(s) (mean rate 50.000000/sec)
        "###);
    }

    #[test]
    fn terse_console_summary_of_empty_run() {
        let mut report = AggregateReport::new("t", "q");
        report.workers = 1;
        let mut out = Vec::new();
        render(&report, &Summary::derive(&report), false, completed_at(), &mut out).unwrap();

        insta::assert_snapshot!(String::from_utf8(out).unwrap(), @r###"
        ########################################
        Processing Complete
        2026-01-02T03:04:05Z
        ################
        Querystats:
        MinimumQueryTime: n/a
        MaximumQueryTime: n/a
        TotalQueryTime: 0s
        MeanQueryTime: n/a ms
        MedianQueryTime: n/a ms
        Queries: 0
        ########################################
        Querying 0 entries, took 0s with 1 worker(s) (mean rate n/a/sec)
        "###);
    }

    #[test]
    #[tracing_test::traced_test]
    fn faulty_queries_are_warned_about() {
        warn_on_faulty(&Summary::derive(&AggregateReport::new("t", "q")));
        assert!(!logs_contain("faulty_queries"));

        warn_on_faulty(&Summary::derive(&fixture()));
        assert!(logs_contain("faulty_queries=1"));
    }

    #[test]
    fn report_is_written_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");

        write_json(&fixture(), &path).unwrap();

        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written["QueryCounter"], 4);
        assert_eq!(written["RowsRead"], 5);
        assert_eq!(written["MinimumQueryTime"], "10ms");
        assert_eq!(written["Results"]["c"]["Results"].as_array().unwrap().len(), 2);

        let missing = dir.path().join("missing").join("report.json");
        assert!(matches!(
            write_json(&fixture(), &missing),
            Err(BenchError::WriteReport { .. })
        ));
    }
}
