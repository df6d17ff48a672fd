use crate::postgres::PgConnector;
use crate::report::{self, Summary};
use crate::{
    open_input, BatchSource, BenchConfig, ConfigError, Dispatcher, Input, SplitCharacter,
    DEFAULT_MAX_RECORD_SIZE, DEFAULT_QUERY,
};
use anyhow::Context;
use bench_cli_common::{LogArgs, LogLevel};
use std::path::PathBuf;
use std::sync::Arc;

/// Benchmarks a parametrized query by executing it once for every record of the
/// input, using a pool of parallel workers which each hold their own connection.
///
/// Every record is split on `--split`, and its fields are bound in order to the
/// placeholders (`$1`, `$2`, ...) of `--query`. Results are grouped by the first
/// field of each record.
#[derive(Debug, clap::Parser)]
#[clap(author, version, about, long_about = None)]
pub struct Cli {
    /// Connection string of the PostgreSQL database, as a URL or as key=value pairs.
    #[clap(
        long = "connection",
        env = "DATABASE_URL",
        default_value = "host=localhost user=postgres sslmode=disable"
    )]
    pub connection: String,
    /// Database to connect to. Overrides any database named by `--connection`.
    #[clap(long = "db-name")]
    pub db_name: Option<String>,
    /// Schema of the destination table.
    #[clap(long, default_value = "public")]
    pub schema: String,
    /// Name of the destination table.
    #[clap(long, default_value = "cpu_usage")]
    pub table: String,
    /// Query to execute for every record. If present, `%s` is replaced by the
    /// quoted, schema-qualified destination table.
    #[clap(long, default_value = DEFAULT_QUERY)]
    pub query: String,
    /// Delimiter of record fields. Use `\t` for a horizontal tab.
    #[clap(long, default_value = ",")]
    pub split: String,
    /// File to read records from. Records are read from stdin if omitted.
    #[clap(long)]
    pub file: Option<PathBuf>,
    /// Write the complete report as JSON to this file.
    #[clap(long = "to-json")]
    pub to_json: Option<PathBuf>,
    /// Skip the leading header lines of the input.
    #[clap(long = "skip-header")]
    pub skip_header: bool,
    /// Number of header lines to skip when `--skip-header` is set.
    #[clap(
        long = "header-line-count",
        default_value_t = 1,
        allow_negative_numbers = true
    )]
    pub header_line_count: i64,
    /// Maximum size of a single record in bytes. Values below the default are ignored.
    #[clap(long = "token-size", default_value_t = DEFAULT_MAX_RECORD_SIZE)]
    pub token_size: usize,
    /// Number of records handed to a worker at a time.
    #[clap(long = "batch-size", default_value_t = 50)]
    pub batch_size: usize,
    /// Number of parallel workers, each with its own database connection.
    #[clap(long, default_value_t = 1)]
    pub workers: usize,
    /// Print processing statistics and per-batch timings.
    #[clap(long)]
    pub verbose: bool,

    #[clap(flatten)]
    pub log: LogArgs,
}

impl Cli {
    /// Logging arguments, with the default level raised to `info` when verbose.
    pub fn log_args(&self) -> LogArgs {
        let mut log = self.log.clone();
        if self.verbose && log.level == LogLevel::Warn {
            log.level = LogLevel::Info;
        }
        log
    }

    /// Converts the arguments into a validated BenchConfig.
    pub fn into_config(self) -> Result<BenchConfig, ConfigError> {
        let Cli {
            connection,
            db_name,
            schema,
            table,
            query,
            split,
            file,
            to_json,
            skip_header,
            header_line_count,
            token_size,
            batch_size,
            workers,
            verbose,
            log: _,
        } = self;

        let config = BenchConfig {
            connection,
            db_name,
            schema,
            table,
            query,
            split: SplitCharacter::new(split),
            input: file.map(Input::File).unwrap_or(Input::Stdin),
            to_json,
            skip_header,
            header_line_count,
            token_size,
            workers,
            batch_size,
            verbose,
        };
        config.validate()?;
        Ok(config)
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let config = Arc::new(self.into_config().context("invalid arguments")?);
        tracing::debug!(?config, "parsed configuration");

        let reader = open_input(&config.input)
            .await
            .context("failed to open input")?;

        let skip_lines = config.skip_lines();
        if skip_lines != 0 {
            tracing::info!(lines = skip_lines, "skipping leading lines of the input");
        }
        let source = BatchSource::new(
            reader,
            config.batch_size,
            config.max_record_size(),
            skip_lines,
        );

        let connector = Arc::new(PgConnector::new(&config)?);
        let report = Dispatcher::new(config.clone(), connector)
            .run(source)
            .await
            .context("benchmark failed")?;

        let summary = Summary::derive(&report);
        report::render(
            &report,
            &summary,
            config.verbose,
            chrono::Utc::now(),
            &mut std::io::stdout().lock(),
        )
        .context("failed to write summary")?;
        report::warn_on_faulty(&summary);

        if let Some(path) = &config.to_json {
            report::write_json(&report, path)?;
        }
        Ok(())
    }
}
