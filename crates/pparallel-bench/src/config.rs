use crate::DEFAULT_MAX_RECORD_SIZE;
use std::path::PathBuf;

/// The query run when none is given. `%s` is replaced by the quoted destination table.
pub const DEFAULT_QUERY: &str = "SELECT time_bucket('1 minutes', ts) AS t, min(usage) AS min_cpu, max(usage) AS max_cpu,avg(usage) AS avg_cpu FROM  %s WHERE host = $1 AND ts > $2 AND ts < $3 GROUP BY t ORDER BY t DESC;";

/// Escape token which may be given in place of a literal horizontal tab.
pub const TAB_ESCAPE: &str = "\\t";

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("--header-line-count ({0}) must be greater than 0")]
    HeaderLineCount(i64),
    #[error("--workers ({0}) must be greater than 0")]
    Workers(usize),
    #[error("--batch-size ({0}) must be greater than 0")]
    BatchSize(usize),
    #[error("--split must not be empty")]
    EmptySplit,
    #[error("there seems to be no stdin data or input from --file")]
    NoInput,
    #[error("invalid --connection string")]
    Connection(#[source] ConnectionParseError),
}

/// Opaque parse failure of a connection string.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ConnectionParseError(pub String);

impl PartialEq for ConnectionParseError {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

/// Where records are read from.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Stdin,
    File(PathBuf),
}

/// The configured record delimiter. It's kept verbatim as given, and only
/// translated to a literal tab at the moment records are split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitCharacter(String);

impl SplitCharacter {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The delimiter exactly as it was configured.
    pub fn as_configured(&self) -> &str {
        &self.0
    }

    pub fn is_tab(&self) -> bool {
        self.0 == TAB_ESCAPE
    }

    /// The string which separates fields of a raw record.
    pub fn separator(&self) -> &str {
        if self.is_tab() {
            "\t"
        } else {
            &self.0
        }
    }
}

impl Default for SplitCharacter {
    fn default() -> Self {
        Self::new(",")
    }
}

/// All parameters of a benchmark run. It's built once from the command line and
/// then shared, unmodified, by the dispatcher and every worker.
#[derive(Debug, Clone)]
pub struct BenchConfig {
    /// Connection string of the database.
    pub connection: String,
    /// Overrides the database named by `connection`.
    pub db_name: Option<String>,
    pub schema: String,
    pub table: String,
    /// Query template. May contain `%s`, which is replaced by the destination.
    pub query: String,
    pub split: SplitCharacter,
    pub input: Input,
    pub to_json: Option<PathBuf>,
    pub skip_header: bool,
    pub header_line_count: i64,
    /// Requested maximum size of a single record, in bytes.
    pub token_size: usize,
    pub workers: usize,
    pub batch_size: usize,
    pub verbose: bool,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            connection: "host=localhost user=postgres sslmode=disable".to_string(),
            db_name: None,
            schema: "public".to_string(),
            table: "cpu_usage".to_string(),
            query: DEFAULT_QUERY.to_string(),
            split: SplitCharacter::default(),
            input: Input::Stdin,
            to_json: None,
            skip_header: false,
            header_line_count: 1,
            token_size: DEFAULT_MAX_RECORD_SIZE,
            workers: 1,
            batch_size: 50,
            verbose: false,
        }
    }
}

impl BenchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.header_line_count <= 0 {
            return Err(ConfigError::HeaderLineCount(self.header_line_count));
        }
        if self.workers == 0 {
            return Err(ConfigError::Workers(self.workers));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::BatchSize(self.batch_size));
        }
        if self.split.as_configured().is_empty() {
            return Err(ConfigError::EmptySplit);
        }
        Ok(())
    }

    /// The quoted, schema-qualified name of the destination table.
    pub fn destination(&self) -> String {
        format!(r#""{}"."{}""#, self.schema, self.table)
    }

    /// The query which is actually executed.
    pub fn resolved_query(&self) -> String {
        if self.query.contains("%s") {
            self.query.replacen("%s", &self.destination(), 1)
        } else {
            self.query.clone()
        }
    }

    /// Number of leading input lines which are discarded before reading records.
    pub fn skip_lines(&self) -> usize {
        if self.skip_header {
            self.header_line_count.max(0) as usize
        } else {
            0
        }
    }

    /// Maximum size of a single record. Requests smaller than the default are ignored.
    pub fn max_record_size(&self) -> usize {
        if self.token_size != 0 && self.token_size < DEFAULT_MAX_RECORD_SIZE {
            tracing::warn!(
                token_size = self.token_size,
                default = DEFAULT_MAX_RECORD_SIZE,
                "provided --token-size is smaller than the default, ignoring"
            );
            DEFAULT_MAX_RECORD_SIZE
        } else {
            self.token_size.max(DEFAULT_MAX_RECORD_SIZE)
        }
    }
}
