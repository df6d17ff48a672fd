use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Common arguments for configuring logging. These are flattened into the arguments of each
/// executable.
#[derive(Debug, clap::Args, Clone, PartialEq)]
pub struct LogArgs {
    /// The minimum level of events to log. Directives in the `RUST_LOG` environment
    /// variable take precedence over this value.
    #[clap(
        long = "log.level",
        value_enum,
        default_value_t = LogLevel::Warn,
        env = "LOG_LEVEL",
        global = true
    )]
    pub level: LogLevel,
    /// The format of log events. Defaults to `text` when stderr is a terminal, and `json`
    /// otherwise.
    #[clap(long = "log.format", value_enum, env = "LOG_FORMAT", global = true)]
    pub format: Option<LogFormat>,
}

#[derive(Debug, clap::ValueEnum, Copy, Clone, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Off,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Off => LevelFilter::OFF,
        }
    }
}

#[derive(Debug, clap::ValueEnum, Copy, Clone, PartialEq, Eq)]
pub enum LogFormat {
    /// Newline-delimited JSON, one object per event.
    Json,
    /// Human readable text, with ANSI colors.
    Text,
    /// Human readable text, without ANSI colors.
    Plain,
}

/// Installs the global tracing subscriber. Logs are always written to stderr, so that stdout
/// remains reserved for the output of the executable itself.
pub fn init_logging(args: &LogArgs) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from(args.level).into())
        .from_env_lossy();

    let format = args.format.unwrap_or_else(|| {
        if atty::is(atty::Stream::Stderr) {
            LogFormat::Text
        } else {
            LogFormat::Json
        }
    });

    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(env_filter);

    match format {
        LogFormat::Json => builder
            .json()
            // Without this, the message and all fields would be nested inside of a `"fields"`
            // object, which just makes parsing more difficult.
            .flatten_event(true)
            .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
            .with_current_span(true)
            .with_span_list(false)
            .with_target(false)
            .init(),
        LogFormat::Text => builder.with_ansi(true).with_target(false).init(),
        LogFormat::Plain => builder.with_ansi(false).with_target(false).init(),
    }
}
