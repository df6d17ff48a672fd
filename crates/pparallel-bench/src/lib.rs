//! pparallel-bench measures the performance of a parametrized query by running it
//! once for every record of an input stream, spread across a pool of concurrent
//! workers which each hold their own database session.
//!
//! Records are read by a [`BatchSource`], handed out in batches by the
//! [`Dispatcher`], executed by workers through a [`Session`], and merged into a
//! single [`AggregateReport`] from which the console summary and the JSON report
//! are rendered.

mod aggregate;
mod cli;
mod config;
mod dispatch;
mod error;
mod executor;
pub mod postgres;
mod record;
pub mod report;
mod source;
mod worker;

pub use aggregate::{AggregateReport, Aggregator, KeyedResults};
pub use cli::Cli;
pub use config::{BenchConfig, ConfigError, Input, SplitCharacter, DEFAULT_QUERY, TAB_ESCAPE};
pub use dispatch::Dispatcher;
pub use error::BenchError;
pub use executor::{BoxError, Connector, ExecuteError, Execution, RowMap, Session};
pub use record::{parse_record, ParsedRecord};
pub use source::{open_input, Batch, BatchSource, SourceError, DEFAULT_MAX_RECORD_SIZE};
pub use worker::{Outcome, Worker, WorkerAccumulation};
