use crate::{ConfigError, Input};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Default maximum size of a single record, in bytes.
pub const DEFAULT_MAX_RECORD_SIZE: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("failed to read input")]
    Io(#[from] std::io::Error),
    /// `len` counts the bytes of the record read before it was rejected, which
    /// may be fewer than the record holds.
    #[error("record at line {line} is at least {len} bytes, which exceeds the maximum of {max} bytes")]
    RecordTooLong { line: u64, len: usize, max: usize },
    #[error("record at line {line} is not valid UTF-8")]
    InvalidUtf8 {
        line: u64,
        #[source]
        source: std::string::FromUtf8Error,
    },
}

/// A group of raw records which is executed by a single worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch(Vec<String>);

impl Batch {
    pub fn records(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<String>> for Batch {
    fn from(records: Vec<String>) -> Self {
        Self(records)
    }
}

/// Opens the configured input as a buffered reader.
pub async fn open_input(
    input: &Input,
) -> Result<Box<dyn AsyncBufRead + Send + Unpin>, crate::BenchError> {
    match input {
        Input::File(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .map_err(SourceError::Io)?;
            Ok(Box::new(tokio::io::BufReader::new(file)))
        }
        Input::Stdin => {
            if atty::is(atty::Stream::Stdin) {
                return Err(ConfigError::NoInput.into());
            }
            tracing::info!("data is being piped to stdin");
            Ok(Box::new(tokio::io::BufReader::new(tokio::io::stdin())))
        }
    }
}

/// BatchSource reads newline-delimited records and groups them into batches of
/// at most `capacity` records. Leading header lines are discarded on the first pull.
/// No more than `max_record_size` bytes (plus a trailing carriage return) of a
/// single record are ever buffered.
pub struct BatchSource<R> {
    reader: R,
    capacity: usize,
    max_record_size: usize,
    skip_lines: usize,
    lines_seen: u64,
    rows_read: u64,
    batches: u64,
}

impl<R: AsyncBufRead + Unpin> BatchSource<R> {
    pub fn new(reader: R, capacity: usize, max_record_size: usize, skip_lines: usize) -> Self {
        Self {
            reader,
            capacity: capacity.max(1),
            max_record_size,
            skip_lines,
            lines_seen: 0,
            rows_read: 0,
            batches: 0,
        }
    }

    /// Number of records read so far, excluding skipped header lines.
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// Number of batches returned so far.
    pub fn batches(&self) -> u64 {
        self.batches
    }

    /// Returns the next batch, or None once the input is exhausted.
    /// Only the final batch may hold fewer than `capacity` records.
    pub async fn next_batch(&mut self) -> Result<Option<Batch>, SourceError> {
        while self.skip_lines != 0 {
            self.skip_lines -= 1;
            if self.next_line().await?.is_none() {
                self.skip_lines = 0;
            }
        }

        let mut records = Vec::with_capacity(self.capacity);
        while records.len() < self.capacity {
            match self.next_line().await? {
                Some(line) => {
                    records.push(line);
                    self.rows_read += 1;
                }
                None => break,
            }
        }

        if records.is_empty() {
            return Ok(None);
        }
        self.batches += 1;
        Ok(Some(Batch(records)))
    }

    async fn next_line(&mut self) -> Result<Option<String>, SourceError> {
        let number = self.lines_seen + 1;
        let max = self.max_record_size;
        // Room for a trailing '\r', which is trimmed below.
        let limit = max.saturating_add(1);

        let mut line = Vec::new();
        let mut read_any = false;

        loop {
            let (used, done) = {
                let available = self.reader.fill_buf().await?;
                if available.is_empty() {
                    break;
                }
                let (take, used, done) = match available.iter().position(|b| *b == b'\n') {
                    Some(end) => (end, end + 1, true),
                    None => (available.len(), available.len(), false),
                };
                if line.len() + take > limit {
                    return Err(SourceError::RecordTooLong {
                        line: number,
                        len: line.len() + take,
                        max,
                    });
                }
                line.extend_from_slice(&available[..take]);
                (used, done)
            };
            self.reader.consume(used);
            read_any = true;

            if done {
                break;
            }
        }

        if !read_any {
            return Ok(None);
        }
        self.lines_seen = number;

        if line.last() == Some(&b'\r') {
            line.pop();
        }
        if line.len() > max {
            return Err(SourceError::RecordTooLong {
                line: number,
                len: line.len(),
                max,
            });
        }
        String::from_utf8(line)
            .map(Some)
            .map_err(|source| SourceError::InvalidUtf8 {
                line: number,
                source,
            })
    }
}
