//! PostgreSQL sessions, backed by `tokio_postgres`.
//!
//! Record fields are bound as text-format parameters, so that the server parses
//! each one according to the type of its placeholder exactly as it would parse
//! a literal. Returned columns are rendered to strings by their Postgres type.

use crate::config::ConnectionParseError;
use crate::{
    BenchConfig, BoxError, ConfigError, Connector, ExecuteError, Execution, RowMap, Session,
};
use bytes::BufMut;
use futures::TryStreamExt;
use std::time::{Duration, Instant};
use tokio_postgres::types::{self as pgtypes, FromSql, ToSql, Type};

/// PgConnector opens one `tokio_postgres` connection per worker.
pub struct PgConnector {
    config: tokio_postgres::Config,
}

impl PgConnector {
    pub fn new(config: &BenchConfig) -> Result<Self, ConfigError> {
        let mut pg_config = config
            .connection
            .parse::<tokio_postgres::Config>()
            .map_err(|err| ConfigError::Connection(ConnectionParseError(err.to_string())))?;

        if let Some(db_name) = &config.db_name {
            pg_config.dbname(db_name);
        }
        pg_config.application_name("pparallel-bench");

        Ok(Self { config: pg_config })
    }
}

#[async_trait::async_trait]
impl Connector for PgConnector {
    type Session = PgSession;

    #[tracing::instrument(level = "debug", skip(self), err)]
    async fn connect(&self, worker: usize) -> Result<PgSession, ExecuteError> {
        let (client, connection) = self
            .config
            .connect(tokio_postgres::NoTls)
            .await
            .map_err(|err| ExecuteError::Connect(err.into()))?;

        // The connection performs the actual communication with the database,
        // and must be polled for the client to make progress.
        let connection = tokio::spawn(async move {
            if let Err(err) = connection.await {
                tracing::error!(worker, error = %err, "database connection failed");
            }
        });

        Ok(PgSession {
            client,
            connection,
            statement: None,
        })
    }
}

pub struct PgSession {
    client: tokio_postgres::Client,
    connection: tokio::task::JoinHandle<()>,
    statement: Option<tokio_postgres::Statement>,
}

#[async_trait::async_trait]
impl Session for PgSession {
    async fn prepare(&mut self, query: &str) -> Result<(), ExecuteError> {
        let statement = self
            .client
            .prepare(query)
            .await
            .map_err(|err| ExecuteError::Prepare {
                query: query.to_string(),
                source: err.into(),
            })?;

        self.statement = Some(statement);
        Ok(())
    }

    async fn execute(&mut self, args: &[String]) -> Result<Execution, ExecuteError> {
        let statement = self.statement.as_ref().ok_or(ExecuteError::NotPrepared)?;
        let params: Vec<TextParam> = args.iter().map(|arg| TextParam(arg)).collect();

        let started = Instant::now();
        let rows = self
            .client
            .query_raw(statement, params.iter().map(|p| p as &(dyn ToSql + Sync)))
            .await
            .map_err(|err| ExecuteError::Query(err.into()))?;
        futures::pin_mut!(rows);

        let mut next = rows
            .try_next()
            .await
            .map_err(|err| ExecuteError::Query(err.into()))?;

        let mut execution = Execution {
            execution: started.elapsed(),
            ..Default::default()
        };
        let retrieval_started = Instant::now();

        let mut index = 0;
        while let Some(row) = next {
            match scan_row(&row) {
                Ok(row) => execution.rows.push(row),
                Err(source) => execution
                    .scan_failures
                    .push(ExecuteError::Scan { row: index, source }),
            }
            index += 1;

            next = rows
                .try_next()
                .await
                .map_err(|err| ExecuteError::Query(err.into()))?;
        }
        execution.retrieval = retrieval_started.elapsed();

        Ok(execution)
    }

    async fn close(self) {
        let PgSession {
            client,
            connection,
            statement,
        } = self;

        // Dropping the client terminates the connection, which completes its task.
        std::mem::drop(statement);
        std::mem::drop(client);

        if tokio::time::timeout(Duration::from_secs(5), connection)
            .await
            .is_err()
        {
            tracing::warn!("timed out waiting for database connection to close");
        }
    }
}

/// Renders every column of `row` into a RowMap keyed by column name.
fn scan_row(row: &tokio_postgres::Row) -> Result<RowMap, BoxError> {
    let mut out = RowMap::new();
    for (index, column) in row.columns().iter().enumerate() {
        let CellText(value) = row.try_get::<_, CellText>(index)?;
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

/// TextParam binds a string in the text wire format, leaving it to the server
/// to interpret it according to the parameter's declared type.
#[derive(Debug)]
struct TextParam<'a>(&'a str);

impl ToSql for TextParam<'_> {
    fn to_sql(
        &self,
        _: &Type,
        w: &mut bytes::BytesMut,
    ) -> Result<pgtypes::IsNull, Box<dyn std::error::Error + Sync + Send>>
    where
        Self: Sized,
    {
        w.put_slice(self.0.as_bytes());
        Ok(pgtypes::IsNull::No)
    }

    fn accepts(_: &Type) -> bool {
        true
    }

    fn encode_format(&self, _: &Type) -> pgtypes::Format {
        pgtypes::Format::Text
    }

    pgtypes::to_sql_checked!();
}

/// CellText is the string rendering of a single column value. NULL renders as
/// an empty string. Columns of types without a rendering fail to scan.
#[derive(Debug, PartialEq)]
struct CellText(String);

impl<'a> FromSql<'a> for CellText {
    fn from_sql(
        ty: &Type,
        raw: &'a [u8],
    ) -> Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        let text = if *ty == Type::BOOL {
            render::<bool>(ty, raw)?
        } else if *ty == Type::CHAR {
            render::<i8>(ty, raw)?
        } else if *ty == Type::INT2 {
            render::<i16>(ty, raw)?
        } else if *ty == Type::INT4 {
            render::<i32>(ty, raw)?
        } else if *ty == Type::INT8 {
            render::<i64>(ty, raw)?
        } else if *ty == Type::OID {
            render::<u32>(ty, raw)?
        } else if *ty == Type::FLOAT4 {
            render::<f32>(ty, raw)?
        } else if *ty == Type::FLOAT8 {
            render::<f64>(ty, raw)?
        } else if *ty == Type::TIMESTAMP {
            render::<chrono::NaiveDateTime>(ty, raw)?
        } else if *ty == Type::TIMESTAMPTZ {
            chrono::DateTime::<chrono::Utc>::from_sql(ty, raw)?.to_rfc3339()
        } else if *ty == Type::DATE {
            render::<chrono::NaiveDate>(ty, raw)?
        } else if *ty == Type::TIME {
            render::<chrono::NaiveTime>(ty, raw)?
        } else if *ty == Type::UUID {
            render::<uuid::Uuid>(ty, raw)?
        } else if *ty == Type::JSON || *ty == Type::JSONB {
            render::<serde_json::Value>(ty, raw)?
        } else if <&str as FromSql>::accepts(ty) {
            <&str as FromSql>::from_sql(ty, raw)?.to_string()
        } else {
            return Err(format!("unsupported column type {ty}").into());
        };
        Ok(CellText(text))
    }

    fn from_sql_null(_: &Type) -> Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        Ok(CellText(String::new()))
    }

    fn accepts(_: &Type) -> bool {
        true
    }
}

fn render<'a, T>(
    ty: &Type,
    raw: &'a [u8],
) -> Result<String, Box<dyn std::error::Error + Sync + Send>>
where
    T: FromSql<'a> + ToString,
{
    Ok(T::from_sql(ty, raw)?.to_string())
}
