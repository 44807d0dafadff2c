use std::sync::Arc;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures::StreamExt;
use secrecy::ExposeSecret;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Executor, Postgres, Row as _, TypeInfo};
use tokio::sync::mpsc;
use tracing::warn;

use crate::connections::{ConnectionParams, DialectAdapter, EngineType};
use crate::error::{ErrorKind, SluiceError, SluiceResult};
use crate::sluice_error;
use crate::types::{Row, RowStream, Statement, Value};

/// Upper bound on connections per pooled source or destination.
const MAX_POOL_CONNECTIONS: u32 = 5;

/// Rows buffered between the database cursor and the consumer.
///
/// The bound is what propagates destination backpressure up to the cursor:
/// when the consumer stalls, the channel fills and the fetch loop suspends
/// instead of buffering the full result set.
const STREAM_BUFFER_ROWS: usize = 128;

/// Adapter for the Postgres wire family: Postgres, CockroachDB and Redshift.
pub struct PostgresAdapter {
    pool: PgPool,
}

impl PostgresAdapter {
    /// Opens a connection pool for the given parameters.
    ///
    /// Plain Postgres sources are forced into read-only transaction mode on
    /// every pooled connection; Redshift and CockroachDB sessions are left
    /// untouched (Redshift destinations must write).
    pub async fn connect(params: &ConnectionParams) -> SluiceResult<Self> {
        let host = params.host.as_deref().ok_or_else(|| {
            sluice_error!(
                ErrorKind::MissingCredentials,
                "Host is required",
                params.engine
            )
        })?;

        let mut options = PgConnectOptions::new()
            .host(host)
            .port(params.port.unwrap_or(5432))
            .username(&params.username)
            .database(&params.database);
        if let Some(password) = &params.password {
            options = options.password(password.expose_secret());
        }

        let read_only = params.engine == EngineType::Postgres;
        let pool = PgPoolOptions::new()
            .max_connections(MAX_POOL_CONNECTIONS)
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    if read_only {
                        conn.execute("SET SESSION CHARACTERISTICS AS TRANSACTION READ ONLY")
                            .await?;
                    }

                    Ok(())
                })
            })
            .connect_with(options)
            .await
            .map_err(|err| {
                sluice_error!(
                    ErrorKind::ConnectionRefused,
                    "Could not connect to Postgres-family database",
                    source: err
                )
            })?;

        Ok(Self { pool })
    }

    fn build_query<'q>(statement: &'q Statement) -> Query<'q, Postgres, PgArguments> {
        let mut query = sqlx::query(&statement.sql);
        for value in &statement.binds {
            query = bind_value(query, value);
        }

        query
    }
}

#[async_trait]
impl DialectAdapter for PostgresAdapter {
    async fn query(&self, statement: &Statement) -> SluiceResult<Vec<Row>> {
        let rows = Self::build_query(statement).fetch_all(&self.pool).await?;

        convert_rows(&rows)
    }

    async fn query_unsafe(&self, sql: &str) -> SluiceResult<Vec<Row>> {
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;

        convert_rows(&rows)
    }

    async fn query_stream(&self, statement: &Statement) -> SluiceResult<RowStream> {
        let pool = self.pool.clone();
        let statement = statement.clone();
        let (tx, rx) = mpsc::channel::<SluiceResult<Row>>(STREAM_BUFFER_ROWS);

        tokio::spawn(async move {
            let query = PostgresAdapter::build_query(&statement);
            let mut rows = query.fetch(&pool);
            let mut columns: Option<Arc<[String]>> = None;

            while let Some(result) = rows.next().await {
                let item = result.map_err(SluiceError::from).and_then(|row| {
                    let columns = columns.get_or_insert_with(|| column_names(&row));
                    convert_row(&row, columns.clone())
                });

                let failed = item.is_err();
                if tx.send(item).await.is_err() {
                    // Receiver dropped: stop early so the connection is
                    // released back to the pool.
                    break;
                }
                if failed {
                    break;
                }
            }
        });

        Ok(Box::pin(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })))
    }
}

fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &Value,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(value) => query.bind(*value),
        Value::Int(value) => query.bind(*value),
        Value::Float(value) => query.bind(*value),
        Value::String(value) => query.bind(value.clone()),
        Value::Bytes(value) => query.bind(value.clone()),
        Value::Date(value) => query.bind(*value),
        Value::Time(value) => query.bind(*value),
        Value::Timestamp(value) => query.bind(*value),
        Value::TimestampTz(value) => query.bind(*value),
        Value::Uuid(value) => query.bind(*value),
        Value::Json(value) => query.bind(value.clone()),
    }
}

fn column_names(row: &PgRow) -> Arc<[String]> {
    row.columns()
        .iter()
        .map(|column| column.name().to_string())
        .collect::<Vec<_>>()
        .into()
}

fn convert_rows(rows: &[PgRow]) -> SluiceResult<Vec<Row>> {
    let Some(first) = rows.first() else {
        return Ok(Vec::new());
    };

    let columns = column_names(first);
    rows.iter()
        .map(|row| convert_row(row, columns.clone()))
        .collect()
}

fn convert_row(row: &PgRow, columns: Arc<[String]>) -> SluiceResult<Row> {
    let mut values = Vec::with_capacity(row.len());
    for (index, column) in row.columns().iter().enumerate() {
        let value = match column.type_info().name() {
            "BOOL" => row.try_get::<Option<bool>, _>(index)?.map(Value::Bool),
            "INT2" => row
                .try_get::<Option<i16>, _>(index)?
                .map(|value| Value::Int(value.into())),
            "INT4" => row
                .try_get::<Option<i32>, _>(index)?
                .map(|value| Value::Int(value.into())),
            "INT8" => row.try_get::<Option<i64>, _>(index)?.map(Value::Int),
            "FLOAT4" => row
                .try_get::<Option<f32>, _>(index)?
                .map(|value| Value::Float(value.into())),
            "FLOAT8" => row.try_get::<Option<f64>, _>(index)?.map(Value::Float),
            "NUMERIC" => row
                .try_get::<Option<BigDecimal>, _>(index)?
                .map(|value| Value::String(value.to_string())),
            "TEXT" | "VARCHAR" | "BPCHAR" | "CHAR" | "NAME" => {
                row.try_get::<Option<String>, _>(index)?.map(Value::String)
            }
            "BYTEA" => row.try_get::<Option<Vec<u8>>, _>(index)?.map(Value::Bytes),
            "DATE" => row
                .try_get::<Option<NaiveDate>, _>(index)?
                .map(Value::Date),
            "TIME" => row
                .try_get::<Option<NaiveTime>, _>(index)?
                .map(Value::Time),
            "TIMESTAMP" => row
                .try_get::<Option<NaiveDateTime>, _>(index)?
                .map(Value::Timestamp),
            "TIMESTAMPTZ" => row
                .try_get::<Option<DateTime<Utc>>, _>(index)?
                .map(Value::TimestampTz),
            "UUID" => row.try_get::<Option<uuid::Uuid>, _>(index)?.map(Value::Uuid),
            "JSON" | "JSONB" => row
                .try_get::<Option<serde_json::Value>, _>(index)?
                .map(Value::Json),
            other => match row.try_get::<Option<String>, _>(index) {
                Ok(value) => value.map(Value::String),
                Err(_) => {
                    warn!(
                        column = column.name(),
                        r#type = other,
                        "unsupported Postgres type, substituting NULL"
                    );
                    None
                }
            },
        };

        values.push(value.unwrap_or(Value::Null));
    }

    Ok(Row::new(columns, values))
}
