use std::sync::Arc;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures::StreamExt;
use secrecy::ExposeSecret;
use sqlx::mysql::{MySqlArguments, MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column, Executor, MySql, Row as _, TypeInfo};
use tokio::sync::mpsc;
use tracing::warn;

use crate::connections::{ConnectionParams, DialectAdapter};
use crate::error::{ErrorKind, SluiceError, SluiceResult};
use crate::sluice_error;
use crate::types::{Row, RowStream, Statement, Value};

const MAX_POOL_CONNECTIONS: u32 = 5;
const STREAM_BUFFER_ROWS: usize = 128;

/// Adapter for the MySQL wire family: MySQL and MariaDB.
///
/// Every pooled connection is initialized with `ANSI_QUOTES` so that
/// double-quoted identifiers produced by the query builder are understood, and
/// with read-only transaction mode since these engines are sources only.
pub struct MySqlAdapter {
    pool: MySqlPool,
}

impl MySqlAdapter {
    /// Opens a connection pool for the given parameters.
    pub async fn connect(params: &ConnectionParams) -> SluiceResult<Self> {
        let host = params.host.as_deref().ok_or_else(|| {
            sluice_error!(
                ErrorKind::MissingCredentials,
                "Host is required",
                params.engine
            )
        })?;

        let mut options = MySqlConnectOptions::new()
            .host(host)
            .port(params.port.unwrap_or(3306))
            .username(&params.username)
            .database(&params.database);
        if let Some(password) = &params.password {
            options = options.password(password.expose_secret());
        }

        let pool = MySqlPoolOptions::new()
            .max_connections(MAX_POOL_CONNECTIONS)
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    conn.execute("SET SESSION sql_mode='ANSI_QUOTES'").await?;
                    conn.execute("SET SESSION TRANSACTION READ ONLY").await?;

                    Ok(())
                })
            })
            .connect_with(options)
            .await
            .map_err(|err| {
                sluice_error!(
                    ErrorKind::ConnectionRefused,
                    "Could not connect to MySQL-family database",
                    source: err
                )
            })?;

        Ok(Self { pool })
    }

    fn build_query<'q>(statement: &'q Statement) -> Query<'q, MySql, MySqlArguments> {
        let mut query = sqlx::query(&statement.sql);
        for value in &statement.binds {
            query = bind_value(query, value);
        }

        query
    }
}

#[async_trait]
impl DialectAdapter for MySqlAdapter {
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
            let query = MySqlAdapter::build_query(&statement);
            let mut rows = query.fetch(&pool);
            let mut columns: Option<Arc<[String]>> = None;

            while let Some(result) = rows.next().await {
                let item = result.map_err(SluiceError::from).and_then(|row| {
                    let columns = columns.get_or_insert_with(|| column_names(&row));
                    convert_row(&row, columns.clone())
                });

                let failed = item.is_err();
                if tx.send(item).await.is_err() {
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
    query: Query<'q, MySql, MySqlArguments>,
    value: &Value,
) -> Query<'q, MySql, MySqlArguments> {
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
        Value::Uuid(value) => query.bind(value.to_string()),
        Value::Json(value) => query.bind(value.clone()),
    }
}

fn column_names(row: &MySqlRow) -> Arc<[String]> {
    row.columns()
        .iter()
        .map(|column| column.name().to_string())
        .collect::<Vec<_>>()
        .into()
}

fn convert_rows(rows: &[MySqlRow]) -> SluiceResult<Vec<Row>> {
    let Some(first) = rows.first() else {
        return Ok(Vec::new());
    };

    let columns = column_names(first);
    rows.iter()
        .map(|row| convert_row(row, columns.clone()))
        .collect()
}

fn convert_row(row: &MySqlRow, columns: Arc<[String]>) -> SluiceResult<Row> {
    let mut values = Vec::with_capacity(row.len());
    for (index, column) in row.columns().iter().enumerate() {
        let value = match column.type_info().name() {
            "BOOLEAN" => row.try_get::<Option<bool>, _>(index)?.map(Value::Bool),
            "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
                row.try_get::<Option<i64>, _>(index)?.map(Value::Int)
            }
            "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED" => {
                row.try_get::<Option<u32>, _>(index)?
                    .map(|value| Value::Int(value.into()))
            }
            "BIGINT UNSIGNED" => row
                .try_get::<Option<u64>, _>(index)?
                .map(|value| Value::String(value.to_string())),
            "FLOAT" => row
                .try_get::<Option<f32>, _>(index)?
                .map(|value| Value::Float(value.into())),
            "DOUBLE" => row.try_get::<Option<f64>, _>(index)?.map(Value::Float),
            "DECIMAL" => row
                .try_get::<Option<BigDecimal>, _>(index)?
                .map(|value| Value::String(value.to_string())),
            "CHAR" | "VARCHAR" | "TINYTEXT" | "TEXT" | "MEDIUMTEXT" | "LONGTEXT" | "ENUM" => {
                row.try_get::<Option<String>, _>(index)?.map(Value::String)
            }
            "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" => {
                row.try_get::<Option<Vec<u8>>, _>(index)?.map(Value::Bytes)
            }
            "DATE" => row
                .try_get::<Option<NaiveDate>, _>(index)?
                .map(Value::Date),
            "TIME" => row
                .try_get::<Option<NaiveTime>, _>(index)?
                .map(Value::Time),
            "DATETIME" => row
                .try_get::<Option<NaiveDateTime>, _>(index)?
                .map(Value::Timestamp),
            "TIMESTAMP" => row
                .try_get::<Option<DateTime<Utc>>, _>(index)?
                .map(Value::TimestampTz),
            "JSON" => row
                .try_get::<Option<serde_json::Value>, _>(index)?
                .map(Value::Json),
            other => match row.try_get::<Option<String>, _>(index) {
                Ok(value) => value.map(Value::String),
                Err(_) => {
                    warn!(
                        column = column.name(),
                        r#type = other,
                        "unsupported MySQL type, substituting NULL"
                    );
                    None
                }
            },
        };

        values.push(value.unwrap_or(Value::Null));
    }

    Ok(Row::new(columns, values))
}
