use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::debug;

use crate::connections::{ConnectionParams, DialectAdapter};
use crate::error::{ErrorKind, SluiceResult};
use crate::sluice_error;
use crate::types::{Row, RowStream, Statement, Value};

/// Adapter for Snowflake over its REST session protocol.
///
/// A login request exchanges the username/password for a session token, which
/// then authorizes query requests. There is no driver crate involved: the
/// adapter speaks the same HTTP surface the official connectors use.
pub struct SnowflakeAdapter {
    http: reqwest::Client,
    base_url: String,
    token: RwLock<String>,
}

#[derive(Debug, Deserialize)]
struct SnowflakeResponse<T> {
    success: bool,
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    token: String,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(default)]
    rowtype: Vec<ColumnType>,
    #[serde(default)]
    rowset: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct ColumnType {
    name: String,
    #[serde(rename = "type")]
    column_type: String,
}

#[derive(Debug, Serialize)]
struct QueryRequest {
    #[serde(rename = "sqlText")]
    sql_text: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    bindings: HashMap<String, serde_json::Value>,
}

impl SnowflakeAdapter {
    /// Logs into the given Snowflake account and returns a live adapter.
    ///
    /// The host is the full account hostname; database, schema and warehouse
    /// become the session defaults for every subsequent statement.
    pub async fn connect(params: &ConnectionParams) -> SluiceResult<Self> {
        let host = params.host.as_deref().ok_or_else(|| {
            sluice_error!(ErrorKind::MissingCredentials, "Host is required for Snowflake")
        })?;
        let password = params.password.as_ref().ok_or_else(|| {
            sluice_error!(
                ErrorKind::MissingCredentials,
                "Password is required for Snowflake"
            )
        })?;
        // The account identifier is the first label of the account hostname.
        let account = host.split('.').next().unwrap_or(host);

        let http = reqwest::Client::new();
        let base_url = format!("https://{host}");

        let mut login_url = format!(
            "{base_url}/session/v1/login-request?databaseName={}",
            params.database
        );
        if let Some(schema) = &params.schema {
            login_url.push_str(&format!("&schemaName={schema}"));
        }
        if let Some(warehouse) = &params.warehouse {
            login_url.push_str(&format!("&warehouse={warehouse}"));
        }

        let body = json!({
            "data": {
                "LOGIN_NAME": params.username,
                "PASSWORD": password.expose_secret(),
                "ACCOUNT_NAME": account,
            }
        });

        let response: SnowflakeResponse<LoginData> = http
            .post(&login_url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        let success = response.success;
        let Some(data) = response.data.filter(|_| success) else {
            return Err(sluice_error!(
                ErrorKind::ConnectionRefused,
                "Snowflake login failed",
                response.message.unwrap_or_default()
            ));
        };

        debug!(account, "established Snowflake session");

        Ok(Self {
            http,
            base_url,
            token: RwLock::new(data.token),
        })
    }

    async fn run(
        &self,
        sql: &str,
        bindings: HashMap<String, serde_json::Value>,
    ) -> SluiceResult<Vec<Row>> {
        let url = format!(
            "{}/queries/v1/query-request?requestId={}",
            self.base_url,
            uuid::Uuid::new_v4()
        );
        let token = self.token.read().await.clone();

        let request = QueryRequest {
            sql_text: sql.to_string(),
            bindings,
        };

        let response: SnowflakeResponse<QueryData> = self
            .http
            .post(&url)
            .header(AUTHORIZATION, format!("Snowflake Token=\"{token}\""))
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .json(&request)
            .send()
            .await?
            .json()
            .await?;

        let success = response.success;
        let Some(data) = response.data.filter(|_| success) else {
            return Err(sluice_error!(
                ErrorKind::DatabaseError,
                "Snowflake statement failed",
                response.message.unwrap_or_default()
            ));
        };

        Ok(convert_rowset(data))
    }
}

#[async_trait]
impl DialectAdapter for SnowflakeAdapter {
    async fn query(&self, statement: &Statement) -> SluiceResult<Vec<Row>> {
        self.run(&statement.sql, convert_bindings(&statement.binds))
            .await
    }

    async fn query_unsafe(&self, sql: &str) -> SluiceResult<Vec<Row>> {
        self.run(sql, HashMap::new()).await
    }

    async fn query_stream(&self, statement: &Statement) -> SluiceResult<RowStream> {
        // The REST surface answers with a materialized rowset; Snowflake only
        // acts as a destination here, so streaming extraction volumes never
        // flow through this path.
        let rows = self.query(statement).await?;

        Ok(Box::pin(futures::stream::iter(rows.into_iter().map(Ok))))
    }
}

/// Converts positional binds into Snowflake's 1-based textual binding map.
fn convert_bindings(binds: &[Value]) -> HashMap<String, serde_json::Value> {
    binds
        .iter()
        .enumerate()
        .map(|(index, value)| {
            let rendered = match value {
                Value::Null => serde_json::Value::Null,
                other => serde_json::Value::String(other.to_csv_field()),
            };

            (
                (index + 1).to_string(),
                json!({ "type": "TEXT", "value": rendered }),
            )
        })
        .collect()
}

fn convert_rowset(data: QueryData) -> Vec<Row> {
    let columns: Arc<[String]> = data
        .rowtype
        .iter()
        .map(|column| column.name.clone())
        .collect::<Vec<_>>()
        .into();

    data.rowset
        .into_iter()
        .map(|row| {
            let values = row
                .into_iter()
                .zip(data.rowtype.iter())
                .map(|(value, column)| convert_value(value, &column.column_type))
                .collect();

            Row::new(columns.clone(), values)
        })
        .collect()
}

/// Maps one rowset entry to a [`Value`] using the declared column type.
///
/// Snowflake's legacy rowset encodes everything as strings; numbers and
/// booleans are re-parsed, anything else is passed through textually.
fn convert_value(value: serde_json::Value, column_type: &str) -> Value {
    let serde_json::Value::String(text) = value else {
        return match value {
            serde_json::Value::Null => Value::Null,
            other => Value::Json(other),
        };
    };

    match column_type {
        "fixed" | "FIXED" => text
            .parse::<i64>()
            .map(Value::Int)
            .unwrap_or(Value::String(text)),
        "real" | "REAL" => text
            .parse::<f64>()
            .map(Value::Float)
            .unwrap_or(Value::String(text)),
        "boolean" | "BOOLEAN" => Value::Bool(text == "1" || text.eq_ignore_ascii_case("true")),
        _ => Value::String(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bindings_are_one_based_text() {
        let bindings = convert_bindings(&[Value::Int(42), Value::String("acme".to_string())]);

        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings["1"]["value"], "42");
        assert_eq!(bindings["2"]["value"], "acme");
        assert_eq!(bindings["1"]["type"], "TEXT");
    }

    #[test]
    fn rowset_values_follow_declared_types() {
        assert_eq!(
            convert_value(serde_json::Value::String("7".to_string()), "fixed"),
            Value::Int(7)
        );
        assert_eq!(
            convert_value(serde_json::Value::String("1".to_string()), "boolean"),
            Value::Bool(true)
        );
        assert_eq!(
            convert_value(serde_json::Value::String("x".to_string()), "text"),
            Value::String("x".to_string())
        );
        assert_eq!(convert_value(serde_json::Value::Null, "text"), Value::Null);
    }
}
