use std::sync::Arc;

use async_trait::async_trait;
use gcp_bigquery_client::Client;
use gcp_bigquery_client::model::query_parameter::QueryParameter;
use gcp_bigquery_client::model::query_parameter_type::QueryParameterType;
use gcp_bigquery_client::model::query_parameter_value::QueryParameterValue;
use gcp_bigquery_client::model::query_request::QueryRequest;
use gcp_bigquery_client::model::query_response::QueryResponse;
use gcp_bigquery_client::yup_oauth2::parse_service_account_key;

use crate::connections::{ConnectionParams, DialectAdapter};
use crate::error::{ErrorKind, SluiceResult};
use crate::sluice_error;
use crate::types::{Row, RowStream, Statement, Value};

/// Adapter for BigQuery over the official jobs API.
///
/// BigQuery authenticates with a service-account JSON credential instead of
/// host/port/password; the connection's database field is the GCP project id.
pub struct BigQueryAdapter {
    client: Client,
    project_id: String,
}

impl BigQueryAdapter {
    /// Builds a client from the service-account credential in the parameters.
    pub async fn connect(params: &ConnectionParams) -> SluiceResult<Self> {
        let service_account = params.service_account.as_deref().ok_or_else(|| {
            sluice_error!(
                ErrorKind::MissingCredentials,
                "Service account credential is required for BigQuery"
            )
        })?;

        let key = parse_service_account_key(service_account).map_err(|err| {
            sluice_error!(
                ErrorKind::MissingCredentials,
                "Service account credential is not valid JSON",
                source: err
            )
        })?;
        let client = Client::from_service_account_key(key, false)
            .await
            .map_err(|err| {
                sluice_error!(
                    ErrorKind::ConnectionRefused,
                    "Could not authenticate with BigQuery",
                    source: err
                )
            })?;

        Ok(Self {
            client,
            project_id: params.database.clone(),
        })
    }

    async fn run(&self, request: QueryRequest) -> SluiceResult<Vec<Row>> {
        let response = self.client.job().query(&self.project_id, request).await?;

        Ok(convert_response(response))
    }
}

#[async_trait]
impl DialectAdapter for BigQueryAdapter {
    async fn query(&self, statement: &Statement) -> SluiceResult<Vec<Row>> {
        let mut request = QueryRequest::new(statement.sql.as_str());
        request.use_legacy_sql = false;
        if !statement.binds.is_empty() {
            request.parameter_mode = Some("POSITIONAL".to_string());
            request.query_parameters = Some(statement.binds.iter().map(convert_bind).collect());
        }

        self.run(request).await
    }

    async fn query_unsafe(&self, sql: &str) -> SluiceResult<Vec<Row>> {
        let mut request = QueryRequest::new(sql);
        request.use_legacy_sql = false;

        self.run(request).await
    }

    async fn query_stream(&self, statement: &Statement) -> SluiceResult<RowStream> {
        // The jobs API answers with a materialized page; BigQuery only acts as
        // a destination here, so extraction volumes never flow through this
        // path.
        let rows = self.query(statement).await?;

        Ok(Box::pin(futures::stream::iter(rows.into_iter().map(Ok))))
    }
}

/// Converts one positional bind into a BigQuery query parameter.
fn convert_bind(value: &Value) -> QueryParameter {
    let (parameter_type, rendered) = match value {
        Value::Null => ("STRING", None),
        Value::Bool(value) => ("BOOL", Some(value.to_string())),
        Value::Int(value) => ("INT64", Some(value.to_string())),
        Value::Float(value) => ("FLOAT64", Some(value.to_string())),
        Value::Timestamp(_) | Value::TimestampTz(_) => {
            ("TIMESTAMP", Some(value.to_csv_field()))
        }
        Value::Date(value) => ("DATE", Some(value.to_string())),
        Value::Json(value) => ("JSON", Some(value.to_string())),
        other => ("STRING", Some(other.to_csv_field())),
    };

    QueryParameter {
        name: None,
        parameter_type: Some(QueryParameterType {
            r#type: parameter_type.to_string(),
            array_type: None,
            struct_types: None,
        }),
        parameter_value: Some(QueryParameterValue {
            value: rendered,
            array_values: None,
            struct_values: None,
        }),
    }
}

fn convert_response(response: QueryResponse) -> Vec<Row> {
    let fields = response
        .schema
        .as_ref()
        .and_then(|schema| schema.fields.clone())
        .unwrap_or_default();
    let columns: Arc<[String]> = fields
        .iter()
        .map(|field| field.name.clone())
        .collect::<Vec<_>>()
        .into();

    response
        .rows
        .unwrap_or_default()
        .into_iter()
        .map(|row| {
            let values = row
                .columns
                .unwrap_or_default()
                .into_iter()
                .zip(fields.iter())
                .map(|(cell, field)| convert_cell(cell.value, &field.r#type))
                .collect();

            Row::new(columns.clone(), values)
        })
        .collect()
}

/// Maps one result cell to a [`Value`] using the declared field type.
///
/// The jobs API encodes scalars as JSON strings; numbers and booleans are
/// re-parsed, anything else passes through textually.
fn convert_cell(
    cell: Option<serde_json::Value>,
    field_type: &gcp_bigquery_client::model::field_type::FieldType,
) -> Value {
    use gcp_bigquery_client::model::field_type::FieldType;

    let Some(serde_json::Value::String(text)) = cell else {
        return match cell {
            None | Some(serde_json::Value::Null) => Value::Null,
            Some(other) => Value::Json(other),
        };
    };

    match field_type {
        FieldType::Integer | FieldType::Int64 => text
            .parse::<i64>()
            .map(Value::Int)
            .unwrap_or(Value::String(text)),
        FieldType::Float | FieldType::Float64 => text
            .parse::<f64>()
            .map(Value::Float)
            .unwrap_or(Value::String(text)),
        FieldType::Boolean | FieldType::Bool => {
            Value::Bool(text.eq_ignore_ascii_case("true"))
        }
        _ => Value::String(text),
    }
}
