//! Application-state entities and their persistence.
//!
//! The engine's view of sources, views, configurations, destinations and
//! transfers, behind the [`TransferStore`] trait. The Postgres implementation
//! backs the binaries; the in-memory implementation backs tests.

pub mod memory;
pub mod postgres;

pub use memory::MemoryTransferStore;
pub use postgres::PgTransferStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::connections::{ConnectionParams, EngineType};
use crate::error::{ErrorKind, SluiceResult};
use crate::sluice_error;
use crate::transfer::TransferStatus;

/// A reachable operational database rows are extracted from.
#[derive(Debug, Clone)]
pub struct Source {
    pub id: i64,
    pub nickname: String,
    pub engine: EngineType,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<SecretString>,
    pub database: String,
}

impl Source {
    /// Returns the connection parameters for this source.
    pub fn connection_params(&self) -> ConnectionParams {
        ConnectionParams {
            engine: self.engine,
            host: Some(self.host.clone()),
            port: Some(self.port),
            username: self.username.clone(),
            password: self.password.clone(),
            database: self.database.clone(),
            schema: None,
            warehouse: None,
            service_account: None,
        }
    }
}

/// One declared column of a view, with its role tags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewColumn {
    pub name: String,
    pub data_type: String,
    #[serde(default)]
    pub is_primary_key: bool,
    #[serde(default)]
    pub is_last_modified: bool,
    #[serde(default)]
    pub is_tenant_column: bool,
}

/// A named, column-typed projection over a source table.
#[derive(Debug, Clone)]
pub struct View {
    pub id: i64,
    pub source_id: i64,
    pub table_name: String,
    pub columns: Vec<ViewColumn>,
}

impl View {
    pub fn primary_key_column(&self) -> Option<&ViewColumn> {
        self.columns.iter().find(|column| column.is_primary_key)
    }

    pub fn last_modified_column(&self) -> Option<&ViewColumn> {
        self.columns.iter().find(|column| column.is_last_modified)
    }

    pub fn tenant_column(&self) -> Option<&ViewColumn> {
        self.columns.iter().find(|column| column.is_tenant_column)
    }

    /// Checks the tagged-column invariant: exactly one primary-key column,
    /// exactly one last-modified column and exactly one tenant column.
    pub fn validate_tagged_columns(&self) -> SluiceResult<()> {
        let counts = self.columns.iter().fold((0, 0, 0), |mut counts, column| {
            counts.0 += usize::from(column.is_primary_key);
            counts.1 += usize::from(column.is_last_modified);
            counts.2 += usize::from(column.is_tenant_column);
            counts
        });

        if counts != (1, 1, 1) {
            return Err(sluice_error!(
                ErrorKind::MissingTaggedColumn,
                "View must tag exactly one primary-key, last-modified and tenant column",
                format!(
                    "view {} has {} primary-key, {} last-modified, {} tenant columns",
                    self.id, counts.0, counts.1, counts.2
                )
            ));
        }

        Ok(())
    }
}

/// One source-to-destination column rename.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub name_in_source: String,
    pub name_in_destination: String,
}

/// A mapping from view columns to destination column names, per destination.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub id: i64,
    pub view_id: i64,
    pub destination_id: i64,
    pub tenant_id: String,
    pub columns: Vec<ColumnMapping>,
}

/// The kind of system a destination is, with dialect-specific extra fields on
/// [`Destination`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DestinationType {
    #[serde(rename = "object_store")]
    ObjectStore,
    #[serde(rename = "snowflake")]
    Snowflake,
    #[serde(rename = "redshift")]
    Redshift,
    #[serde(rename = "bigquery")]
    BigQuery,
}

impl DestinationType {
    pub fn as_static_str(&self) -> &'static str {
        match self {
            DestinationType::ObjectStore => "object_store",
            DestinationType::Snowflake => "snowflake",
            DestinationType::Redshift => "redshift",
            DestinationType::BigQuery => "bigquery",
        }
    }

    pub fn parse(value: &str) -> SluiceResult<Self> {
        match value {
            "object_store" => Ok(DestinationType::ObjectStore),
            "snowflake" => Ok(DestinationType::Snowflake),
            "redshift" => Ok(DestinationType::Redshift),
            "bigquery" => Ok(DestinationType::BigQuery),
            other => Err(sluice_error!(
                ErrorKind::InvalidState,
                "Unknown destination type",
                other
            )),
        }
    }
}

/// A target system rows are loaded into.
///
/// The populated connection fields depend on the destination type; the
/// persisted `last_modified_at` watermark is mutated only by a successfully
/// finalized transfer.
#[derive(Debug, Clone)]
pub struct Destination {
    pub id: i64,
    pub nickname: String,
    pub destination_type: DestinationType,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub database: Option<String>,
    pub schema: Option<String>,
    pub warehouse: Option<String>,
    pub service_account_json: Option<String>,
    pub staging_bucket: Option<String>,
    pub last_modified_at: DateTime<Utc>,
}

impl Destination {
    /// Checks the per-type required connection fields.
    ///
    /// Runs before any pool is acquired, so a misconfigured destination fails
    /// without touching the source or the destination itself.
    pub fn validate_credentials(&self) -> SluiceResult<()> {
        let missing: Vec<&str> = match self.destination_type {
            DestinationType::ObjectStore => Vec::new(),
            DestinationType::Snowflake => [
                ("host", self.host.is_none()),
                ("port", self.port.is_none()),
                ("username", self.username.is_none()),
                ("password", self.password.is_none()),
                ("database", self.database.is_none()),
                ("schema", self.schema.is_none()),
                ("warehouse", self.warehouse.is_none()),
            ]
            .into_iter()
            .filter_map(|(name, missing)| missing.then_some(name))
            .collect(),
            DestinationType::Redshift => [
                ("host", self.host.is_none()),
                ("port", self.port.is_none()),
                ("username", self.username.is_none()),
                ("password", self.password.is_none()),
                ("database", self.database.is_none()),
                ("schema", self.schema.is_none()),
            ]
            .into_iter()
            .filter_map(|(name, missing)| missing.then_some(name))
            .collect(),
            DestinationType::BigQuery => [
                ("database", self.database.is_none()),
                ("schema", self.schema.is_none()),
                ("service_account", self.service_account_json.is_none()),
                ("staging_bucket", self.staging_bucket.is_none()),
            ]
            .into_iter()
            .filter_map(|(name, missing)| missing.then_some(name))
            .collect(),
        };

        if !missing.is_empty() {
            return Err(sluice_error!(
                ErrorKind::MissingCredentials,
                "Incomplete credentials for destination",
                format!(
                    "destination {} is missing: {}",
                    self.id,
                    missing.join(", ")
                )
            ));
        }

        Ok(())
    }
}

/// One execution of the replication pipeline for a configuration.
#[derive(Debug, Clone)]
pub struct Transfer {
    pub id: i64,
    pub configuration_id: i64,
    pub status: TransferStatus,
    pub finalized_at: Option<DateTime<Utc>>,
    pub object_url: Option<String>,
}

/// The resolved graph the coordinator works on: a transfer with its
/// configuration, view, source and destination.
#[derive(Debug, Clone)]
pub struct TransferBundle {
    pub transfer: Transfer,
    pub configuration: Configuration,
    pub view: View,
    pub source: Source,
    pub destination: Destination,
}

/// Persistence seam used by the coordinator and the cancellation path.
#[async_trait]
pub trait TransferStore: Send + Sync {
    /// Loads a transfer together with its configuration graph.
    async fn transfer_bundle(&self, transfer_id: i64) -> SluiceResult<Option<TransferBundle>>;

    /// Atomically transitions a transfer from STARTED to PENDING.
    ///
    /// This is the sole concurrency guard for transfer processing: the write
    /// must be a single atomic compare-and-set, and returns `false` when the
    /// transfer was not in STARTED (someone else claimed or terminated it).
    async fn mark_transfer_pending(&self, transfer_id: i64) -> SluiceResult<bool>;

    /// Cancels a non-terminal transfer on behalf of the user.
    ///
    /// Returns the updated transfer, [`Ok(None)`] when the transfer does not
    /// exist, and fails with [`ErrorKind::InvalidState`] when it already
    /// reached a terminal state.
    async fn cancel_transfer(&self, transfer_id: i64) -> SluiceResult<Option<Transfer>>;

    /// Finalizes a transfer into a terminal state, recording the finalized
    /// timestamp and, for object-store destinations, the result object URL.
    async fn finalize_transfer(
        &self,
        transfer_id: i64,
        status: TransferStatus,
        object_url: Option<String>,
    ) -> SluiceResult<()>;

    /// Persists a new watermark onto the destination.
    ///
    /// Called only after a destination-side commit succeeded; a FAILED
    /// transfer never advances the watermark.
    async fn advance_watermark(
        &self,
        destination_id: i64,
        watermark: DateTime<Utc>,
    ) -> SluiceResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, pk: bool, lm: bool, tenant: bool) -> ViewColumn {
        ViewColumn {
            name: name.to_string(),
            data_type: "text".to_string(),
            is_primary_key: pk,
            is_last_modified: lm,
            is_tenant_column: tenant,
        }
    }

    #[test]
    fn tagged_column_invariant_requires_all_three() {
        let mut view = View {
            id: 1,
            source_id: 1,
            table_name: "orders".to_string(),
            columns: vec![
                column("id", true, false, false),
                column("updated_at", false, true, false),
                column("tenant_id", false, false, true),
            ],
        };
        assert!(view.validate_tagged_columns().is_ok());

        view.columns[2].is_tenant_column = false;
        let err = view.validate_tagged_columns().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingTaggedColumn);
    }

    #[test]
    fn tagged_column_invariant_rejects_duplicates() {
        let view = View {
            id: 1,
            source_id: 1,
            table_name: "orders".to_string(),
            columns: vec![
                column("id", true, false, false),
                column("other_id", true, false, false),
                column("updated_at", false, true, false),
                column("tenant_id", false, false, true),
            ],
        };

        assert!(view.validate_tagged_columns().is_err());
    }
}
