//! The staged-load protocol and its per-destination implementations.
//!
//! Every destination follows the same lifecycle, optionally wrapped in a
//! transaction: `create_table → stage → upsert → tear_down`. The concrete
//! steps differ per destination type and are selected once, through
//! [`new_loader`], so no call site ever switches on the destination type
//! itself.

mod bigquery;
mod object_store;
mod redshift;
mod snowflake;

pub use bigquery::BigQueryLoader;
pub use object_store::ObjectStoreLoader;
pub use redshift::RedshiftLoader;
pub use snowflake::SnowflakeLoader;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::connections::DialectAdapter;
use crate::egress::ByteStream;
use crate::error::{ErrorKind, SluiceResult};
use crate::query::builder::ColumnDef;
use crate::sluice_error;
use crate::storage::{ObjectStore, S3Config};
use crate::store::{Destination, DestinationType};

/// Destination-side identity of one load: generated names, columns and key.
#[derive(Debug, Clone)]
pub struct TableSpec {
    pub configuration_id: i64,
    /// Target table, derived from the destination nickname and configuration.
    pub table_name: String,
    /// Temporary stage/table, unique per transfer attempt.
    pub stage_name: String,
    /// Destination columns in projection order, with source types for DDL.
    pub columns: Vec<ColumnDef>,
    /// Destination-side name of the view's primary-key column, when mapped.
    pub primary_key: Option<String>,
}

impl TableSpec {
    /// Returns the destination column names in projection order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|column| column.name.clone()).collect()
    }

    /// Returns the primary key, failing the transfer when the view's key
    /// column is not part of the mapping.
    pub fn require_primary_key(&self) -> SluiceResult<&str> {
        self.primary_key.as_deref().ok_or_else(|| {
            sluice_error!(
                ErrorKind::MissingTaggedColumn,
                "Configuration does not map the view's primary-key column",
                format!("configuration {}", self.configuration_id)
            )
        })
    }
}

/// Derives the stable target table name for a configuration.
///
/// Deterministic per (nickname, configuration) so retries land on the same
/// table while staying human-traceable in the destination catalog.
pub fn unique_table_name(nickname: &str, configuration_id: i64) -> String {
    format!("SharedData_{}_{}", nickname.replace(' ', "_"), configuration_id)
}

/// Derives a per-attempt temporary stage name.
///
/// The creation timestamp keeps concurrent transfers to the same destination
/// from colliding on the stage.
pub fn temp_stage_name(configuration_id: i64) -> String {
    format!(
        "SharedData_TempStage_{}_{}",
        configuration_id,
        Utc::now().timestamp_millis()
    )
}

/// One destination's implementation of the staged-load lifecycle.
///
/// Steps execute strictly sequentially; later steps read artifacts written by
/// earlier ones. `create_table` is intentionally issued outside the
/// transaction, since warehouses auto-commit DDL: callers must not assume it
/// participates in rollback, and it is idempotent so retries are safe.
#[async_trait]
pub trait Loader: Send {
    /// Whether this destination wraps DML in a multi-statement transaction.
    fn supports_transactions(&self) -> bool {
        false
    }

    async fn begin_transaction(&mut self) -> SluiceResult<()> {
        Ok(())
    }

    /// Idempotently creates the schema and target table if absent.
    async fn create_table(&mut self) -> SluiceResult<()>;

    /// Writes the compressed row stream to the destination's intermediate
    /// location and points the destination at it.
    async fn stage(&mut self, data: ByteStream) -> SluiceResult<()>;

    /// Merges the staged rows into the target table, keyed on the primary
    /// key. Requires the primary key to be mapped; absence is fatal.
    async fn upsert(&mut self) -> SluiceResult<()>;

    /// Drops the temporary stage and removes intermediate staged objects.
    ///
    /// Best-effort: a failure here does not revert a successful upsert.
    async fn tear_down(&mut self) -> SluiceResult<()>;

    async fn commit_transaction(&mut self) -> SluiceResult<()> {
        Ok(())
    }

    async fn rollback_transaction(&mut self) -> SluiceResult<()> {
        Ok(())
    }

    /// The result object URL, present only for direct object-store loads.
    fn object_url(&self) -> Option<&str> {
        None
    }
}

/// Everything a loader might need; which parts are required depends on the
/// destination type.
pub struct LoaderParams {
    pub destination: Destination,
    pub spec: TableSpec,
    /// Destination connection; absent for direct object-store loads.
    pub adapter: Option<Arc<dyn DialectAdapter>>,
    /// Where `stage` uploads: the provisioned bucket, or the destination's
    /// staging bucket for BigQuery.
    pub objects: Arc<dyn ObjectStore>,
    /// Credentials embedded into warehouse `COPY`/`CREATE STAGE` statements.
    pub s3: Option<S3Config>,
}

/// Builds the loader for a destination type.
///
/// The single dispatch point over the destination tagged union; the match is
/// exhaustive, so an unhandled destination type is a compile error rather than
/// a runtime fallthrough.
pub fn new_loader(params: LoaderParams) -> SluiceResult<Box<dyn Loader>> {
    match params.destination.destination_type {
        DestinationType::ObjectStore => Ok(Box::new(ObjectStoreLoader::new(params.objects))),
        DestinationType::Snowflake => {
            let loader = SnowflakeLoader::new(
                require_adapter(&params)?,
                params.spec,
                require_field(params.destination.schema.clone(), "schema")?,
                require_field(params.destination.database.clone(), "database")?,
                params.objects,
                require_s3(params.s3)?,
            );
            Ok(Box::new(loader))
        }
        DestinationType::Redshift => {
            let loader = RedshiftLoader::new(
                require_adapter(&params)?,
                params.spec,
                require_field(params.destination.schema.clone(), "schema")?,
                params.objects,
                require_s3(params.s3)?,
            );
            Ok(Box::new(loader))
        }
        DestinationType::BigQuery => {
            let loader = BigQueryLoader::new(
                require_adapter(&params)?,
                params.spec,
                require_field(params.destination.database.clone(), "project")?,
                require_field(params.destination.schema.clone(), "dataset")?,
                params.objects,
            );
            Ok(Box::new(loader))
        }
    }
}

fn require_adapter(params: &LoaderParams) -> SluiceResult<Arc<dyn DialectAdapter>> {
    params.adapter.clone().ok_or_else(|| {
        sluice_error!(
            ErrorKind::MissingCredentials,
            "Destination connection is required for warehouse loads"
        )
    })
}

fn require_field(field: Option<String>, name: &'static str) -> SluiceResult<String> {
    field.ok_or_else(|| {
        sluice_error!(
            ErrorKind::MissingCredentials,
            "Incomplete credentials for destination",
            name
        )
    })
}

fn require_s3(s3: Option<S3Config>) -> SluiceResult<S3Config> {
    s3.ok_or_else(|| {
        sluice_error!(
            ErrorKind::MissingCredentials,
            "Staging credentials are required for warehouse loads"
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_are_deterministic_and_traceable() {
        assert_eq!(
            unique_table_name("Acme Corp", 7),
            "SharedData_Acme_Corp_7"
        );
        assert_eq!(
            unique_table_name("Acme Corp", 7),
            unique_table_name("Acme Corp", 7)
        );
    }

    #[test]
    fn stage_names_embed_the_configuration() {
        let name = temp_stage_name(42);
        assert!(name.starts_with("SharedData_TempStage_42_"));
    }

    #[test]
    fn missing_primary_key_is_fatal() {
        let spec = TableSpec {
            configuration_id: 1,
            table_name: "t".to_string(),
            stage_name: "s".to_string(),
            columns: Vec::new(),
            primary_key: None,
        };

        let err = spec.require_primary_key().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingTaggedColumn);
    }
}
