use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::connections::{ConnectionParams, EngineType, PoolRegistry};
use crate::egress::csv_gzip_stream;
use crate::error::{ErrorKind, SluiceError, SluiceResult};
use crate::loaders::{
    Loader, LoaderParams, TableSpec, new_loader, temp_stage_name, unique_table_name,
};
use crate::query::builder;
use crate::query::builder::ColumnDef;
use crate::sluice_error;
use crate::storage::{ObjectStore, S3Config, StagingStoreFactory};
use crate::store::{Destination, DestinationType, TransferBundle, TransferStore};
use crate::transfer::TransferStatus;

/// Orchestrates one transfer end to end.
///
/// The coordinator resolves the transfer's configuration graph, computes the
/// incremental extraction bound, streams matching rows through CSV and gzip,
/// drives the destination's staged-load lifecycle, and finalizes the transfer.
/// The watermark advances only after the destination-side commit succeeded,
/// so a failed transfer re-extracts the same window on its next attempt.
pub struct TransferCoordinator {
    store: Arc<dyn TransferStore>,
    pools: Arc<PoolRegistry>,
    objects: Arc<dyn ObjectStore>,
    staging: Arc<dyn StagingStoreFactory>,
    s3: S3Config,
}

/// How a successfully executed transfer ended.
enum Outcome {
    /// Zero rows matched the tenant filter: nothing to sync.
    Cancelled,
    Complete {
        watermark: DateTime<Utc>,
        object_url: Option<String>,
    },
}

/// An execution error, carrying the loader when a transaction must be rolled
/// back before finalizing.
struct Failure {
    error: SluiceError,
    rollback: Option<Box<dyn Loader>>,
}

impl Failure {
    fn new(error: SluiceError) -> Self {
        Self {
            error,
            rollback: None,
        }
    }
}

impl From<SluiceError> for Failure {
    fn from(error: SluiceError) -> Self {
        Failure::new(error)
    }
}

impl TransferCoordinator {
    pub fn new(
        store: Arc<dyn TransferStore>,
        pools: Arc<PoolRegistry>,
        objects: Arc<dyn ObjectStore>,
        staging: Arc<dyn StagingStoreFactory>,
        s3: S3Config,
    ) -> Self {
        Self {
            store,
            pools,
            objects,
            staging,
            s3,
        }
    }

    /// Processes one transfer by id, finalizing it into a terminal state.
    ///
    /// The transfer must be in STARTED; the STARTED→PENDING transition is a
    /// single atomic write and the sole concurrency guard, so a transfer is
    /// processed at most once even with competing workers.
    pub async fn process_transfer(&self, transfer_id: i64) -> SluiceResult<TransferStatus> {
        let Some(bundle) = self.store.transfer_bundle(transfer_id).await? else {
            return Err(sluice_error!(
                ErrorKind::ValidationError,
                "Transfer does not exist",
                transfer_id
            ));
        };

        if bundle.transfer.status != TransferStatus::Started {
            return Err(sluice_error!(
                ErrorKind::InvalidState,
                "Transfer has already been processed",
                format!("transfer {transfer_id} is {}", bundle.transfer.status)
            ));
        }

        if !self.store.mark_transfer_pending(transfer_id).await? {
            return Err(sluice_error!(
                ErrorKind::InvalidState,
                "Transfer was claimed concurrently",
                transfer_id
            ));
        }

        info!(transfer_id, tenant = %bundle.configuration.tenant_id, "processing transfer");

        match self.execute(&bundle).await {
            Ok(Outcome::Cancelled) => {
                warn!(transfer_id, "zero rows matched, cancelling transfer");
                self.store
                    .finalize_transfer(transfer_id, TransferStatus::Cancelled, None)
                    .await?;

                Ok(TransferStatus::Cancelled)
            }
            Ok(Outcome::Complete {
                watermark,
                object_url,
            }) => {
                self.store
                    .advance_watermark(bundle.destination.id, watermark)
                    .await?;
                self.store
                    .finalize_transfer(transfer_id, TransferStatus::Complete, object_url)
                    .await?;

                info!(transfer_id, %watermark, "transfer complete");

                Ok(TransferStatus::Complete)
            }
            Err(failure) => {
                if let Some(mut loader) = failure.rollback {
                    // Best-effort: a rollback failure is logged but never
                    // masks the original error.
                    if let Err(rollback_err) = loader.rollback_transaction().await {
                        warn!(transfer_id, error = %rollback_err, "rollback failed");
                    }
                }

                warn!(transfer_id, error = %failure.error, "transfer failed");
                self.store
                    .finalize_transfer(transfer_id, TransferStatus::Failed, None)
                    .await?;

                Err(failure.error)
            }
        }
    }

    async fn execute(&self, bundle: &TransferBundle) -> Result<Outcome, Failure> {
        let view = &bundle.view;
        let configuration = &bundle.configuration;
        let destination = &bundle.destination;

        // The extraction contract: exactly one primary-key, last-modified and
        // tenant column, checked before any connection is opened.
        view.validate_tagged_columns()?;
        let last_modified_column = view.last_modified_column().expect("validated").name.clone();
        let tenant_column = view.tenant_column().expect("validated").name.clone();

        // Destination credentials are verified before any pool is acquired,
        // so a misconfigured destination fails without touching the source.
        destination.validate_credentials()?;

        let source = self
            .pools
            .acquire(&bundle.source.connection_params())
            .await
            .map_err(|err| {
                Failure::new(sluice_error!(
                    ErrorKind::ConnectionRefused,
                    "Source is unreachable",
                    format!("source {}", bundle.source.id),
                    source: err
                ))
            })?;

        let probe = builder::max_last_modified(
            bundle.source.engine,
            &view.table_name,
            &last_modified_column,
            &tenant_column,
            &configuration.tenant_id,
        );
        let rows = source.query(&probe).await?;
        let Some(newest) = rows.first() else {
            return Ok(Outcome::Cancelled);
        };
        let watermark = newest
            .get(&last_modified_column)
            .and_then(|value| value.as_timestamp())
            .ok_or_else(|| {
                sluice_error!(
                    ErrorKind::ValidationError,
                    "Last-modified column is not a timestamp",
                    last_modified_column.clone()
                )
            })?;

        let view_columns: Vec<String> =
            view.columns.iter().map(|column| column.name.clone()).collect();
        let mappings: Vec<(String, String)> = configuration
            .columns
            .iter()
            .map(|mapping| {
                (
                    mapping.name_in_source.clone(),
                    mapping.name_in_destination.clone(),
                )
            })
            .collect();
        let extraction = builder::extraction(
            bundle.source.engine,
            &view.table_name,
            &view_columns,
            &mappings,
            &tenant_column,
            &configuration.tenant_id,
            &last_modified_column,
            destination.last_modified_at,
        );

        let row_stream = source.query_stream(&extraction).await?;
        let header: Vec<String> = mappings.iter().map(|(_, dest)| dest.clone()).collect();
        let data = csv_gzip_stream(header, row_stream);

        let spec = table_spec(bundle)?;
        let mut loader = self.build_loader(destination, spec).await?;

        let mut transaction_begun = false;
        let result = async {
            if loader.supports_transactions() {
                loader.begin_transaction().await?;
                transaction_begun = true;
            }

            loader.create_table().await?;
            loader.stage(data).await?;
            loader.upsert().await?;
            loader.tear_down().await?;

            if transaction_begun {
                loader.commit_transaction().await?;
            }

            Ok::<_, SluiceError>(())
        }
        .await;

        match result {
            Ok(()) => Ok(Outcome::Complete {
                watermark,
                object_url: loader.object_url().map(ToString::to_string),
            }),
            Err(error) => Err(Failure {
                error,
                rollback: transaction_begun.then_some(loader),
            }),
        }
    }

    async fn build_loader(
        &self,
        destination: &Destination,
        spec: TableSpec,
    ) -> Result<Box<dyn Loader>, Failure> {
        let params = match destination.destination_type {
            DestinationType::ObjectStore => LoaderParams {
                destination: destination.clone(),
                spec,
                adapter: None,
                objects: self.objects.clone(),
                s3: None,
            },
            DestinationType::Snowflake | DestinationType::Redshift => {
                let adapter = self
                    .pools
                    .acquire(&destination_params(destination))
                    .await
                    .map_err(|err| destination_unreachable(destination, err))?;

                LoaderParams {
                    destination: destination.clone(),
                    spec,
                    adapter: Some(adapter),
                    objects: self.objects.clone(),
                    s3: Some(self.s3.clone()),
                }
            }
            DestinationType::BigQuery => {
                let adapter = self
                    .pools
                    .acquire(&destination_params(destination))
                    .await
                    .map_err(|err| destination_unreachable(destination, err))?;

                let bucket = destination.staging_bucket.as_deref().unwrap_or_default();
                let credential = destination.service_account_json.as_deref().unwrap_or_default();
                let staging = self
                    .staging
                    .staging_bucket(bucket, credential)
                    .await
                    .map_err(|err| {
                        Failure::new(sluice_error!(
                            ErrorKind::ConnectionRefused,
                            "Staging bucket is unreachable",
                            format!("destination {}", destination.id),
                            source: err
                        ))
                    })?;

                LoaderParams {
                    destination: destination.clone(),
                    spec,
                    adapter: Some(adapter),
                    objects: staging,
                    s3: None,
                }
            }
        };

        Ok(new_loader(params)?)
    }
}

fn destination_unreachable(destination: &Destination, err: SluiceError) -> Failure {
    Failure::new(sluice_error!(
        ErrorKind::ConnectionRefused,
        "Destination is unreachable",
        format!("destination {}", destination.id),
        source: err
    ))
}

/// Builds the destination-side table spec from the configuration mapping.
///
/// Columns keep the mapping's projection order, which is also the order the
/// egress stream writes; the primary key is translated from its view name to
/// its destination name.
fn table_spec(bundle: &TransferBundle) -> SluiceResult<TableSpec> {
    let view = &bundle.view;
    let configuration = &bundle.configuration;

    let mut columns = Vec::with_capacity(configuration.columns.len());
    for mapping in &configuration.columns {
        let view_column = view
            .columns
            .iter()
            .find(|column| column.name == mapping.name_in_source)
            .ok_or_else(|| {
                sluice_error!(
                    ErrorKind::ValidationError,
                    "Configuration maps a column the view does not declare",
                    mapping.name_in_source.clone()
                )
            })?;

        columns.push(ColumnDef {
            name: mapping.name_in_destination.clone(),
            source_type: view_column.data_type.clone(),
        });
    }

    let primary_key = view.primary_key_column().and_then(|key| {
        configuration
            .columns
            .iter()
            .find(|mapping| mapping.name_in_source == key.name)
            .map(|mapping| mapping.name_in_destination.clone())
    });

    Ok(TableSpec {
        configuration_id: configuration.id,
        table_name: unique_table_name(&bundle.destination.nickname, configuration.id),
        stage_name: temp_stage_name(configuration.id),
        columns,
        primary_key,
    })
}

/// Connection parameters for a warehouse destination.
pub fn destination_params(destination: &Destination) -> ConnectionParams {
    let engine = match destination.destination_type {
        DestinationType::Snowflake => EngineType::Snowflake,
        DestinationType::Redshift => EngineType::Redshift,
        DestinationType::BigQuery => EngineType::BigQuery,
        // Object-store destinations never open a database connection.
        DestinationType::ObjectStore => EngineType::Postgres,
    };

    ConnectionParams {
        engine,
        host: destination.host.clone(),
        port: destination.port,
        username: destination.username.clone().unwrap_or_default(),
        password: destination.password.clone(),
        database: destination.database.clone().unwrap_or_default(),
        schema: destination.schema.clone(),
        warehouse: destination.warehouse.clone(),
        service_account: destination.service_account_json.clone(),
    }
}
