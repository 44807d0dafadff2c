use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::connections::DialectAdapter;
use crate::egress::ByteStream;
use crate::error::{ErrorKind, SluiceResult};
use crate::loaders::{Loader, TableSpec};
use crate::query::builder;
use crate::sluice_error;
use crate::storage::ObjectStore;

/// Staged load into BigQuery.
///
/// The compressed extract is uploaded into the destination's dedicated
/// staging bucket, an external table is registered over the object, and a
/// MERGE folds it into the target table. BigQuery auto-commits every
/// statement, so the lifecycle runs without a wrapping transaction.
pub struct BigQueryLoader {
    adapter: Arc<dyn DialectAdapter>,
    spec: TableSpec,
    project: String,
    dataset: String,
    staging: Arc<dyn ObjectStore>,
}

impl BigQueryLoader {
    pub fn new(
        adapter: Arc<dyn DialectAdapter>,
        spec: TableSpec,
        project: String,
        dataset: String,
        staging: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            adapter,
            spec,
            project,
            dataset,
            staging,
        }
    }

    fn staged_prefix(&self) -> String {
        format!("bigquery/{}", self.spec.configuration_id)
    }
}

#[async_trait]
impl Loader for BigQueryLoader {
    async fn create_table(&mut self) -> SluiceResult<()> {
        self.adapter
            .query_unsafe(&builder::bigquery_create_schema(
                &self.project,
                &self.dataset,
            ))
            .await?;
        self.adapter
            .query_unsafe(&builder::bigquery_create_table(
                &self.project,
                &self.dataset,
                &self.spec.table_name,
                &self.spec.columns,
            ))
            .await?;

        Ok(())
    }

    async fn stage(&mut self, data: ByteStream) -> SluiceResult<()> {
        let key = format!("{}/{}.gz", self.staged_prefix(), uuid::Uuid::new_v4());

        self.staging.upload(&key, data).await.map_err(|err| {
            sluice_error!(
                ErrorKind::StagingFailure,
                "Could not upload to the staging bucket",
                key.clone(),
                source: err
            )
        })?;

        let external_table = builder::bigquery_external_table(
            &self.project,
            &self.dataset,
            &self.spec.stage_name,
            &self.spec.columns,
            &self.staging.object_uri(&key),
        );
        self.adapter
            .query_unsafe(&external_table)
            .await
            .map_err(|err| {
                sluice_error!(
                    ErrorKind::StagingFailure,
                    "Could not register external table",
                    source: err
                )
            })?;

        info!(stage = %self.spec.stage_name, "staged transfer into BigQuery");

        Ok(())
    }

    async fn upsert(&mut self) -> SluiceResult<()> {
        let primary_key = self.spec.require_primary_key()?.to_string();
        let merge = builder::bigquery_merge(
            &self.project,
            &self.dataset,
            &self.spec.table_name,
            &self.spec.stage_name,
            &self.spec.column_names(),
            &primary_key,
        );

        self.adapter.query_unsafe(&merge).await.map_err(|err| {
            sluice_error!(
                ErrorKind::UpsertFailure,
                "BigQuery merge failed",
                source: err
            )
        })?;

        Ok(())
    }

    async fn tear_down(&mut self) -> SluiceResult<()> {
        self.adapter
            .query_unsafe(&builder::bigquery_drop_table(
                &self.project,
                &self.dataset,
                &self.spec.stage_name,
            ))
            .await?;

        if let Err(err) = self.staging.delete_prefix(&self.staged_prefix()).await {
            warn!(error = %err, "failed to delete staged objects from GCS");
        }

        Ok(())
    }
}
