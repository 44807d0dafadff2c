use std::sync::Arc;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use tracing::info;

use crate::connections::DialectAdapter;
use crate::egress::ByteStream;
use crate::error::{ErrorKind, SluiceResult};
use crate::loaders::{Loader, TableSpec};
use crate::query::builder;
use crate::sluice_error;
use crate::storage::{ObjectStore, S3Config};
use crate::types::Statement;

/// Staged load into Redshift.
///
/// The compressed extract is uploaded to the provisioned bucket and `COPY`ed
/// into a temporary table shaped like the target. Redshift has no native
/// MERGE, so the upsert decomposes into update, delete-applied, insert.
pub struct RedshiftLoader {
    adapter: Arc<dyn DialectAdapter>,
    spec: TableSpec,
    schema: String,
    objects: Arc<dyn ObjectStore>,
    s3: S3Config,
}

impl RedshiftLoader {
    pub fn new(
        adapter: Arc<dyn DialectAdapter>,
        spec: TableSpec,
        schema: String,
        objects: Arc<dyn ObjectStore>,
        s3: S3Config,
    ) -> Self {
        Self {
            adapter,
            spec,
            schema,
            objects,
            s3,
        }
    }

    fn staged_prefix(&self) -> String {
        format!("redshift/{}", self.spec.configuration_id)
    }
}

#[async_trait]
impl Loader for RedshiftLoader {
    fn supports_transactions(&self) -> bool {
        true
    }

    async fn begin_transaction(&mut self) -> SluiceResult<()> {
        self.adapter.query(&builder::begin_transaction()).await?;

        Ok(())
    }

    async fn create_table(&mut self) -> SluiceResult<()> {
        self.adapter
            .query(&Statement::raw(builder::redshift_create_schema(
                &self.schema,
            )))
            .await?;
        self.adapter
            .query(&Statement::raw(builder::redshift_create_table(
                &self.spec.table_name,
                &self.spec.columns,
            )))
            .await?;

        Ok(())
    }

    async fn stage(&mut self, data: ByteStream) -> SluiceResult<()> {
        self.adapter
            .query(&Statement::raw(builder::redshift_create_stage_table(
                &self.spec.stage_name,
                &self.spec.table_name,
            )))
            .await
            .map_err(|err| {
                sluice_error!(
                    ErrorKind::StagingFailure,
                    "Could not create Redshift staging table",
                    source: err
                )
            })?;

        let key = format!("{}/{}.gz", self.staged_prefix(), uuid::Uuid::new_v4());
        self.objects.upload(&key, data).await.map_err(|err| {
            sluice_error!(
                ErrorKind::StagingFailure,
                "Could not upload staged object",
                key.clone(),
                source: err
            )
        })?;

        let copy_sql = builder::redshift_copy(
            &self.spec.stage_name,
            &self.objects.object_uri(&key),
            &self.s3.access_key_id,
            self.s3.secret_access_key.expose_secret(),
        );
        self.adapter.query_unsafe(&copy_sql).await.map_err(|err| {
            sluice_error!(
                ErrorKind::StagingFailure,
                "Redshift COPY failed",
                source: err
            )
        })?;

        info!(stage = %self.spec.stage_name, "staged transfer into Redshift");

        Ok(())
    }

    async fn upsert(&mut self) -> SluiceResult<()> {
        let primary_key = self.spec.require_primary_key()?.to_string();
        let statements = builder::redshift_upsert(
            &self.spec.table_name,
            &self.spec.stage_name,
            &self.spec.column_names(),
            &primary_key,
        );

        for sql in statements {
            self.adapter
                .query(&Statement::raw(sql))
                .await
                .map_err(|err| {
                    sluice_error!(
                        ErrorKind::UpsertFailure,
                        "Redshift upsert failed",
                        source: err
                    )
                })?;
        }

        Ok(())
    }

    async fn tear_down(&mut self) -> SluiceResult<()> {
        self.objects.delete_prefix(&self.staged_prefix()).await?;

        self.adapter
            .query(&Statement::raw(builder::redshift_drop_table(
                &self.spec.stage_name,
            )))
            .await?;

        Ok(())
    }

    async fn commit_transaction(&mut self) -> SluiceResult<()> {
        self.adapter.query(&builder::commit_transaction()).await?;

        Ok(())
    }

    async fn rollback_transaction(&mut self) -> SluiceResult<()> {
        self.adapter.query(&builder::rollback_transaction()).await?;

        Ok(())
    }
}
