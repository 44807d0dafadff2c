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

/// Staged load into Snowflake.
///
/// The compressed extract is uploaded to the provisioned bucket, a named
/// stage is created over it, and a MERGE folds the staged rows into the
/// target table. Stage and merge run inside one transaction; the stage DDL
/// itself goes through `query_unsafe` since Snowflake cannot parameterize
/// `CREATE STAGE` credentials.
pub struct SnowflakeLoader {
    adapter: Arc<dyn DialectAdapter>,
    spec: TableSpec,
    schema: String,
    database: String,
    objects: Arc<dyn ObjectStore>,
    s3: S3Config,
}

impl SnowflakeLoader {
    pub fn new(
        adapter: Arc<dyn DialectAdapter>,
        spec: TableSpec,
        schema: String,
        database: String,
        objects: Arc<dyn ObjectStore>,
        s3: S3Config,
    ) -> Self {
        Self {
            adapter,
            spec,
            schema,
            database,
            objects,
            s3,
        }
    }
}

#[async_trait]
impl Loader for SnowflakeLoader {
    fn supports_transactions(&self) -> bool {
        true
    }

    async fn begin_transaction(&mut self) -> SluiceResult<()> {
        self.adapter.query(&builder::begin_transaction()).await?;

        Ok(())
    }

    async fn create_table(&mut self) -> SluiceResult<()> {
        self.adapter
            .query(&Statement::raw(builder::snowflake_create_schema(
                &self.database,
                &self.schema,
            )))
            .await?;
        self.adapter
            .query(&Statement::raw(builder::snowflake_create_table(
                &self.schema,
                &self.spec.table_name,
                &self.spec.columns,
            )))
            .await?;

        Ok(())
    }

    async fn stage(&mut self, data: ByteStream) -> SluiceResult<()> {
        let prefix = format!("snowflake/{}", self.spec.configuration_id);
        let key = format!("{prefix}/{}.gz", uuid::Uuid::new_v4());

        self.objects.upload(&key, data).await.map_err(|err| {
            sluice_error!(
                ErrorKind::StagingFailure,
                "Could not upload staged object",
                key.clone(),
                source: err
            )
        })?;

        let stage_sql = builder::snowflake_create_stage(
            &self.schema,
            &self.spec.stage_name,
            &self.objects.object_uri(&key),
            &self.s3.access_key_id,
            self.s3.secret_access_key.expose_secret(),
            &self.s3.kms_key_id,
        );
        self.adapter.query_unsafe(&stage_sql).await.map_err(|err| {
            sluice_error!(
                ErrorKind::StagingFailure,
                "Could not create Snowflake stage",
                source: err
            )
        })?;

        info!(stage = %self.spec.stage_name, "staged transfer into Snowflake");

        Ok(())
    }

    async fn upsert(&mut self) -> SluiceResult<()> {
        let primary_key = self.spec.require_primary_key()?.to_string();
        let merge = builder::snowflake_merge(
            &self.schema,
            &self.spec.table_name,
            &self.spec.stage_name,
            &self.spec.column_names(),
            &primary_key,
        );

        self.adapter
            .query(&Statement::raw(merge))
            .await
            .map_err(|err| {
                sluice_error!(
                    ErrorKind::UpsertFailure,
                    "Snowflake merge failed",
                    source: err
                )
            })?;

        Ok(())
    }

    async fn tear_down(&mut self) -> SluiceResult<()> {
        self.adapter
            .query(&Statement::raw(builder::snowflake_remove_stage_files(
                &self.schema,
                &self.spec.stage_name,
            )))
            .await?;
        self.adapter
            .query(&Statement::raw(builder::snowflake_drop_stage(
                &self.schema,
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
