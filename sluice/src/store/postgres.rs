use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row as _};

use crate::connections::EngineType;
use crate::error::SluiceResult;
use crate::store::{
    ColumnMapping, Configuration, Destination, DestinationType, Source, Transfer, TransferBundle,
    TransferStore, View, ViewColumn,
};
use crate::transfer::TransferStatus;

/// Postgres-backed [`TransferStore`] over the application database.
///
/// View columns and configuration column mappings are persisted as `jsonb`
/// documents on their parent rows; everything else is plain columns.
#[derive(Clone)]
pub struct PgTransferStore {
    pool: PgPool,
}

impl PgTransferStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_transfer(&self, transfer_id: i64) -> SluiceResult<Option<Transfer>> {
        let row = sqlx::query(
            "select id, configuration_id, status, finalized_at, object_url \
             from transfers where id = $1",
        )
        .bind(transfer_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| transfer_from_row(&row)).transpose()
    }
}

#[async_trait]
impl TransferStore for PgTransferStore {
    async fn transfer_bundle(&self, transfer_id: i64) -> SluiceResult<Option<TransferBundle>> {
        let Some(transfer) = self.load_transfer(transfer_id).await? else {
            return Ok(None);
        };

        let Some(configuration_row) = sqlx::query(
            "select id, view_id, destination_id, tenant_id, columns \
             from configurations where id = $1",
        )
        .bind(transfer.configuration_id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };
        let configuration = configuration_from_row(&configuration_row)?;

        let Some(view_row) = sqlx::query(
            "select id, source_id, table_name, columns from views where id = $1",
        )
        .bind(configuration.view_id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };
        let view = view_from_row(&view_row)?;

        let Some(source_row) = sqlx::query(
            "select id, nickname, engine, host, port, username, password, database_name \
             from sources where id = $1",
        )
        .bind(view.source_id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };
        let source = source_from_row(&source_row)?;

        let Some(destination_row) = sqlx::query(
            "select id, nickname, destination_type, host, port, username, password, \
             database_name, schema_name, warehouse, service_account_json, staging_bucket, \
             last_modified_at from destinations where id = $1",
        )
        .bind(configuration.destination_id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };
        let destination = destination_from_row(&destination_row)?;

        Ok(Some(TransferBundle {
            transfer,
            configuration,
            view,
            source,
            destination,
        }))
    }

    async fn mark_transfer_pending(&self, transfer_id: i64) -> SluiceResult<bool> {
        // Single-statement compare-and-set: this is the mutual-exclusion
        // mechanism between workers, not a read-then-write.
        let result = sqlx::query("update transfers set status = 'pending' where id = $1 and status = 'started'")
            .bind(transfer_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn cancel_transfer(&self, transfer_id: i64) -> SluiceResult<Option<Transfer>> {
        let row = sqlx::query(
            "update transfers set status = 'cancelled', finalized_at = now() \
             where id = $1 and status in ('started', 'pending') \
             returning id, configuration_id, status, finalized_at, object_url",
        )
        .bind(transfer_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Ok(Some(transfer_from_row(&row)?));
        }

        // Distinguish "not found" from "terminal": the former is the caller's
        // lookup problem, the latter a precondition failure.
        match self.load_transfer(transfer_id).await? {
            None => Ok(None),
            Some(transfer) => {
                transfer.status.check_cancellable()?;
                Ok(Some(transfer))
            }
        }
    }

    async fn finalize_transfer(
        &self,
        transfer_id: i64,
        status: TransferStatus,
        object_url: Option<String>,
    ) -> SluiceResult<()> {
        sqlx::query(
            "update transfers set status = $2, finalized_at = now(), object_url = $3 \
             where id = $1",
        )
        .bind(transfer_id)
        .bind(status.as_static_str())
        .bind(object_url)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn advance_watermark(
        &self,
        destination_id: i64,
        watermark: DateTime<Utc>,
    ) -> SluiceResult<()> {
        sqlx::query("update destinations set last_modified_at = $2 where id = $1")
            .bind(destination_id)
            .bind(watermark)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

fn transfer_from_row(row: &PgRow) -> SluiceResult<Transfer> {
    let status: String = row.try_get("status")?;

    Ok(Transfer {
        id: row.try_get("id")?,
        configuration_id: row.try_get("configuration_id")?,
        status: TransferStatus::parse(&status)?,
        finalized_at: row.try_get("finalized_at")?,
        object_url: row.try_get("object_url")?,
    })
}

fn configuration_from_row(row: &PgRow) -> SluiceResult<Configuration> {
    let columns: serde_json::Value = row.try_get("columns")?;
    let columns: Vec<ColumnMapping> = serde_json::from_value(columns)?;

    Ok(Configuration {
        id: row.try_get("id")?,
        view_id: row.try_get("view_id")?,
        destination_id: row.try_get("destination_id")?,
        tenant_id: row.try_get("tenant_id")?,
        columns,
    })
}

fn view_from_row(row: &PgRow) -> SluiceResult<View> {
    let columns: serde_json::Value = row.try_get("columns")?;
    let columns: Vec<ViewColumn> = serde_json::from_value(columns)?;

    Ok(View {
        id: row.try_get("id")?,
        source_id: row.try_get("source_id")?,
        table_name: row.try_get("table_name")?,
        columns,
    })
}

fn source_from_row(row: &PgRow) -> SluiceResult<Source> {
    let engine: String = row.try_get("engine")?;
    let engine = EngineType::parse(&engine)?;
    let port: i32 = row.try_get("port")?;
    let password: Option<String> = row.try_get("password")?;

    Ok(Source {
        id: row.try_get("id")?,
        nickname: row.try_get("nickname")?,
        engine,
        host: row.try_get("host")?,
        port: port as u16,
        username: row.try_get("username")?,
        password: password.map(SecretString::new),
        database: row.try_get("database_name")?,
    })
}

fn destination_from_row(row: &PgRow) -> SluiceResult<Destination> {
    let destination_type: String = row.try_get("destination_type")?;
    let port: Option<i32> = row.try_get("port")?;
    let password: Option<String> = row.try_get("password")?;

    Ok(Destination {
        id: row.try_get("id")?,
        nickname: row.try_get("nickname")?,
        destination_type: DestinationType::parse(&destination_type)?,
        host: row.try_get("host")?,
        port: port.map(|port| port as u16),
        username: row.try_get("username")?,
        password: password.map(SecretString::new),
        database: row.try_get("database_name")?,
        schema: row.try_get("schema_name")?,
        warehouse: row.try_get("warehouse")?,
        service_account_json: row.try_get("service_account_json")?,
        staging_bucket: row.try_get("staging_bucket")?,
        last_modified_at: row.try_get("last_modified_at")?,
    })
}
