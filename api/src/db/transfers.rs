use chrono::{DateTime, Utc};
use serde::Serialize;
use sluice::transfer::TransferStatus;
use sqlx::{Executor, PgPool, Postgres, Row as _};

#[derive(Debug, Serialize)]
pub struct TransferRecord {
    pub id: i64,
    pub configuration_id: i64,
    pub status: TransferStatus,
    pub finalized_at: Option<DateTime<Utc>>,
    pub object_url: Option<String>,
}

/// Creates a transfer in the STARTED state for the worker to claim.
pub async fn create_transfer<'c, E>(executor: E, configuration_id: i64) -> Result<i64, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let row = sqlx::query(
        "insert into transfers (configuration_id, status) values ($1, 'started') returning id",
    )
    .bind(configuration_id)
    .fetch_one(executor)
    .await?;

    row.try_get("id")
}

pub async fn list_transfers(pool: &PgPool) -> Result<Vec<TransferRecord>, sqlx::Error> {
    let rows = sqlx::query(
        "select id, configuration_id, status, finalized_at, object_url \
         from transfers order by id",
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(record_from_row).collect()
}

pub async fn read_transfer(
    pool: &PgPool,
    id: i64,
) -> Result<Option<TransferRecord>, sqlx::Error> {
    let row = sqlx::query(
        "select id, configuration_id, status, finalized_at, object_url \
         from transfers where id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(record_from_row).transpose()
}

fn record_from_row(row: &sqlx::postgres::PgRow) -> Result<TransferRecord, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let status =
        TransferStatus::parse(&status).map_err(|err| sqlx::Error::Decode(err.into()))?;

    Ok(TransferRecord {
        id: row.try_get("id")?,
        configuration_id: row.try_get("configuration_id")?,
        status,
        finalized_at: row.try_get("finalized_at")?,
        object_url: row.try_get("object_url")?,
    })
}
