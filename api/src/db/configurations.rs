use serde::{Deserialize, Serialize};
use sluice::store::ColumnMapping;
use sqlx::{Executor, PgPool, Postgres, Row as _};

/// Request payload for creating a configuration.
#[derive(Debug, Deserialize)]
pub struct NewConfiguration {
    pub view_id: i64,
    pub destination_id: i64,
    pub tenant_id: String,
    pub columns: Vec<ColumnMapping>,
}

#[derive(Debug, Serialize)]
pub struct ConfigurationRecord {
    pub id: i64,
    pub view_id: i64,
    pub destination_id: i64,
    pub tenant_id: String,
    pub columns: Vec<ColumnMapping>,
}

pub async fn create_configuration<'c, E>(
    executor: E,
    configuration: &NewConfiguration,
) -> Result<i64, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let columns = serde_json::to_value(&configuration.columns)
        .map_err(|err| sqlx::Error::Encode(err.into()))?;

    let row = sqlx::query(
        "insert into configurations (view_id, destination_id, tenant_id, columns) \
         values ($1, $2, $3, $4) returning id",
    )
    .bind(configuration.view_id)
    .bind(configuration.destination_id)
    .bind(&configuration.tenant_id)
    .bind(columns)
    .fetch_one(executor)
    .await?;

    row.try_get("id")
}

pub async fn list_configurations(pool: &PgPool) -> Result<Vec<ConfigurationRecord>, sqlx::Error> {
    let rows = sqlx::query(
        "select id, view_id, destination_id, tenant_id, columns from configurations order by id",
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(record_from_row).collect()
}

pub async fn read_configuration(
    pool: &PgPool,
    id: i64,
) -> Result<Option<ConfigurationRecord>, sqlx::Error> {
    let row = sqlx::query(
        "select id, view_id, destination_id, tenant_id, columns from configurations where id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(record_from_row).transpose()
}

/// True when any transfer for this configuration is still in flight.
pub async fn has_active_transfers(pool: &PgPool, id: i64) -> Result<bool, sqlx::Error> {
    let row = sqlx::query(
        "select exists ( \
           select 1 from transfers \
           where configuration_id = $1 and status in ('started', 'pending') \
         ) as active",
    )
    .bind(id)
    .fetch_one(pool)
    .await?;

    row.try_get("active")
}

pub async fn delete_configuration(pool: &PgPool, id: i64) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("delete from configurations where id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

fn record_from_row(row: &sqlx::postgres::PgRow) -> Result<ConfigurationRecord, sqlx::Error> {
    let columns: serde_json::Value = row.try_get("columns")?;
    let columns: Vec<ColumnMapping> =
        serde_json::from_value(columns).map_err(|err| sqlx::Error::Decode(err.into()))?;

    Ok(ConfigurationRecord {
        id: row.try_get("id")?,
        view_id: row.try_get("view_id")?,
        destination_id: row.try_get("destination_id")?,
        tenant_id: row.try_get("tenant_id")?,
        columns,
    })
}
