use chrono::{DateTime, TimeZone, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use sluice::store::{Destination, DestinationType};
use sqlx::{Executor, PgPool, Postgres, Row as _};

/// Request payload for registering a destination.
///
/// Which fields are required depends on `destination_type`; the engine's
/// credential validation decides, not the deserializer.
#[derive(Debug, Deserialize)]
pub struct NewDestination {
    pub nickname: String,
    pub destination_type: DestinationType,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub schema: Option<String>,
    pub warehouse: Option<String>,
    pub service_account_json: Option<String>,
    pub staging_bucket: Option<String>,
}

impl NewDestination {
    /// Builds the in-memory [`Destination`] for validation and probing.
    pub fn as_destination(&self) -> Destination {
        Destination {
            id: 0,
            nickname: self.nickname.clone(),
            destination_type: self.destination_type,
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone().map(SecretString::new),
            database: self.database.clone(),
            schema: self.schema.clone(),
            warehouse: self.warehouse.clone(),
            service_account_json: self.service_account_json.clone(),
            staging_bucket: self.staging_bucket.clone(),
            last_modified_at: Utc.timestamp_opt(0, 0).unwrap(),
        }
    }
}

/// Public representation of a destination; credentials stay in the database.
#[derive(Debug, Serialize)]
pub struct DestinationRecord {
    pub id: i64,
    pub nickname: String,
    pub destination_type: DestinationType,
    pub database: Option<String>,
    pub schema: Option<String>,
    pub warehouse: Option<String>,
    pub staging_bucket: Option<String>,
    pub last_modified_at: DateTime<Utc>,
}

pub async fn create_destination<'c, E>(
    executor: E,
    destination: &NewDestination,
) -> Result<i64, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let row = sqlx::query(
        "insert into destinations (nickname, destination_type, host, port, username, password, \
         database_name, schema_name, warehouse, service_account_json, staging_bucket) \
         values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) returning id",
    )
    .bind(&destination.nickname)
    .bind(destination.destination_type.as_static_str())
    .bind(&destination.host)
    .bind(destination.port.map(|port| port as i32))
    .bind(&destination.username)
    .bind(&destination.password)
    .bind(&destination.database)
    .bind(&destination.schema)
    .bind(&destination.warehouse)
    .bind(&destination.service_account_json)
    .bind(&destination.staging_bucket)
    .fetch_one(executor)
    .await?;

    row.try_get("id")
}

pub async fn list_destinations(pool: &PgPool) -> Result<Vec<DestinationRecord>, sqlx::Error> {
    let rows = sqlx::query(
        "select id, nickname, destination_type, database_name, schema_name, warehouse, \
         staging_bucket, last_modified_at from destinations order by id",
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(record_from_row).collect()
}

pub async fn read_destination(
    pool: &PgPool,
    id: i64,
) -> Result<Option<DestinationRecord>, sqlx::Error> {
    let row = sqlx::query(
        "select id, nickname, destination_type, database_name, schema_name, warehouse, \
         staging_bucket, last_modified_at from destinations where id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(record_from_row).transpose()
}

/// True when any transfer into this destination is still in flight.
pub async fn has_active_transfers(pool: &PgPool, id: i64) -> Result<bool, sqlx::Error> {
    let row = sqlx::query(
        "select exists ( \
           select 1 from transfers t \
           join configurations c on t.configuration_id = c.id \
           where c.destination_id = $1 and t.status in ('started', 'pending') \
         ) as active",
    )
    .bind(id)
    .fetch_one(pool)
    .await?;

    row.try_get("active")
}

pub async fn delete_destination(pool: &PgPool, id: i64) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("delete from destinations where id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

fn record_from_row(row: &sqlx::postgres::PgRow) -> Result<DestinationRecord, sqlx::Error> {
    let destination_type: String = row.try_get("destination_type")?;
    let destination_type = DestinationType::parse(&destination_type)
        .map_err(|err| sqlx::Error::Decode(err.into()))?;

    Ok(DestinationRecord {
        id: row.try_get("id")?,
        nickname: row.try_get("nickname")?,
        destination_type,
        database: row.try_get("database_name")?,
        schema: row.try_get("schema_name")?,
        warehouse: row.try_get("warehouse")?,
        staging_bucket: row.try_get("staging_bucket")?,
        last_modified_at: row.try_get("last_modified_at")?,
    })
}
