use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use sluice::connections::{ConnectionParams, EngineType};
use sqlx::{Executor, PgPool, Postgres, Row as _};

/// Request payload for registering a source.
#[derive(Debug, Deserialize)]
pub struct NewSource {
    pub nickname: String,
    pub engine: EngineType,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub database: String,
}

impl NewSource {
    /// Returns the connection parameters for the liveness probe.
    pub fn connection_params(&self) -> ConnectionParams {
        ConnectionParams {
            engine: self.engine,
            host: Some(self.host.clone()),
            port: Some(self.port),
            username: self.username.clone(),
            password: self.password.clone().map(SecretString::new),
            database: self.database.clone(),
            schema: None,
            warehouse: None,
            service_account: None,
        }
    }
}

/// Public representation of a source; credentials never leave the database.
#[derive(Debug, Serialize)]
pub struct SourceRecord {
    pub id: i64,
    pub nickname: String,
    pub engine: EngineType,
    pub host: String,
    pub port: u16,
    pub database: String,
}

pub async fn create_source<'c, E>(executor: E, source: &NewSource) -> Result<i64, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let row = sqlx::query(
        "insert into sources (nickname, engine, host, port, username, password, database_name) \
         values ($1, $2, $3, $4, $5, $6, $7) returning id",
    )
    .bind(&source.nickname)
    .bind(source.engine.as_static_str())
    .bind(&source.host)
    .bind(source.port as i32)
    .bind(&source.username)
    .bind(&source.password)
    .bind(&source.database)
    .fetch_one(executor)
    .await?;

    row.try_get("id")
}

pub async fn list_sources(pool: &PgPool) -> Result<Vec<SourceRecord>, sqlx::Error> {
    let rows = sqlx::query(
        "select id, nickname, engine, host, port, database_name from sources order by id",
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(record_from_row).collect()
}

pub async fn read_source(pool: &PgPool, id: i64) -> Result<Option<SourceRecord>, sqlx::Error> {
    let row = sqlx::query(
        "select id, nickname, engine, host, port, database_name from sources where id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(record_from_row).transpose()
}

/// Loads full connection parameters, credentials included, for probing.
pub async fn source_params(
    pool: &PgPool,
    id: i64,
) -> Result<Option<ConnectionParams>, sqlx::Error> {
    let row = sqlx::query(
        "select engine, host, port, username, password, database_name from sources where id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let engine: String = row.try_get("engine")?;
    let engine = EngineType::parse(&engine).map_err(|err| sqlx::Error::Decode(err.into()))?;
    let port: i32 = row.try_get("port")?;
    let password: Option<String> = row.try_get("password")?;

    Ok(Some(ConnectionParams {
        engine,
        host: row.try_get("host")?,
        port: Some(port as u16),
        username: row.try_get("username")?,
        password: password.map(SecretString::new),
        database: row.try_get("database_name")?,
        schema: None,
        warehouse: None,
        service_account: None,
    }))
}

/// True when any transfer through this source's views is still in flight.
pub async fn has_active_transfers(pool: &PgPool, id: i64) -> Result<bool, sqlx::Error> {
    let row = sqlx::query(
        "select exists ( \
           select 1 from transfers t \
           join configurations c on t.configuration_id = c.id \
           join views v on c.view_id = v.id \
           where v.source_id = $1 and t.status in ('started', 'pending') \
         ) as active",
    )
    .bind(id)
    .fetch_one(pool)
    .await?;

    row.try_get("active")
}

pub async fn delete_source(pool: &PgPool, id: i64) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("delete from sources where id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

fn record_from_row(row: &sqlx::postgres::PgRow) -> Result<SourceRecord, sqlx::Error> {
    let engine: String = row.try_get("engine")?;
    let engine = EngineType::parse(&engine).map_err(|err| sqlx::Error::Decode(err.into()))?;
    let port: i32 = row.try_get("port")?;

    Ok(SourceRecord {
        id: row.try_get("id")?,
        nickname: row.try_get("nickname")?,
        engine,
        host: row.try_get("host")?,
        port: port as u16,
        database: row.try_get("database_name")?,
    })
}
