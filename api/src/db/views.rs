use serde::{Deserialize, Serialize};
use sluice::store::{View, ViewColumn};
use sqlx::{Executor, PgPool, Postgres, Row as _};

/// Request payload for declaring a view.
#[derive(Debug, Deserialize)]
pub struct NewView {
    pub source_id: i64,
    pub table_name: String,
    pub columns: Vec<ViewColumn>,
}

impl NewView {
    /// Builds the in-memory [`View`] for invariant checks before persisting.
    pub fn as_view(&self) -> View {
        View {
            id: 0,
            source_id: self.source_id,
            table_name: self.table_name.clone(),
            columns: self.columns.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ViewRecord {
    pub id: i64,
    pub source_id: i64,
    pub table_name: String,
    pub columns: Vec<ViewColumn>,
}

pub async fn create_view<'c, E>(executor: E, view: &NewView) -> Result<i64, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let columns = serde_json::to_value(&view.columns)
        .map_err(|err| sqlx::Error::Encode(err.into()))?;

    let row = sqlx::query(
        "insert into views (source_id, table_name, columns) values ($1, $2, $3) returning id",
    )
    .bind(view.source_id)
    .bind(&view.table_name)
    .bind(columns)
    .fetch_one(executor)
    .await?;

    row.try_get("id")
}

pub async fn list_views(pool: &PgPool) -> Result<Vec<ViewRecord>, sqlx::Error> {
    let rows = sqlx::query("select id, source_id, table_name, columns from views order by id")
        .fetch_all(pool)
        .await?;

    rows.iter().map(record_from_row).collect()
}

pub async fn read_view(pool: &PgPool, id: i64) -> Result<Option<ViewRecord>, sqlx::Error> {
    let row = sqlx::query("select id, source_id, table_name, columns from views where id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(record_from_row).transpose()
}

/// True when a configuration still references this view.
///
/// Views are immutable once configured, so deletion requires removing the
/// configurations first.
pub async fn has_configurations(pool: &PgPool, id: i64) -> Result<bool, sqlx::Error> {
    let row = sqlx::query(
        "select exists (select 1 from configurations where view_id = $1) as referenced",
    )
    .bind(id)
    .fetch_one(pool)
    .await?;

    row.try_get("referenced")
}

pub async fn delete_view(pool: &PgPool, id: i64) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("delete from views where id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

fn record_from_row(row: &sqlx::postgres::PgRow) -> Result<ViewRecord, sqlx::Error> {
    let columns: serde_json::Value = row.try_get("columns")?;
    let columns: Vec<ViewColumn> =
        serde_json::from_value(columns).map_err(|err| sqlx::Error::Decode(err.into()))?;

    Ok(ViewRecord {
        id: row.try_get("id")?,
        source_id: row.try_get("source_id")?,
        table_name: row.try_get("table_name")?,
        columns,
    })
}
