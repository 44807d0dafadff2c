use actix_web::{HttpResponse, delete, get, post, web};
use sluice::connections::PoolRegistry;
use sluice::query::QuoteStyle;
use sluice::types::Statement;
use sqlx::PgPool;
use tracing::info;

use crate::db::{sources, views};
use crate::error::ApiError;
use crate::routes::ListResponse;

/// Declares a view after validating its invariants against the live source.
///
/// The tagged-column invariant (exactly one primary-key, last-modified and
/// tenant column) is checked first; then the projection is executed once with
/// `limit 1` to prove the declared columns exist on the underlying table.
#[post("/views")]
pub async fn create_view(
    pool: web::Data<PgPool>,
    registry: web::Data<PoolRegistry>,
    body: web::Json<views::NewView>,
) -> Result<HttpResponse, ApiError> {
    body.as_view().validate_tagged_columns()?;

    let params = sources::source_params(pool.get_ref(), body.source_id)
        .await?
        .ok_or(ApiError::NotFound("source"))?;

    let adapter = registry.acquire(&params).await?;
    let style = QuoteStyle::for_engine(params.engine);
    let projection = body
        .columns
        .iter()
        .map(|column| style.quote(&column.name))
        .collect::<Vec<_>>()
        .join(", ");
    let probe = format!(
        "select {projection} from {} limit 1",
        style.quote(&body.table_name)
    );
    adapter.query(&Statement::raw(probe)).await?;

    let id = views::create_view(pool.get_ref(), &body).await?;
    info!(view_id = id, source_id = body.source_id, "declared view");

    let record = views::read_view(pool.get_ref(), id)
        .await?
        .ok_or(ApiError::NotFound("view"))?;

    Ok(HttpResponse::Created().json(record))
}

#[get("/views")]
pub async fn list_views(pool: web::Data<PgPool>) -> Result<HttpResponse, ApiError> {
    let content = views::list_views(pool.get_ref()).await?;

    Ok(HttpResponse::Ok().json(ListResponse { content }))
}

#[get("/views/{view_id}")]
pub async fn get_view(
    pool: web::Data<PgPool>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let record = views::read_view(pool.get_ref(), path.into_inner())
        .await?
        .ok_or(ApiError::NotFound("view"))?;

    Ok(HttpResponse::Ok().json(record))
}

/// Deletes a view, provided no configuration references it.
#[delete("/views/{view_id}")]
pub async fn delete_view(
    pool: web::Data<PgPool>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let view_id = path.into_inner();

    if views::has_configurations(pool.get_ref(), view_id).await? {
        return Err(ApiError::PreconditionFailed(
            "view is referenced by configurations".to_string(),
        ));
    }

    let deleted = views::delete_view(pool.get_ref(), view_id).await?;
    if deleted == 0 {
        return Err(ApiError::NotFound("view"));
    }

    Ok(HttpResponse::NoContent().finish())
}
