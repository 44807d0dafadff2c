use actix_web::{HttpResponse, delete, get, post, web};
use sluice::connections::PoolRegistry;
use sqlx::PgPool;
use tracing::info;

use crate::db::sources;
use crate::error::ApiError;
use crate::routes::ListResponse;

/// Registers a source after a successful liveness probe.
///
/// The probe goes through the same pool the engine uses, so a source that
/// registers is a source the worker can reach.
#[post("/sources")]
pub async fn create_source(
    pool: web::Data<PgPool>,
    registry: web::Data<PoolRegistry>,
    body: web::Json<sources::NewSource>,
) -> Result<HttpResponse, ApiError> {
    registry.acquire(&body.connection_params()).await?;

    let id = sources::create_source(pool.get_ref(), &body).await?;
    info!(source_id = id, "registered source");

    let record = sources::read_source(pool.get_ref(), id)
        .await?
        .ok_or(ApiError::NotFound("source"))?;

    Ok(HttpResponse::Created().json(record))
}

#[get("/sources")]
pub async fn list_sources(pool: web::Data<PgPool>) -> Result<HttpResponse, ApiError> {
    let content = sources::list_sources(pool.get_ref()).await?;

    Ok(HttpResponse::Ok().json(ListResponse { content }))
}

#[get("/sources/{source_id}")]
pub async fn get_source(
    pool: web::Data<PgPool>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let record = sources::read_source(pool.get_ref(), path.into_inner())
        .await?
        .ok_or(ApiError::NotFound("source"))?;

    Ok(HttpResponse::Ok().json(record))
}

/// Deletes a source, provided no view over it has a transfer in flight.
#[delete("/sources/{source_id}")]
pub async fn delete_source(
    pool: web::Data<PgPool>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let source_id = path.into_inner();

    if sources::has_active_transfers(pool.get_ref(), source_id).await? {
        return Err(ApiError::PreconditionFailed(
            "source has transfers in flight".to_string(),
        ));
    }

    let deleted = sources::delete_source(pool.get_ref(), source_id).await?;
    if deleted == 0 {
        return Err(ApiError::NotFound("source"));
    }

    Ok(HttpResponse::NoContent().finish())
}
