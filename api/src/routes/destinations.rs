use actix_web::{HttpResponse, delete, get, post, web};
use sluice::connections::PoolRegistry;
use sluice::store::DestinationType;
use sqlx::PgPool;
use tracing::info;

use crate::db::destinations;
use crate::error::ApiError;
use crate::routes::ListResponse;

/// Registers a destination after credential validation and a liveness probe.
///
/// Warehouse destinations are probed through the engine's pool; object-store
/// destinations have nothing to probe beyond credential shape.
#[post("/destinations")]
pub async fn create_destination(
    pool: web::Data<PgPool>,
    registry: web::Data<PoolRegistry>,
    body: web::Json<destinations::NewDestination>,
) -> Result<HttpResponse, ApiError> {
    let destination = body.as_destination();
    destination.validate_credentials()?;

    if destination.destination_type != DestinationType::ObjectStore {
        registry
            .acquire(&sluice::transfer::destination_params(&destination))
            .await?;
    }

    let id = destinations::create_destination(pool.get_ref(), &body).await?;
    info!(destination_id = id, "registered destination");

    let record = destinations::read_destination(pool.get_ref(), id)
        .await?
        .ok_or(ApiError::NotFound("destination"))?;

    Ok(HttpResponse::Created().json(record))
}

#[get("/destinations")]
pub async fn list_destinations(pool: web::Data<PgPool>) -> Result<HttpResponse, ApiError> {
    let content = destinations::list_destinations(pool.get_ref()).await?;

    Ok(HttpResponse::Ok().json(ListResponse { content }))
}

#[get("/destinations/{destination_id}")]
pub async fn get_destination(
    pool: web::Data<PgPool>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let record = destinations::read_destination(pool.get_ref(), path.into_inner())
        .await?
        .ok_or(ApiError::NotFound("destination"))?;

    Ok(HttpResponse::Ok().json(record))
}

/// Deletes a destination, provided no transfer into it is in flight.
#[delete("/destinations/{destination_id}")]
pub async fn delete_destination(
    pool: web::Data<PgPool>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let destination_id = path.into_inner();

    if destinations::has_active_transfers(pool.get_ref(), destination_id).await? {
        return Err(ApiError::PreconditionFailed(
            "destination has transfers in flight".to_string(),
        ));
    }

    let deleted = destinations::delete_destination(pool.get_ref(), destination_id).await?;
    if deleted == 0 {
        return Err(ApiError::NotFound("destination"));
    }

    Ok(HttpResponse::NoContent().finish())
}
