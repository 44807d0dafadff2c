use actix_web::{HttpResponse, delete, get, post, web};
use serde::Deserialize;
use sluice::store::{PgTransferStore, TransferStore};
use sqlx::PgPool;
use tracing::info;

use crate::db::{configurations, transfers};
use crate::error::ApiError;
use crate::routes::ListResponse;

#[derive(Debug, Deserialize)]
pub struct NewTransfer {
    pub configuration_id: i64,
}

/// Creates a transfer in the STARTED state; the worker picks it up from
/// there.
#[post("/transfers")]
pub async fn create_transfer(
    pool: web::Data<PgPool>,
    body: web::Json<NewTransfer>,
) -> Result<HttpResponse, ApiError> {
    configurations::read_configuration(pool.get_ref(), body.configuration_id)
        .await?
        .ok_or(ApiError::NotFound("configuration"))?;

    let id = transfers::create_transfer(pool.get_ref(), body.configuration_id).await?;
    info!(transfer_id = id, configuration_id = body.configuration_id, "created transfer");

    let record = transfers::read_transfer(pool.get_ref(), id)
        .await?
        .ok_or(ApiError::NotFound("transfer"))?;

    Ok(HttpResponse::Created().json(record))
}

#[get("/transfers")]
pub async fn list_transfers(pool: web::Data<PgPool>) -> Result<HttpResponse, ApiError> {
    let content = transfers::list_transfers(pool.get_ref()).await?;

    Ok(HttpResponse::Ok().json(ListResponse { content }))
}

#[get("/transfers/{transfer_id}")]
pub async fn get_transfer(
    pool: web::Data<PgPool>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let record = transfers::read_transfer(pool.get_ref(), path.into_inner())
        .await?
        .ok_or(ApiError::NotFound("transfer"))?;

    Ok(HttpResponse::Ok().json(record))
}

/// Cancels a non-terminal transfer.
///
/// Cancellation is cooperative: in-flight work is not interrupted, and a
/// transfer that already reached COMPLETE, CANCELLED or FAILED answers with a
/// precondition failure rather than being silently ignored.
#[delete("/transfers/{transfer_id}")]
pub async fn cancel_transfer(
    pool: web::Data<PgPool>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let transfer_id = path.into_inner();
    let store = PgTransferStore::new(pool.get_ref().clone());

    let cancelled = store
        .cancel_transfer(transfer_id)
        .await?
        .ok_or(ApiError::NotFound("transfer"))?;

    info!(transfer_id, "cancelled transfer");

    Ok(HttpResponse::Accepted().json(transfers::TransferRecord {
        id: cancelled.id,
        configuration_id: cancelled.configuration_id,
        status: cancelled.status,
        finalized_at: cancelled.finalized_at,
        object_url: cancelled.object_url,
    }))
}
