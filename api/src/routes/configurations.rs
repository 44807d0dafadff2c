use actix_web::{HttpResponse, delete, get, post, web};
use sqlx::PgPool;
use tracing::info;

use crate::db::{configurations, destinations, views};
use crate::error::ApiError;
use crate::routes::ListResponse;

/// Creates a configuration mapping view columns onto a destination.
///
/// Every mapped source column must exist on the view; the destination and the
/// view must both exist.
#[post("/configurations")]
pub async fn create_configuration(
    pool: web::Data<PgPool>,
    body: web::Json<configurations::NewConfiguration>,
) -> Result<HttpResponse, ApiError> {
    let view = views::read_view(pool.get_ref(), body.view_id)
        .await?
        .ok_or(ApiError::NotFound("view"))?;
    destinations::read_destination(pool.get_ref(), body.destination_id)
        .await?
        .ok_or(ApiError::NotFound("destination"))?;

    for mapping in &body.columns {
        let declared = view
            .columns
            .iter()
            .any(|column| column.name == mapping.name_in_source);
        if !declared {
            return Err(ApiError::Validation(format!(
                "column {} is not declared by view {}",
                mapping.name_in_source, view.id
            )));
        }
    }

    let id = configurations::create_configuration(pool.get_ref(), &body).await?;
    info!(configuration_id = id, view_id = body.view_id, "created configuration");

    let record = configurations::read_configuration(pool.get_ref(), id)
        .await?
        .ok_or(ApiError::NotFound("configuration"))?;

    Ok(HttpResponse::Created().json(record))
}

#[get("/configurations")]
pub async fn list_configurations(pool: web::Data<PgPool>) -> Result<HttpResponse, ApiError> {
    let content = configurations::list_configurations(pool.get_ref()).await?;

    Ok(HttpResponse::Ok().json(ListResponse { content }))
}

#[get("/configurations/{configuration_id}")]
pub async fn get_configuration(
    pool: web::Data<PgPool>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let record = configurations::read_configuration(pool.get_ref(), path.into_inner())
        .await?
        .ok_or(ApiError::NotFound("configuration"))?;

    Ok(HttpResponse::Ok().json(record))
}

/// Deletes a configuration, provided none of its transfers are in flight.
#[delete("/configurations/{configuration_id}")]
pub async fn delete_configuration(
    pool: web::Data<PgPool>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let configuration_id = path.into_inner();

    if configurations::has_active_transfers(pool.get_ref(), configuration_id).await? {
        return Err(ApiError::PreconditionFailed(
            "configuration has transfers in flight".to_string(),
        ));
    }

    let deleted = configurations::delete_configuration(pool.get_ref(), configuration_id).await?;
    if deleted == 0 {
        return Err(ApiError::NotFound("configuration"));
    }

    Ok(HttpResponse::NoContent().finish())
}
