//! Route handlers, one module per resource.

mod configurations;
mod destinations;
mod healthz;
mod sources;
mod transfers;
mod views;

use actix_web::web;
use serde::Serialize;

/// Envelope for list responses.
#[derive(Serialize)]
pub struct ListResponse<T> {
    pub content: Vec<T>,
}

/// Registers every route on the application.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(healthz::healthz)
        .service(sources::create_source)
        .service(sources::list_sources)
        .service(sources::get_source)
        .service(sources::delete_source)
        .service(views::create_view)
        .service(views::list_views)
        .service(views::get_view)
        .service(views::delete_view)
        .service(destinations::create_destination)
        .service(destinations::list_destinations)
        .service(destinations::get_destination)
        .service(destinations::delete_destination)
        .service(configurations::create_configuration)
        .service(configurations::list_configurations)
        .service(configurations::get_configuration)
        .service(configurations::delete_configuration)
        .service(transfers::create_transfer)
        .service(transfers::list_transfers)
        .service(transfers::get_transfer)
        .service(transfers::cancel_transfer);
}
