//! Persistence functions for the API's entities.
//!
//! Free functions over a sqlx [`sqlx::Executor`], one module per entity, so
//! routes can compose them inside or outside transactions.

pub mod configurations;
pub mod destinations;
pub mod sources;
pub mod transfers;
pub mod views;
