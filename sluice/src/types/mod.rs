//! Core value and row types shared by dialect adapters, the query builder,
//! and the egress pipeline.

mod row;
mod value;

pub use row::{Row, RowStream, Statement};
pub use value::Value;
