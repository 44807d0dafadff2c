//! Dialect-aware SQL construction.
//!
//! Everything that renders SQL text lives here: identifier quoting per
//! dialect, the fixed source-to-destination type mapping, and the builders
//! for DDL, staging and upsert statements. Builders only ever emit pre-quoted
//! identifiers; data values travel as statement bindings, never as inline
//! text.

pub mod builder;
mod quoting;
mod typemap;

pub use quoting::QuoteStyle;
pub use typemap::destination_column_type;
