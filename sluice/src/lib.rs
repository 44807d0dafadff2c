//! Tenant-scoped incremental replication engine.
//!
//! Sluice replicates slices of operational databases into destination
//! warehouses and object stores, one tenant at a time. The crate is organized
//! around four seams: a fingerprint-keyed connection pool speaking multiple
//! database dialects ([`connections`]), a per-dialect SQL builder with safe
//! identifier quoting ([`query`]), the staged-load protocol implemented per
//! destination ([`loaders`]), and the transfer coordinator plus its state
//! machine ([`transfer`]).

pub mod connections;
pub mod egress;
pub mod error;
pub mod loaders;
pub mod macros;
pub mod query;
pub mod storage;
pub mod store;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod transfer;
pub mod types;
