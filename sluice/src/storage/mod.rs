//! Object storage used for staged and directly delivered data.
//!
//! Snowflake and Redshift transfers stage through the provisioned S3 bucket,
//! object-store transfers deliver into it, and BigQuery transfers stage
//! through the destination's own GCS bucket. All of them sit behind the
//! [`ObjectStore`] trait so the loaders and the coordinator stay independent
//! of the concrete backend.

mod gcs;
mod memory;
mod s3;

pub use gcs::{GcsStagingBucket, GcsStagingFactory};
pub use memory::{MemoryObjectStore, MemoryStagingFactory};
pub use s3::{S3Config, S3ObjectStore};

use std::sync::Arc;

use async_trait::async_trait;

use crate::egress::ByteStream;
use crate::error::SluiceResult;

/// A bucket of objects addressed by key.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Returns the bucket name.
    fn bucket(&self) -> &str;

    /// Returns the scheme-qualified URI for a key, e.g. `s3://bucket/key`.
    fn object_uri(&self, key: &str) -> String;

    /// Uploads a byte stream under the given key.
    ///
    /// The upload consumes the stream chunk by chunk, so upstream extraction
    /// is backpressured by the store's ingest rate.
    async fn upload(&self, key: &str, data: ByteStream) -> SluiceResult<()>;

    /// Issues a time-limited download URL for a key.
    async fn presigned_url(&self, key: &str) -> SluiceResult<String>;

    /// Deletes every object under the given key prefix. Best-effort cleanup.
    async fn delete_prefix(&self, prefix: &str) -> SluiceResult<()>;
}

/// Factory opening the per-destination staging bucket for BigQuery loads.
///
/// BigQuery destinations carry their own bucket and service-account
/// credential, so the store cannot be constructed up front like the
/// provisioned one.
#[async_trait]
pub trait StagingStoreFactory: Send + Sync {
    async fn staging_bucket(
        &self,
        bucket: &str,
        service_account_json: &str,
    ) -> SluiceResult<Arc<dyn ObjectStore>>;
}
