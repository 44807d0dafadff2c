use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use google_cloud_storage::client::google_cloud_auth::credentials::CredentialsFile;
use google_cloud_storage::client::{Client, ClientConfig};
use google_cloud_storage::http::objects::delete::DeleteObjectRequest;
use google_cloud_storage::http::objects::list::ListObjectsRequest;
use google_cloud_storage::http::objects::upload::{Media, UploadObjectRequest, UploadType};
use tracing::debug;

use crate::egress::ByteStream;
use crate::error::{ErrorKind, SluiceResult};
use crate::sluice_error;
use crate::storage::{ObjectStore, StagingStoreFactory};

/// A BigQuery destination's dedicated staging bucket on GCS.
///
/// Authenticated with the destination's own service-account credential, the
/// same one the BigQuery adapter uses, so external tables can read what was
/// staged here.
pub struct GcsStagingBucket {
    client: Client,
    bucket: String,
}

impl GcsStagingBucket {
    /// Connects using a service-account JSON credential.
    pub async fn connect(bucket: &str, service_account_json: &str) -> SluiceResult<Self> {
        let credentials = CredentialsFile::new_from_str(service_account_json)
            .await
            .map_err(|err| {
                sluice_error!(
                    ErrorKind::MissingCredentials,
                    "Staging bucket credential is not a valid service account",
                    source: err
                )
            })?;
        let config = ClientConfig::default()
            .with_credentials(credentials)
            .await
            .map_err(|err| {
                sluice_error!(
                    ErrorKind::ConnectionRefused,
                    "Could not authenticate with the staging bucket",
                    source: err
                )
            })?;

        Ok(Self {
            client: Client::new(config),
            bucket: bucket.to_string(),
        })
    }
}

#[async_trait]
impl ObjectStore for GcsStagingBucket {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn object_uri(&self, key: &str) -> String {
        format!("gs://{}/{}", self.bucket, key)
    }

    async fn upload(&self, key: &str, mut data: ByteStream) -> SluiceResult<()> {
        // Gathered per object: one staged object per transfer, uploaded with
        // the simple upload surface.
        let mut bytes = Vec::new();
        while let Some(chunk) = data.next().await {
            bytes.extend_from_slice(&chunk?);
        }

        let request = UploadObjectRequest {
            bucket: self.bucket.clone(),
            ..Default::default()
        };
        let upload_type = UploadType::Simple(Media::new(key.to_string()));

        self.client
            .upload_object(&request, bytes, &upload_type)
            .await
            .map_err(|err| {
                sluice_error!(
                    ErrorKind::ObjectStoreError,
                    "Could not upload staged object to GCS",
                    source: err
                )
            })?;

        debug!(bucket = %self.bucket, key, "uploaded staged object");

        Ok(())
    }

    async fn presigned_url(&self, _key: &str) -> SluiceResult<String> {
        // Staging buckets never serve results directly.
        Err(sluice_error!(
            ErrorKind::NotImplemented,
            "Presigned URLs are not issued for staging buckets"
        ))
    }

    async fn delete_prefix(&self, prefix: &str) -> SluiceResult<()> {
        let listing = self
            .client
            .list_objects(&ListObjectsRequest {
                bucket: self.bucket.clone(),
                prefix: Some(prefix.to_string()),
                ..Default::default()
            })
            .await
            .map_err(|err| {
                sluice_error!(
                    ErrorKind::ObjectStoreError,
                    "Could not list staged objects on GCS",
                    source: err
                )
            })?;

        for object in listing.items.unwrap_or_default() {
            self.client
                .delete_object(&DeleteObjectRequest {
                    bucket: self.bucket.clone(),
                    object: object.name,
                    ..Default::default()
                })
                .await
                .map_err(|err| {
                    sluice_error!(
                        ErrorKind::ObjectStoreError,
                        "Could not delete staged object on GCS",
                        source: err
                    )
                })?;
        }

        Ok(())
    }
}

/// Production [`StagingStoreFactory`] opening real GCS buckets.
pub struct GcsStagingFactory;

#[async_trait]
impl StagingStoreFactory for GcsStagingFactory {
    async fn staging_bucket(
        &self,
        bucket: &str,
        service_account_json: &str,
    ) -> SluiceResult<Arc<dyn ObjectStore>> {
        let staging = GcsStagingBucket::connect(bucket, service_account_json).await?;

        Ok(Arc::new(staging))
    }
}
