use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};

use crate::egress::ByteStream;
use crate::error::{ErrorKind, SluiceResult};
use crate::sluice_error;
use crate::storage::ObjectStore;

/// Smallest part size S3 accepts for every part but the last.
const MIN_PART_BYTES: usize = 8 * 1024 * 1024;

/// Validity window for presigned result URLs.
const PRESIGNED_URL_TTL: Duration = Duration::from_secs(60 * 60);

/// Static credentials and location of the provisioned bucket.
///
/// The same key pair is what the warehouse-side `COPY`/`CREATE STAGE`
/// statements embed, so staging reads use exactly the credentials staging
/// writes used.
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: SecretString,
    pub kms_key_id: String,
}

/// The provisioned S3 bucket: staging area and direct delivery target.
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Builds a client with the configured static credentials.
    pub async fn new(config: &S3Config) -> Self {
        let credentials = Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.expose_secret().clone(),
            None,
            None,
            "sluice-provisioned",
        );
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .load()
            .await;

        Self {
            client: Client::new(&sdk_config),
            bucket: config.bucket.clone(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn object_uri(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }

    async fn upload(&self, key: &str, mut data: ByteStream) -> SluiceResult<()> {
        let create = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                sluice_error!(
                    ErrorKind::ObjectStoreError,
                    "Could not start multipart upload",
                    source: err
                )
            })?;
        let upload_id = create.upload_id().unwrap_or_default().to_string();

        let result = upload_parts(&self.client, &self.bucket, key, &upload_id, &mut data).await;

        match result {
            Ok(parts) => {
                self.client
                    .complete_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .multipart_upload(
                        CompletedMultipartUpload::builder()
                            .set_parts(Some(parts))
                            .build(),
                    )
                    .send()
                    .await
                    .map_err(|err| {
                        sluice_error!(
                            ErrorKind::ObjectStoreError,
                            "Could not complete multipart upload",
                            source: err
                        )
                    })?;

                debug!(bucket = %self.bucket, key, "uploaded staged object");

                Ok(())
            }
            Err(err) => {
                // Abort so S3 does not keep billing for the orphaned parts.
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(key, error = %abort_err, "failed to abort multipart upload");
                }

                Err(err)
            }
        }
    }

    async fn presigned_url(&self, key: &str) -> SluiceResult<String> {
        let presigning = PresigningConfig::expires_in(PRESIGNED_URL_TTL).map_err(|err| {
            sluice_error!(
                ErrorKind::ObjectStoreError,
                "Invalid presigning configuration",
                source: err
            )
        })?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|err| {
                sluice_error!(
                    ErrorKind::ObjectStoreError,
                    "Could not presign object URL",
                    source: err
                )
            })?;

        Ok(presigned.uri().to_string())
    }

    async fn delete_prefix(&self, prefix: &str) -> SluiceResult<()> {
        let listing = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .send()
            .await
            .map_err(|err| {
                sluice_error!(
                    ErrorKind::ObjectStoreError,
                    "Could not list staged objects",
                    source: err
                )
            })?;

        for object in listing.contents() {
            let Some(key) = object.key() else {
                continue;
            };

            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map_err(|err| {
                    sluice_error!(
                        ErrorKind::ObjectStoreError,
                        "Could not delete staged object",
                        source: err
                    )
                })?;
        }

        Ok(())
    }
}

/// Streams chunks into upload parts, respecting the minimum part size.
async fn upload_parts(
    client: &Client,
    bucket: &str,
    key: &str,
    upload_id: &str,
    data: &mut ByteStream,
) -> SluiceResult<Vec<CompletedPart>> {
    let mut parts = Vec::new();
    let mut buffer: Vec<u8> = Vec::with_capacity(MIN_PART_BYTES);
    let mut part_number = 1;

    while let Some(chunk) = data.next().await {
        buffer.extend_from_slice(&chunk?);

        if buffer.len() >= MIN_PART_BYTES {
            let body = std::mem::replace(&mut buffer, Vec::with_capacity(MIN_PART_BYTES));
            parts.push(upload_part(client, bucket, key, upload_id, part_number, body).await?);
            part_number += 1;
        }
    }

    // The final part may be any size.
    parts.push(upload_part(client, bucket, key, upload_id, part_number, buffer).await?);

    Ok(parts)
}

async fn upload_part(
    client: &Client,
    bucket: &str,
    key: &str,
    upload_id: &str,
    part_number: i32,
    body: Vec<u8>,
) -> SluiceResult<CompletedPart> {
    let uploaded = client
        .upload_part()
        .bucket(bucket)
        .key(key)
        .upload_id(upload_id)
        .part_number(part_number)
        .body(body.into())
        .send()
        .await
        .map_err(|err| {
            sluice_error!(
                ErrorKind::ObjectStoreError,
                "Could not upload part",
                format!("part {part_number} of {key}"),
                source: err
            )
        })?;

    Ok(CompletedPart::builder()
        .part_number(part_number)
        .set_e_tag(uploaded.e_tag().map(ToString::to_string))
        .build())
}
