use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::Mutex;

use crate::egress::ByteStream;
use crate::error::SluiceResult;
use crate::storage::{ObjectStore, StagingStoreFactory};

/// In-memory object store for testing and development purposes.
///
/// Uploaded objects are held in memory and lost when the process terminates;
/// the captured bytes can be inspected afterwards to verify what a transfer
/// staged or delivered.
#[derive(Clone)]
pub struct MemoryObjectStore {
    bucket: String,
    objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryObjectStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns a copy of one stored object.
    pub async fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().await.get(key).cloned()
    }

    /// Returns the stored object keys, unordered.
    pub async fn keys(&self) -> Vec<String> {
        self.objects.lock().await.keys().cloned().collect()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn object_uri(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }

    async fn upload(&self, key: &str, mut data: ByteStream) -> SluiceResult<()> {
        let mut bytes = Vec::new();
        while let Some(chunk) = data.next().await {
            bytes.extend_from_slice(&chunk?);
        }

        self.objects.lock().await.insert(key.to_string(), bytes);

        Ok(())
    }

    async fn presigned_url(&self, key: &str) -> SluiceResult<String> {
        Ok(format!(
            "https://{}.objects.invalid/{}?signature=test",
            self.bucket, key
        ))
    }

    async fn delete_prefix(&self, prefix: &str) -> SluiceResult<()> {
        self.objects
            .lock()
            .await
            .retain(|key, _| !key.starts_with(prefix));

        Ok(())
    }
}

/// [`StagingStoreFactory`] handing out one shared in-memory bucket.
pub struct MemoryStagingFactory {
    store: Arc<MemoryObjectStore>,
}

impl MemoryStagingFactory {
    pub fn new(store: Arc<MemoryObjectStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StagingStoreFactory for MemoryStagingFactory {
    async fn staging_bucket(
        &self,
        _bucket: &str,
        _service_account_json: &str,
    ) -> SluiceResult<Arc<dyn ObjectStore>> {
        Ok(self.store.clone())
    }
}
