use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::egress::ByteStream;
use crate::error::{ErrorKind, SluiceResult};
use crate::loaders::Loader;
use crate::sluice_error;
use crate::storage::ObjectStore;

/// Direct delivery into the provisioned object store.
///
/// There is no destination-side table: `stage` is the whole load, and the
/// presigned URL of the uploaded object becomes the transfer result. The
/// remaining lifecycle steps are no-ops.
pub struct ObjectStoreLoader {
    objects: Arc<dyn ObjectStore>,
    object_url: Option<String>,
}

impl ObjectStoreLoader {
    pub fn new(objects: Arc<dyn ObjectStore>) -> Self {
        Self {
            objects,
            object_url: None,
        }
    }
}

#[async_trait]
impl Loader for ObjectStoreLoader {
    async fn create_table(&mut self) -> SluiceResult<()> {
        Ok(())
    }

    async fn stage(&mut self, data: ByteStream) -> SluiceResult<()> {
        let key = format!("{}.gz", uuid::Uuid::new_v4());

        self.objects.upload(&key, data).await.map_err(|err| {
            sluice_error!(
                ErrorKind::StagingFailure,
                "Could not deliver object",
                key.clone(),
                source: err
            )
        })?;

        let url = self.objects.presigned_url(&key).await?;
        info!(key, "delivered transfer object");
        self.object_url = Some(url);

        Ok(())
    }

    async fn upsert(&mut self) -> SluiceResult<()> {
        Ok(())
    }

    async fn tear_down(&mut self) -> SluiceResult<()> {
        Ok(())
    }

    fn object_url(&self) -> Option<&str> {
        self.object_url.as_deref()
    }
}
