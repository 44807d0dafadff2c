use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::SluiceResult;
use crate::store::{
    Configuration, Destination, Source, Transfer, TransferBundle, TransferStore, View,
};
use crate::transfer::TransferStatus;

#[derive(Debug, Default)]
struct Inner {
    sources: HashMap<i64, Source>,
    views: HashMap<i64, View>,
    configurations: HashMap<i64, Configuration>,
    destinations: HashMap<i64, Destination>,
    transfers: HashMap<i64, Transfer>,
    next_id: i64,
}

/// In-memory store for testing and development purposes.
///
/// All state is held behind one mutex and lost on process exit. The seeding
/// helpers build up the entity graph the coordinator expects.
#[derive(Clone, Default)]
pub struct MemoryTransferStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryTransferStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(inner: &mut Inner) -> i64 {
        inner.next_id += 1;
        inner.next_id
    }

    /// Inserts a source and returns its assigned id.
    pub async fn insert_source(&self, mut source: Source) -> i64 {
        let mut inner = self.inner.lock().await;
        let id = Self::next_id(&mut inner);
        source.id = id;
        inner.sources.insert(id, source);

        id
    }

    pub async fn insert_view(&self, mut view: View) -> i64 {
        let mut inner = self.inner.lock().await;
        let id = Self::next_id(&mut inner);
        view.id = id;
        inner.views.insert(id, view);

        id
    }

    pub async fn insert_configuration(&self, mut configuration: Configuration) -> i64 {
        let mut inner = self.inner.lock().await;
        let id = Self::next_id(&mut inner);
        configuration.id = id;
        inner.configurations.insert(id, configuration);

        id
    }

    pub async fn insert_destination(&self, mut destination: Destination) -> i64 {
        let mut inner = self.inner.lock().await;
        let id = Self::next_id(&mut inner);
        destination.id = id;
        inner.destinations.insert(id, destination);

        id
    }

    /// Creates a transfer in the STARTED state for a configuration.
    pub async fn create_transfer(&self, configuration_id: i64) -> i64 {
        let mut inner = self.inner.lock().await;
        let id = Self::next_id(&mut inner);
        inner.transfers.insert(
            id,
            Transfer {
                id,
                configuration_id,
                status: TransferStatus::Started,
                finalized_at: None,
                object_url: None,
            },
        );

        id
    }

    /// Returns a copy of a transfer for assertions.
    pub async fn transfer(&self, transfer_id: i64) -> Option<Transfer> {
        self.inner.lock().await.transfers.get(&transfer_id).cloned()
    }

    /// Returns a copy of a destination for assertions.
    pub async fn destination(&self, destination_id: i64) -> Option<Destination> {
        self.inner
            .lock()
            .await
            .destinations
            .get(&destination_id)
            .cloned()
    }
}

#[async_trait]
impl TransferStore for MemoryTransferStore {
    async fn transfer_bundle(&self, transfer_id: i64) -> SluiceResult<Option<TransferBundle>> {
        let inner = self.inner.lock().await;

        let Some(transfer) = inner.transfers.get(&transfer_id) else {
            return Ok(None);
        };
        let Some(configuration) = inner.configurations.get(&transfer.configuration_id) else {
            return Ok(None);
        };
        let Some(view) = inner.views.get(&configuration.view_id) else {
            return Ok(None);
        };
        let Some(source) = inner.sources.get(&view.source_id) else {
            return Ok(None);
        };
        let Some(destination) = inner.destinations.get(&configuration.destination_id) else {
            return Ok(None);
        };

        Ok(Some(TransferBundle {
            transfer: transfer.clone(),
            configuration: configuration.clone(),
            view: view.clone(),
            source: source.clone(),
            destination: destination.clone(),
        }))
    }

    async fn mark_transfer_pending(&self, transfer_id: i64) -> SluiceResult<bool> {
        let mut inner = self.inner.lock().await;

        let Some(transfer) = inner.transfers.get_mut(&transfer_id) else {
            return Ok(false);
        };
        if transfer.status != TransferStatus::Started {
            return Ok(false);
        }

        transfer.status = TransferStatus::Pending;

        Ok(true)
    }

    async fn cancel_transfer(&self, transfer_id: i64) -> SluiceResult<Option<Transfer>> {
        let mut inner = self.inner.lock().await;

        let Some(transfer) = inner.transfers.get_mut(&transfer_id) else {
            return Ok(None);
        };
        transfer.status.check_cancellable()?;

        transfer.status = TransferStatus::Cancelled;
        transfer.finalized_at = Some(Utc::now());

        Ok(Some(transfer.clone()))
    }

    async fn finalize_transfer(
        &self,
        transfer_id: i64,
        status: TransferStatus,
        object_url: Option<String>,
    ) -> SluiceResult<()> {
        let mut inner = self.inner.lock().await;

        if let Some(transfer) = inner.transfers.get_mut(&transfer_id) {
            transfer.status = status;
            transfer.finalized_at = Some(Utc::now());
            transfer.object_url = object_url;
        }

        Ok(())
    }

    async fn advance_watermark(
        &self,
        destination_id: i64,
        watermark: DateTime<Utc>,
    ) -> SluiceResult<()> {
        let mut inner = self.inner.lock().await;

        if let Some(destination) = inner.destinations.get_mut(&destination_id) {
            destination.last_modified_at = watermark;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn pending_claim_succeeds_exactly_once() {
        let store = MemoryTransferStore::new();
        let transfer_id = store.create_transfer(1).await;

        assert!(store.mark_transfer_pending(transfer_id).await.unwrap());
        assert!(!store.mark_transfer_pending(transfer_id).await.unwrap());
    }

    #[tokio::test]
    async fn cancellation_succeeds_once_then_fails_the_precondition() {
        let store = MemoryTransferStore::new();
        let transfer_id = store.create_transfer(1).await;

        let cancelled = store.cancel_transfer(transfer_id).await.unwrap().unwrap();
        assert_eq!(cancelled.status, TransferStatus::Cancelled);
        assert!(cancelled.finalized_at.is_some());

        let err = store.cancel_transfer(transfer_id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn cancelling_a_missing_transfer_reports_not_found() {
        let store = MemoryTransferStore::new();

        assert!(store.cancel_transfer(42).await.unwrap().is_none());
    }
}
