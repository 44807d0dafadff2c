use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};
use tracing::debug;

use crate::connections::{Connect, ConnectionParams, DialectAdapter, EngineConnector};
use crate::error::{ErrorKind, SluiceResult};
use crate::sluice_error;
use crate::types::Statement;

/// The liveness probe issued once before a pool is registered.
const PROBE_QUERY: &str = "SELECT 1=1";

/// Process-wide registry of pooled connections, keyed by fingerprint.
///
/// The registry is created at process start and owns every pool for the life
/// of the process; pools are never explicitly torn down except at shutdown.
/// Concurrent [`PoolRegistry::acquire`] calls for the same fingerprint never
/// race to create two pools: the per-fingerprint cell makes check-then-create
/// atomic, and a failed creation leaves the cell empty so a later attempt can
/// retry with fresh parameters.
pub struct PoolRegistry {
    connector: Arc<dyn Connect>,
    pools: Mutex<HashMap<String, Arc<OnceCell<Arc<dyn DialectAdapter>>>>>,
}

impl PoolRegistry {
    /// Creates a registry backed by the production [`EngineConnector`].
    pub fn new() -> Self {
        Self::with_connector(Arc::new(EngineConnector))
    }

    /// Creates a registry backed by a custom connector.
    ///
    /// Used by tests to observe pool creation without reaching a network.
    pub fn with_connector(connector: Arc<dyn Connect>) -> Self {
        Self {
            connector,
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the pooled adapter for the given parameters.
    ///
    /// On a fingerprint hit the cached adapter is returned without
    /// re-authenticating. On a miss a new pool is opened for the target engine
    /// family, dialect-specific session initialization runs, and one liveness
    /// probe must succeed before the pool is registered under its fingerprint.
    ///
    /// Fails with [`ErrorKind::NotImplemented`] for unsupported engine
    /// families and [`ErrorKind::ConnectionRefused`] when the probe or
    /// authentication fails. Both are terminal for this attempt; callers must
    /// not retry with the same parameters without backoff.
    pub async fn acquire(
        &self,
        params: &ConnectionParams,
    ) -> SluiceResult<Arc<dyn DialectAdapter>> {
        let fingerprint = params.fingerprint();

        let cell = {
            let mut pools = self.pools.lock().await;
            pools
                .entry(fingerprint.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let adapter = cell
            .get_or_try_init(|| async {
                let adapter = self.connector.connect(params).await?;

                adapter
                    .query(&Statement::raw(PROBE_QUERY))
                    .await
                    .map_err(|err| {
                        sluice_error!(
                            ErrorKind::ConnectionRefused,
                            "Liveness probe failed",
                            format!("engine {} did not answer the probe query", params.engine),
                            source: err
                        )
                    })?;

                debug!(
                    engine = %params.engine,
                    fingerprint = %fingerprint,
                    "registered new connection pool"
                );

                Ok::<_, crate::error::SluiceError>(adapter)
            })
            .await?;

        Ok(adapter.clone())
    }
}

impl Default for PoolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::connections::EngineType;
    use crate::test_utils::StaticAdapter;

    struct CountingConnector {
        connects: AtomicUsize,
        refuse: bool,
    }

    impl CountingConnector {
        fn new() -> Self {
            Self {
                connects: AtomicUsize::new(0),
                refuse: false,
            }
        }

        fn refusing() -> Self {
            Self {
                connects: AtomicUsize::new(0),
                refuse: true,
            }
        }
    }

    #[async_trait]
    impl Connect for CountingConnector {
        async fn connect(
            &self,
            _params: &ConnectionParams,
        ) -> SluiceResult<Arc<dyn DialectAdapter>> {
            self.connects.fetch_add(1, Ordering::SeqCst);

            if self.refuse {
                return Err(sluice_error!(
                    ErrorKind::ConnectionRefused,
                    "Connection refused"
                ));
            }

            Ok(Arc::new(StaticAdapter::empty()))
        }
    }

    fn params(database: &str) -> ConnectionParams {
        ConnectionParams {
            engine: EngineType::Postgres,
            host: Some("localhost".to_string()),
            port: Some(5432),
            username: "app".to_string(),
            password: None,
            database: database.to_string(),
            schema: None,
            warehouse: None,
            service_account: None,
        }
    }

    #[tokio::test]
    async fn identical_parameters_share_one_pool() {
        let connector = Arc::new(CountingConnector::new());
        let registry = PoolRegistry::with_connector(connector.clone());

        registry.acquire(&params("orders")).await.unwrap();
        registry.acquire(&params("orders")).await.unwrap();

        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_parameters_create_distinct_pools() {
        let connector = Arc::new(CountingConnector::new());
        let registry = PoolRegistry::with_connector(connector.clone());

        registry.acquire(&params("orders")).await.unwrap();
        registry.acquire(&params("billing")).await.unwrap();

        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_acquires_create_one_pool() {
        let connector = Arc::new(CountingConnector::new());
        let registry = Arc::new(PoolRegistry::with_connector(connector.clone()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(
                async move { registry.acquire(&params("orders")).await },
            ));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_creation_is_not_cached() {
        let connector = Arc::new(CountingConnector::refusing());
        let registry = PoolRegistry::with_connector(connector.clone());

        let first = registry.acquire(&params("orders")).await;
        assert_eq!(first.err().unwrap().kind(), ErrorKind::ConnectionRefused);

        let second = registry.acquire(&params("orders")).await;
        assert_eq!(second.err().unwrap().kind(), ErrorKind::ConnectionRefused);

        // Both attempts reached the connector: the failure was not cached.
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
    }
}
