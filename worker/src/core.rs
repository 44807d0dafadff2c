use std::sync::Arc;
use std::time::Duration;

use config::shared::{Settings, load_settings};
use secrecy::SecretString;
use sluice::connections::PoolRegistry;
use sluice::storage::{GcsStagingFactory, S3Config, S3ObjectStore};
use sluice::store::PgTransferStore;
use sluice::transfer::TransferCoordinator;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

/// Runs the transfer queue consumer until a shutdown signal arrives.
///
/// Each claimed transfer is handed to the coordinator exactly once. There is
/// no retry here: a FAILED transfer stays failed, and whether to re-attempt a
/// window is the caller's policy, expressed by creating a new transfer.
pub async fn start_worker() -> anyhow::Result<()> {
    let settings = load_settings()?;

    let pool = PgPoolOptions::new()
        .max_connections(4)
        .connect_with(settings.database.connect_options())
        .await?;

    let coordinator = build_coordinator(&settings, pool.clone()).await;
    let poll_interval = Duration::from_millis(settings.worker.poll_interval_ms);

    info!("transfer worker started");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received, stopping worker");
                break;
            }
            claimed = claim_next_transfer(&pool) => {
                match claimed? {
                    Some(transfer_id) => {
                        // Failures are already finalized by the coordinator;
                        // they are logged here and never retried internally.
                        if let Err(err) = coordinator.process_transfer(transfer_id).await {
                            warn!(transfer_id, error = %err, "transfer failed");
                        }
                    }
                    None => tokio::time::sleep(poll_interval).await,
                }
            }
        }
    }

    Ok(())
}

async fn build_coordinator(settings: &Settings, pool: PgPool) -> TransferCoordinator {
    let s3 = S3Config {
        bucket: settings.object_store.bucket.clone(),
        region: settings.object_store.region.clone(),
        access_key_id: settings.object_store.access_key_id.clone(),
        secret_access_key: SecretString::from(settings.object_store.secret_access_key.clone()),
        kms_key_id: settings.object_store.kms_key_id.clone(),
    };
    let objects = Arc::new(S3ObjectStore::new(&s3).await);

    TransferCoordinator::new(
        Arc::new(PgTransferStore::new(pool)),
        Arc::new(PoolRegistry::new()),
        objects,
        Arc::new(GcsStagingFactory),
        s3,
    )
}

/// Picks the oldest STARTED transfer, if any.
///
/// This is only a scheduling hint: the coordinator's atomic STARTED→PENDING
/// write is the real mutual exclusion, so two workers racing here is safe.
async fn claim_next_transfer(pool: &PgPool) -> anyhow::Result<Option<i64>> {
    let id: Option<(i64,)> =
        sqlx::query_as("select id from transfers where status = 'started' order by id limit 1")
            .fetch_optional(pool)
            .await?;

    Ok(id.map(|(id,)| id))
}
