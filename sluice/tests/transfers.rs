//! End-to-end coordinator scenarios over in-memory fakes.
//!
//! Every scenario runs the real coordinator, egress pipeline and loaders;
//! only the database adapters, object stores and the transfer store are
//! substituted with in-memory implementations.

use std::io::Read;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use flate2::read::GzDecoder;
use secrecy::SecretString;
use sluice::connections::{EngineType, PoolRegistry};
use sluice::error::ErrorKind;
use sluice::storage::{MemoryObjectStore, MemoryStagingFactory, S3Config};
use sluice::store::{
    ColumnMapping, Configuration, Destination, DestinationType, MemoryTransferStore, Source, View,
    ViewColumn,
};
use sluice::test_utils::{StaticAdapter, TestConnector};
use sluice::transfer::{TransferCoordinator, TransferStatus};
use sluice::types::{Row, Value};

const EPOCH: i64 = 0;

struct Harness {
    store: MemoryTransferStore,
    connector: Arc<TestConnector>,
    objects: Arc<MemoryObjectStore>,
    staging: Arc<MemoryObjectStore>,
    coordinator: TransferCoordinator,
}

fn s3_config() -> S3Config {
    S3Config {
        bucket: "provisioned".to_string(),
        region: "us-east-1".to_string(),
        access_key_id: "AKIATEST".to_string(),
        secret_access_key: SecretString::new("secret".to_string()),
        kms_key_id: "kms-test".to_string(),
    }
}

fn harness() -> Harness {
    let store = MemoryTransferStore::new();
    let connector = Arc::new(TestConnector::new());
    let pools = Arc::new(PoolRegistry::with_connector(connector.clone()));
    let objects = Arc::new(MemoryObjectStore::new("provisioned"));
    let staging = Arc::new(MemoryObjectStore::new("staging"));

    let coordinator = TransferCoordinator::new(
        Arc::new(store.clone()),
        pools,
        objects.clone(),
        Arc::new(MemoryStagingFactory::new(staging.clone())),
        s3_config(),
    );

    Harness {
        store,
        connector,
        objects,
        staging,
        coordinator,
    }
}

fn view_column(name: &str, data_type: &str, pk: bool, lm: bool, tenant: bool) -> ViewColumn {
    ViewColumn {
        name: name.to_string(),
        data_type: data_type.to_string(),
        is_primary_key: pk,
        is_last_modified: lm,
        is_tenant_column: tenant,
    }
}

fn mapping(name: &str) -> ColumnMapping {
    ColumnMapping {
        name_in_source: name.to_string(),
        name_in_destination: name.to_string(),
    }
}

fn watermark_epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(EPOCH, 0).unwrap()
}

/// Seeds source + view + destination + configuration and returns a STARTED
/// transfer id together with the destination id.
async fn seed(harness: &Harness, destination: Destination) -> (i64, i64) {
    let source_id = harness
        .store
        .insert_source(Source {
            id: 0,
            nickname: "orders-db".to_string(),
            engine: EngineType::Postgres,
            host: "db.internal".to_string(),
            port: 5432,
            username: "replicator".to_string(),
            password: Some(SecretString::new("pw".to_string())),
            database: "orders".to_string(),
        })
        .await;

    let view_id = harness
        .store
        .insert_view(View {
            id: 0,
            source_id,
            table_name: "orders".to_string(),
            columns: vec![
                view_column("id", "bigint", true, false, false),
                view_column("name", "text", false, false, false),
                view_column("updated_at", "timestamp with time zone", false, true, false),
                view_column("tenant_id", "varchar", false, false, true),
            ],
        })
        .await;

    let destination_id = harness.store.insert_destination(destination).await;

    let configuration_id = harness
        .store
        .insert_configuration(Configuration {
            id: 0,
            view_id,
            destination_id,
            tenant_id: "acme".to_string(),
            columns: vec![
                mapping("id"),
                mapping("name"),
                mapping("updated_at"),
                mapping("tenant_id"),
            ],
        })
        .await;

    let transfer_id = harness.store.create_transfer(configuration_id).await;

    (transfer_id, destination_id)
}

fn object_store_destination() -> Destination {
    Destination {
        id: 0,
        nickname: "Acme Bucket".to_string(),
        destination_type: DestinationType::ObjectStore,
        host: None,
        port: None,
        username: None,
        password: None,
        database: None,
        schema: None,
        warehouse: None,
        service_account_json: None,
        staging_bucket: None,
        last_modified_at: watermark_epoch(),
    }
}

fn snowflake_destination() -> Destination {
    Destination {
        id: 0,
        nickname: "Acme Warehouse".to_string(),
        destination_type: DestinationType::Snowflake,
        host: Some("acme.snowflakecomputing.com".to_string()),
        port: Some(443),
        username: Some("loader".to_string()),
        password: Some(SecretString::new("pw".to_string())),
        database: Some("SHARED".to_string()),
        schema: Some("public".to_string()),
        warehouse: Some("LOAD_WH".to_string()),
        service_account_json: None,
        staging_bucket: None,
        last_modified_at: watermark_epoch(),
    }
}

fn bigquery_destination() -> Destination {
    Destination {
        id: 0,
        nickname: "Acme BQ".to_string(),
        destination_type: DestinationType::BigQuery,
        host: None,
        port: None,
        username: Some("loader".to_string()),
        password: None,
        database: Some("acme-project".to_string()),
        schema: Some("shared".to_string()),
        warehouse: None,
        service_account_json: Some("{}".to_string()),
        staging_bucket: Some("acme-staging".to_string()),
        last_modified_at: watermark_epoch(),
    }
}

/// Registers a Postgres source adapter answering the watermark probe and the
/// extraction stream with the given rows.
fn register_source(harness: &Harness, max_updated_at: Option<DateTime<Utc>>, rows: Vec<Row>) -> Arc<StaticAdapter> {
    let adapter = Arc::new(StaticAdapter::empty());

    if let Some(max_updated_at) = max_updated_at {
        let columns: Arc<[String]> = vec!["updated_at".to_string()].into();
        adapter.route(
            "order by",
            vec![Row::new(columns, vec![Value::TimestampTz(max_updated_at)])],
        );
    }
    adapter.set_stream_rows(rows);

    harness.connector.register(EngineType::Postgres, adapter.clone());

    adapter
}

fn order_rows(max_updated_at: DateTime<Utc>) -> Vec<Row> {
    let columns: Arc<[String]> = vec![
        "id".to_string(),
        "name".to_string(),
        "updated_at".to_string(),
        "tenant_id".to_string(),
    ]
    .into();

    vec![
        Row::new(
            columns.clone(),
            vec![
                Value::Int(1),
                Value::String("first".to_string()),
                Value::TimestampTz(max_updated_at - chrono::Duration::hours(1)),
                Value::String("acme".to_string()),
            ],
        ),
        Row::new(
            columns,
            vec![
                Value::Int(2),
                Value::String("second".to_string()),
                Value::TimestampTz(max_updated_at),
                Value::String("acme".to_string()),
            ],
        ),
    ]
}

fn gunzip(bytes: &[u8]) -> String {
    let mut decoded = Vec::new();
    GzDecoder::new(bytes).read_to_end(&mut decoded).unwrap();

    String::from_utf8(decoded).unwrap()
}

#[tokio::test]
async fn object_store_transfer_uploads_and_advances_the_watermark() {
    let harness = harness();
    let (transfer_id, destination_id) = seed(&harness, object_store_destination()).await;

    let max_updated_at = Utc.with_ymd_and_hms(2023, 6, 1, 12, 0, 0).unwrap();
    let source = register_source(&harness, Some(max_updated_at), order_rows(max_updated_at));

    let status = harness
        .coordinator
        .process_transfer(transfer_id)
        .await
        .unwrap();
    assert_eq!(status, TransferStatus::Complete);

    // One gzip object was delivered, with header and both rows.
    let keys = harness.objects.keys().await;
    assert_eq!(keys.len(), 1);
    let object = harness.objects.object(&keys[0]).await.unwrap();
    let text = gunzip(&object);
    assert!(text.contains("id,name,updated_at,tenant_id"));
    assert!(text.contains("1,first,"));
    assert!(text.contains("2,second,"));

    // The transfer is COMPLETE with a result URL.
    let transfer = harness.store.transfer(transfer_id).await.unwrap();
    assert_eq!(transfer.status, TransferStatus::Complete);
    assert!(transfer.finalized_at.is_some());
    assert!(transfer.object_url.unwrap().contains(&keys[0]));

    // The watermark advanced to the observed maximum.
    let destination = harness.store.destination(destination_id).await.unwrap();
    assert_eq!(destination.last_modified_at, max_updated_at);

    // The extraction query filtered on tenant and watermark.
    let extraction = source
        .executed()
        .into_iter()
        .find(|sql| sql.contains("\"updated_at\" >"))
        .expect("extraction query ran");
    assert!(extraction.contains("\"tenant_id\" = $1"));
}

#[tokio::test]
async fn zero_matching_rows_cancel_the_transfer() {
    let harness = harness();
    let (transfer_id, destination_id) = seed(&harness, object_store_destination()).await;

    // Watermark probe answers zero rows.
    register_source(&harness, None, Vec::new());

    let status = harness
        .coordinator
        .process_transfer(transfer_id)
        .await
        .unwrap();
    assert_eq!(status, TransferStatus::Cancelled);

    let transfer = harness.store.transfer(transfer_id).await.unwrap();
    assert_eq!(transfer.status, TransferStatus::Cancelled);
    assert!(transfer.object_url.is_none());
    assert!(harness.objects.keys().await.is_empty());

    // The watermark did not move.
    let destination = harness.store.destination(destination_id).await.unwrap();
    assert_eq!(destination.last_modified_at, watermark_epoch());
}

#[tokio::test]
async fn snowflake_transfer_drives_the_staged_load_lifecycle() {
    let harness = harness();
    let (transfer_id, _) = seed(&harness, snowflake_destination()).await;

    let max_updated_at = Utc.with_ymd_and_hms(2023, 6, 1, 12, 0, 0).unwrap();
    register_source(&harness, Some(max_updated_at), order_rows(max_updated_at));

    let warehouse = Arc::new(StaticAdapter::empty());
    harness
        .connector
        .register(EngineType::Snowflake, warehouse.clone());

    let status = harness
        .coordinator
        .process_transfer(transfer_id)
        .await
        .unwrap();
    assert_eq!(status, TransferStatus::Complete);

    // The staged object landed under the configuration's prefix.
    let keys = harness.objects.keys().await;
    assert_eq!(keys.len(), 1);
    assert!(keys[0].starts_with("snowflake/"));

    // The lifecycle ran strictly in order, DDL before the transaction DML.
    let executed = warehouse.executed();
    let position = |needle: &str| {
        executed
            .iter()
            .position(|sql| sql.contains(needle))
            .unwrap_or_else(|| panic!("statement not executed: {needle}"))
    };

    let begin = position("begin transaction");
    let create_table = position("create table if not exists");
    let stage = position("create or replace stage");
    let merge = position("merge into");
    let teardown = position("remove @");
    let drop_stage = position("drop stage");
    let commit = position("commit");

    assert!(begin < create_table);
    assert!(create_table < stage);
    assert!(stage < merge);
    assert!(merge < teardown);
    assert!(teardown < drop_stage);
    assert!(drop_stage < commit);

    // The stage points at the uploaded object with the staging credentials.
    let stage_sql = &executed[stage];
    assert!(stage_sql.contains(&format!("url='s3://provisioned/{}'", keys[0])));
    assert!(stage_sql.contains("aws_key_id='AKIATEST'"));
}

#[tokio::test]
async fn bigquery_transfer_stages_through_the_destination_bucket() {
    let harness = harness();
    let (transfer_id, _) = seed(&harness, bigquery_destination()).await;

    let max_updated_at = Utc.with_ymd_and_hms(2023, 6, 1, 12, 0, 0).unwrap();
    register_source(&harness, Some(max_updated_at), order_rows(max_updated_at));

    let bigquery = Arc::new(StaticAdapter::empty());
    harness
        .connector
        .register(EngineType::BigQuery, bigquery.clone());

    let status = harness
        .coordinator
        .process_transfer(transfer_id)
        .await
        .unwrap();
    assert_eq!(status, TransferStatus::Complete);

    // Staged through the destination's own bucket, not the provisioned one.
    assert!(harness.objects.keys().await.is_empty());
    let staged = harness.staging.keys().await;
    assert_eq!(staged.len(), 1);
    assert!(staged[0].starts_with("bigquery/"));

    let executed = bigquery.executed();
    assert!(executed.iter().any(|sql| sql.contains("create external table")));
    assert!(executed.iter().any(|sql| sql.contains("merge into")));
    assert!(executed.iter().any(|sql| sql.contains("drop external table")));
}

#[tokio::test]
async fn missing_warehouse_fails_before_any_pool_is_acquired() {
    let harness = harness();
    let mut destination = snowflake_destination();
    destination.warehouse = None;
    let (transfer_id, destination_id) = seed(&harness, destination).await;

    let source = register_source(&harness, Some(Utc::now()), Vec::new());

    let err = harness
        .coordinator
        .process_transfer(transfer_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingCredentials);

    // No pool was acquired: the source never saw a statement.
    assert!(source.executed().is_empty());

    let transfer = harness.store.transfer(transfer_id).await.unwrap();
    assert_eq!(transfer.status, TransferStatus::Failed);

    let destination = harness.store.destination(destination_id).await.unwrap();
    assert_eq!(destination.last_modified_at, watermark_epoch());
}

#[tokio::test]
async fn failed_upsert_rolls_back_and_keeps_the_watermark() {
    let harness = harness();
    let (transfer_id, destination_id) = seed(&harness, snowflake_destination()).await;

    let max_updated_at = Utc.with_ymd_and_hms(2023, 6, 1, 12, 0, 0).unwrap();
    register_source(&harness, Some(max_updated_at), order_rows(max_updated_at));

    let warehouse = Arc::new(StaticAdapter::empty());
    warehouse.fail_on("merge into");
    harness
        .connector
        .register(EngineType::Snowflake, warehouse.clone());

    let err = harness
        .coordinator
        .process_transfer(transfer_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UpsertFailure);

    let executed = warehouse.executed();
    assert!(executed.iter().any(|sql| sql.contains("rollback")));
    assert!(!executed.iter().any(|sql| sql == "commit"));

    let transfer = harness.store.transfer(transfer_id).await.unwrap();
    assert_eq!(transfer.status, TransferStatus::Failed);

    let destination = harness.store.destination(destination_id).await.unwrap();
    assert_eq!(destination.last_modified_at, watermark_epoch());
}

#[tokio::test]
async fn a_transfer_is_processed_at_most_once() {
    let harness = harness();
    let (transfer_id, _) = seed(&harness, object_store_destination()).await;

    let max_updated_at = Utc.with_ymd_and_hms(2023, 6, 1, 12, 0, 0).unwrap();
    register_source(&harness, Some(max_updated_at), order_rows(max_updated_at));

    harness
        .coordinator
        .process_transfer(transfer_id)
        .await
        .unwrap();

    let err = harness
        .coordinator
        .process_transfer(transfer_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}

#[tokio::test]
async fn successive_transfers_keep_the_watermark_monotonic() {
    let harness = harness();
    let (first_transfer, destination_id) = seed(&harness, object_store_destination()).await;

    let first_max = Utc.with_ymd_and_hms(2023, 6, 1, 12, 0, 0).unwrap();
    let source = register_source(&harness, Some(first_max), order_rows(first_max));

    harness
        .coordinator
        .process_transfer(first_transfer)
        .await
        .unwrap();
    let after_first = harness
        .store
        .destination(destination_id)
        .await
        .unwrap()
        .last_modified_at;
    assert_eq!(after_first, first_max);

    // A later run observes a newer maximum.
    let second_max = first_max + chrono::Duration::days(1);
    let columns: Arc<[String]> = vec!["updated_at".to_string()].into();
    source.route(
        "order by",
        vec![Row::new(columns, vec![Value::TimestampTz(second_max)])],
    );
    source.set_stream_rows(order_rows(second_max));

    let transfer = harness.store.transfer(first_transfer).await.unwrap();
    let second_transfer = harness.store.create_transfer(transfer.configuration_id).await;
    harness
        .coordinator
        .process_transfer(second_transfer)
        .await
        .unwrap();

    let after_second = harness
        .store
        .destination(destination_id)
        .await
        .unwrap()
        .last_modified_at;
    assert!(after_second >= after_first);
    assert_eq!(after_second, second_max);
}
