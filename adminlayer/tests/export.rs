mod common;

use adminlayer::{bson::Bson, prelude::*};
use common::{RecordingDriver, seeded, store_with};
use futures::StreamExt;

fn batch_of(size: u64) -> AdapterConfig {
    AdapterConfig::builder().export_batch_size(size).build()
}

fn references(batch: &[Record]) -> Vec<&str> {
    batch
        .iter()
        .filter_map(|record| record.get("reference").and_then(Bson::as_str))
        .collect()
}

#[tokio::test]
async fn test_export_streams_bounded_batches() {
    let (driver, _) = seeded().await;
    let store = store_with(driver, batch_of(3));
    let exporter = store.exporter("orders").unwrap();

    let batches = exporter
        .stream(&ListRequest::new().sort(SortSpec::parse("reference")))
        .unwrap()
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<AdapterResult<Vec<_>>>()
        .unwrap();

    assert_eq!(batches.len(), 2);
    assert_eq!(references(&batches[0]), vec!["A-1", "A-2", "A-3"]);
    assert_eq!(references(&batches[1]), vec!["G-1"]);
}

#[tokio::test]
async fn test_export_applies_filter_and_hydration() {
    let (driver, _) = seeded().await;
    let store = store_with(driver, batch_of(1));
    let exporter = store.exporter("orders").unwrap();

    let batches = exporter
        .stream(
            &ListRequest::new()
                .condition(Condition::equal("customer.company.name", "Acme"))
                .sort(SortSpec::descending("total"))
                .hydrate(true),
        )
        .unwrap()
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<AdapterResult<Vec<_>>>()
        .unwrap();

    let exported = batches.concat();
    assert_eq!(references(&exported), vec!["A-2", "A-1", "A-3"]);
    assert!(exported.iter().all(|record| record.related("customer").is_some()));
}

#[tokio::test]
async fn test_failure_reports_rows_flushed() {
    let (driver, _) = seeded().await;
    let driver = RecordingDriver::failing_after(driver, 1);
    let store = store_with(driver, batch_of(2));
    let exporter = store.exporter("orders").unwrap();

    let mut batches = Box::pin(exporter.stream(&ListRequest::new()).unwrap());

    let first = batches.next().await.unwrap().unwrap();
    assert_eq!(first.len(), 2);

    let failure = batches.next().await.unwrap();
    assert!(matches!(
        failure,
        Err(AdapterError::PartialExport { rows_flushed: 2, ref source })
            if matches!(**source, AdapterError::Storage { .. })
    ));
    assert!(batches.next().await.is_none());
}

#[tokio::test]
async fn test_compile_errors_never_reach_storage() {
    let (driver, _) = seeded().await;
    let driver = RecordingDriver::new(driver);
    let store = store_with(driver.clone(), batch_of(2));
    let exporter = store.exporter("orders").unwrap();

    let result = exporter.stream(&ListRequest::new().sort(SortSpec::parse("colour")));

    assert!(matches!(result, Err(AdapterError::Schema(_))));
    assert_eq!(driver.calls(), 0);
}

#[tokio::test]
async fn test_dropping_the_stream_stops_fetching() {
    let (driver, _) = seeded().await;
    let driver = RecordingDriver::new(driver);
    let store = store_with(driver.clone(), batch_of(1));
    let exporter = store.exporter("orders").unwrap();

    let mut batches = Box::pin(exporter.stream(&ListRequest::new()).unwrap());
    batches.next().await.unwrap().unwrap();
    drop(batches);

    assert_eq!(driver.calls(), 1);
}
