//! Concurrency tests
//!
//! - Dropping a query stops every request
//! - In-flight requests never exceed the degree of parallelism

mod common;

use std::time::Duration;

use futures_util::StreamExt;

use shardflow::execution::{into_page_stream, FeedOptions};

use common::*;

const DOCS: usize = 40;

// =============================================================================
// Cancellation
// =============================================================================

/// A pull abandoned mid-request issues nothing further.
#[tokio::test]
async fn test_dropped_pull_stops_requests() {
    let collection = collection(4, DOCS, unordered_plan());
    collection.set_latency(Duration::from_millis(200));
    let client = collection.client();

    let mut stream = Box::pin(into_page_stream(
        client.query(query("SELECT * FROM c"), options(2)),
    ));
    let pulled = tokio::time::timeout(Duration::from_millis(20), stream.next()).await;
    assert!(pulled.is_err());
    drop(stream);

    let issued = collection.request_count();
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(collection.request_count(), issued);
    assert_eq!(collection.in_flight(), 0);
}

/// Dropping the stream between pages stops the fan-out.
#[tokio::test]
async fn test_dropped_stream_stops_fan_out() {
    let collection = collection(4, DOCS, order_by_plan("k", "Ascending"));
    collection.set_latency(Duration::from_millis(5));
    let client = collection.client();

    let mut stream = Box::pin(into_page_stream(
        client.query(query("SELECT * FROM c ORDER BY c.k"), options(2)),
    ));
    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.len(), 2);
    drop(stream);

    let issued = collection.request_count();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(collection.request_count(), issued);
    assert!(partition_requests(&collection) < DOCS / 2);
}

/// Nothing is requested before the first pull.
#[tokio::test]
async fn test_query_is_lazy() {
    let collection = collection(4, DOCS, unordered_plan());
    let client = collection.client();

    let context = client.query(query("SELECT * FROM c"), options(2));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(collection.request_count(), 0);
    drop(context);
}

// =============================================================================
// Degree of Parallelism
// =============================================================================

/// The unordered fan-out honors the knob.
#[tokio::test]
async fn test_parallel_fan_out_bounded() {
    let collection = collection(8, DOCS, unordered_plan());
    collection.set_latency(Duration::from_millis(5));

    let options = FeedOptions::cross_partition()
        .with_max_item_count(3)
        .with_max_degree_of_parallelism(2);
    let pages = run(&collection.client(), "SELECT * FROM c", options).await.unwrap();

    assert_eq!(rows(&pages).len(), DOCS);
    assert_eq!(collection.max_in_flight(), 2);
}

/// The ordered merge honors the knob.
#[tokio::test]
async fn test_order_by_refill_bounded() {
    let collection = collection(6, DOCS, order_by_plan("k", "Ascending"));
    collection.set_latency(Duration::from_millis(5));

    let options = FeedOptions::cross_partition()
        .with_max_item_count(4)
        .with_max_degree_of_parallelism(3);
    let pages = run(&collection.client(), "SELECT * FROM c ORDER BY c.k", options)
        .await
        .unwrap();

    assert_eq!(rows(&pages).len(), DOCS);
    assert!(collection.max_in_flight() <= 3);
}

/// Zero means one request per active range.
#[tokio::test]
async fn test_zero_parallelism_fans_out_fully() {
    let collection = collection(5, DOCS, unordered_plan());
    collection.set_latency(Duration::from_millis(5));

    let options = FeedOptions::cross_partition()
        .with_max_item_count(100)
        .with_max_degree_of_parallelism(0);
    run(&collection.client(), "SELECT * FROM c", options).await.unwrap();

    assert_eq!(collection.max_in_flight(), 5);
}
