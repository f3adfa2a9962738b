//! Partition split handling
//!
//! A split range is replaced by its children mid-query. The caller sees the
//! same rows as an unsplit run: nothing lost, nothing repeated. A range
//! that answers gone but still exists is read again a bounded number of
//! times.

mod common;

use shardflow::execution::{QueryError, MAX_MOVE_RETRIES};

use common::*;

const DOCS: usize = 30;

async fn unsplit_ids(ranges: usize, ordered: bool) -> Vec<String> {
    let plan = if ordered {
        order_by_plan("k", "Ascending")
    } else {
        unordered_plan()
    };
    let collection = collection(ranges, DOCS, plan);
    let pages = run(&collection.client(), "SELECT * FROM c", options(4))
        .await
        .unwrap();
    sorted_ids(&rows(&pages))
}

// =============================================================================
// Unordered Fan-out
// =============================================================================

/// Split after the first page.
#[tokio::test]
async fn test_split_mid_query_is_transparent() {
    let expected = unsplit_ids(2, false).await;

    let collection = collection(2, DOCS, unordered_plan());
    collection.split_after("0", 1, 2);
    let client = collection.client();

    let pages = run(&client, "SELECT * FROM c", options(4)).await.unwrap();

    assert_eq!(sorted_ids(&rows(&pages)), expected);
    assert_eq!(collection.ranges().len(), 3);
    assert_eq!(client.metrics().snapshot().splits_handled, 1);
}

/// Split before the range served anything.
#[tokio::test]
async fn test_split_before_first_request() {
    let collection = collection(2, DOCS, unordered_plan());
    collection.split_after("1", 0, 3);
    let client = collection.client();

    let pages = run(&client, "SELECT * FROM c", options(5)).await.unwrap();

    assert_eq!(rows(&pages).len(), DOCS);
    assert_eq!(sorted_ids(&rows(&pages)).len(), DOCS);
    assert_eq!(collection.ranges().len(), 4);
}

/// A child range splitting again is handled the same way.
#[tokio::test]
async fn test_nested_split() {
    let collection = collection(2, DOCS, unordered_plan());
    collection.split_after("0", 1, 2);
    // Children of "0" are numbered from 2
    collection.split_after("2", 1, 2);
    let client = collection.client();

    let pages = run(&client, "SELECT * FROM c", options(2)).await.unwrap();

    let ids = sorted_ids(&rows(&pages));
    let mut unique = ids.clone();
    unique.dedup();
    assert_eq!(ids.len(), DOCS);
    assert_eq!(unique.len(), DOCS);
    assert_eq!(client.metrics().snapshot().splits_handled, 2);
}

// =============================================================================
// Ordered Merge
// =============================================================================

/// A split during an ORDER BY merge keeps the global order.
#[tokio::test]
async fn test_split_during_order_by() {
    let expected = unsplit_ids(3, true).await;

    let collection = collection(3, DOCS, order_by_plan("k", "Ascending"));
    collection.split_after("1", 2, 3);
    let client = collection.client();

    let pages = run(&client, "SELECT * FROM c ORDER BY c.k", options(4))
        .await
        .unwrap();
    let merged = rows(&pages);

    assert!(keys(&merged).windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(sorted_ids(&merged), expected);
    assert_eq!(client.metrics().snapshot().splits_handled, 1);
}

/// Splitting changes neither the rows nor the order of equal keys.
#[tokio::test]
async fn test_split_keeps_tie_order() {
    let text = "SELECT * FROM c ORDER BY c.k";
    let ids = |pages: &[shardflow::execution::Page]| -> Vec<String> {
        rows(pages)
            .iter()
            .map(|r| r["id"].as_str().unwrap().to_string())
            .collect()
    };

    let unsplit = collection(3, DOCS, order_by_plan("k", "Ascending"));
    let expected = ids(&run(&unsplit.client(), text, options(2)).await.unwrap());

    let split = collection(3, DOCS, order_by_plan("k", "Ascending"));
    split.split_after("0", 1, 2);
    let actual = ids(&run(&split.client(), text, options(2)).await.unwrap());

    assert_eq!(split.ranges().len(), 4);
    assert_eq!(actual, expected);
}

// =============================================================================
// Moved Ranges
// =============================================================================

/// A range answering gone under its own id is read again.
#[tokio::test]
async fn test_moved_range_is_retried() {
    let collection = collection(2, DOCS, unordered_plan());
    // Request 1 is the refused optimistic attempt
    collection.fail_request(2, QueryError::partition_gone("0"));

    let pages = run(&collection.client(), "SELECT * FROM c", options(4))
        .await
        .unwrap();

    assert_eq!(sorted_ids(&rows(&pages)).len(), DOCS);
    assert_eq!(collection.ranges().len(), 2);
}

/// A range that keeps answering gone fails the query.
#[tokio::test]
async fn test_persistently_moved_range_fails() {
    let collection = collection(2, DOCS, unordered_plan());
    for request in 2..=2 + MAX_MOVE_RETRIES {
        collection.fail_request(request, QueryError::partition_gone("0"));
    }
    let options = options(4).with_max_degree_of_parallelism(1);

    let err = run(&collection.client(), "SELECT * FROM c", options)
        .await
        .unwrap_err();

    assert_eq!(err.code(), "SHARDFLOW_PARTITION_GONE");
}
