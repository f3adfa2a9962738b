//! Cross-partition ORDER BY merge tests
//!
//! - Merged output follows the sort specification
//! - The merge stops fetching once TOP is satisfied

mod common;

use std::sync::Arc;

use proptest::prelude::*;
use serde_json::json;

use shardflow::execution::{FeedOptions, InMemoryCollection};

use common::*;

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

// =============================================================================
// Property Tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Ascending merge yields non-decreasing keys and loses nothing.
    #[test]
    fn prop_ascending_merge_is_sorted(
        input in prop::collection::vec(-50i64..50, 0..40),
        ranges in 1usize..5,
        page_size in 1usize..7,
    ) {
        let collection = keyed_collection(ranges, &input, order_by_plan("k", "Ascending"));
        let client = collection.client();

        let merged = block_on(async {
            let pages = run(&client, "SELECT * FROM c ORDER BY c.k", options(page_size)).await.unwrap();
            keys(&rows(&pages))
        });

        prop_assert!(merged.windows(2).all(|w| w[0] <= w[1]));
        let mut expected = input.clone();
        expected.sort();
        prop_assert_eq!(merged, expected);
    }

    /// Descending merge yields non-increasing keys.
    #[test]
    fn prop_descending_merge_is_sorted(
        input in prop::collection::vec(-50i64..50, 0..40),
        ranges in 1usize..5,
        page_size in 1usize..7,
    ) {
        let collection = keyed_collection(ranges, &input, order_by_plan("k", "Descending"));
        let client = collection.client();

        let merged = block_on(async {
            let pages = run(&client, "SELECT * FROM c ORDER BY c.k DESC", options(page_size)).await.unwrap();
            keys(&rows(&pages))
        });

        prop_assert!(merged.windows(2).all(|w| w[0] >= w[1]));
        prop_assert_eq!(merged.len(), input.len());
    }
}

// =============================================================================
// Scenario Tests
// =============================================================================

fn interleaved() -> Arc<InMemoryCollection> {
    let collection = InMemoryCollection::uniform(3);
    collection.set_plan(order_by_plan("k", "Ascending")).unwrap();
    for (range, keys) in [("0", [1, 4, 7]), ("1", [2, 5, 8]), ("2", [3, 6, 9])] {
        for k in keys {
            collection
                .insert_into(range, json!({"id": format!("r{}", k), "k": k}))
                .unwrap();
        }
    }
    Arc::new(collection)
}

/// Three interleaved ranges with TOP 5 stop fetching at the fifth row.
#[tokio::test]
async fn test_top_five_over_three_ranges() {
    let collection = interleaved();
    let client = collection.client();

    let options = FeedOptions::cross_partition()
        .with_max_item_count(1)
        .with_top(5);
    let pages = run(&client, "SELECT TOP 5 * FROM c ORDER BY c.k", options)
        .await
        .unwrap();

    assert_eq!(keys(&rows(&pages)), vec![1, 2, 3, 4, 5]);
    // One head per range, then one refill per row taken after the first
    assert_eq!(partition_requests(&collection), 7);
    assert_eq!(collection.requests_for("2"), 2);
}

/// Without TOP every row comes out in order.
#[tokio::test]
async fn test_interleaved_ranges_fully_merged() {
    let collection = interleaved();
    let client = collection.client();

    let pages = run(&client, "SELECT * FROM c ORDER BY c.k", options(4)).await.unwrap();

    assert_eq!(keys(&rows(&pages)), (1..=9).collect::<Vec<_>>());
    let (last, rest) = pages.split_last().unwrap();
    assert!(rest.iter().all(|p| p.has_more()));
    assert!(!last.has_more());
    assert!(pages.iter().all(|p| p.len() <= 4));
}

/// Ties across ranges are broken deterministically.
#[tokio::test]
async fn test_equal_keys_are_stable_across_runs() {
    let input = vec![3, 3, 3, 1, 1, 2, 2, 3];
    let first = {
        let collection = keyed_collection(4, &input, order_by_plan("k", "Ascending"));
        let pages = run(&collection.client(), "SELECT * FROM c ORDER BY c.k", options(2))
            .await
            .unwrap();
        rows(&pages)
    };
    let second = {
        let collection = keyed_collection(4, &input, order_by_plan("k", "Ascending"));
        let pages = run(&collection.client(), "SELECT * FROM c ORDER BY c.k", options(3))
            .await
            .unwrap();
        rows(&pages)
    };

    assert_eq!(first, second);
}
