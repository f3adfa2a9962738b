//! Shared helpers for pipeline integration tests

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{json, Value};

use shardflow::execution::{
    drain, FeedOptions, InMemoryCollection, Page, QueryClient, QueryResult,
};
use shardflow::plan::{QueryPlan, SqlQuerySpec};

// =============================================================================
// Collections
// =============================================================================

pub fn plan(value: Value) -> QueryPlan {
    QueryPlan::from_json(&value.to_string()).unwrap()
}

pub fn unordered_plan() -> QueryPlan {
    plan(json!({"queryInfo": {}}))
}

pub fn order_by_plan(field: &str, direction: &str) -> QueryPlan {
    plan(json!({
        "queryInfo": {
            "orderBy": [direction],
            "orderByExpressions": [format!("c.{}", field)]
        }
    }))
}

/// `ranges` equal ranges holding `docs` documents `{id, pk, k}`
pub fn collection(ranges: usize, docs: usize, plan: QueryPlan) -> Arc<InMemoryCollection> {
    let collection = InMemoryCollection::uniform(ranges);
    collection.set_plan(plan).unwrap();
    for i in 0..docs {
        collection.insert(json!({"id": format!("doc-{:03}", i), "pk": i, "k": i as i64 % 7}));
    }
    Arc::new(collection)
}

/// Documents with the given sort keys spread over `ranges` ranges
pub fn keyed_collection(ranges: usize, keys: &[i64], plan: QueryPlan) -> Arc<InMemoryCollection> {
    let collection = InMemoryCollection::uniform(ranges);
    collection.set_plan(plan).unwrap();
    for (i, key) in keys.iter().enumerate() {
        collection.insert(json!({"id": format!("doc-{:03}", i), "pk": i, "k": key}));
    }
    Arc::new(collection)
}

// =============================================================================
// Running queries
// =============================================================================

pub fn query(text: &str) -> SqlQuerySpec {
    SqlQuerySpec::new(text)
}

pub fn options(page_size: usize) -> FeedOptions {
    FeedOptions::cross_partition().with_max_item_count(page_size)
}

/// Drain a query through the client entry point
pub async fn run(client: &QueryClient, text: &str, options: FeedOptions) -> QueryResult<Vec<Page>> {
    let mut context = client.query(query(text), options);
    drain(&mut context).await
}

pub fn rows(pages: &[Page]) -> Vec<Value> {
    pages.iter().flat_map(|p| p.rows.iter().cloned()).collect()
}

pub fn keys(rows: &[Value]) -> Vec<i64> {
    rows.iter().map(|r| r["k"].as_i64().unwrap()).collect()
}

pub fn sorted_ids(rows: &[Value]) -> Vec<String> {
    let mut ids: Vec<String> = rows
        .iter()
        .map(|r| r["id"].as_str().unwrap().to_string())
        .collect();
    ids.sort();
    ids
}

pub fn total_charge(pages: &[Page]) -> f64 {
    pages.iter().map(|p| p.request_charge).sum()
}

/// Requests that targeted a partition key range
pub fn partition_requests(collection: &InMemoryCollection) -> usize {
    collection
        .request_log()
        .iter()
        .filter(|r| r.partition_key_range_id.is_some())
        .count()
}
