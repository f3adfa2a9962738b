//! Deterministic in-memory query service
//!
//! [`InMemoryCollection`] plays both the gateway and the topology service
//! for one collection. Documents live at an effective partition key and
//! belong to whichever range currently covers it, so a split only rewrites
//! the range list.
//!
//! Each range serves its documents sorted by the configured plan's sort
//! keys, then by `id`. Continuations are the position of the last row
//! served, encoded like an ORDER BY envelope:
//!
//! ```text
//! {"orderByItems": [{"item": <key>}, ...], "id": "<doc id>"}
//! ```
//!
//! so a child range resuming from its parent's token skips exactly the rows
//! the parent already delivered. `"{}"` resumes from the start.
//!
//! Faults are scripted: splits after a number of served pages, leading
//! empty pages, failures on a given request number, and per-request latency.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::plan::{AggregateKind, QueryPlan, SortSpec};
use crate::routing::{
    effective_partition_key, epk_position, format_epk, split_range, PartitionKeyRange,
    PartitionKeyRangeResolver, Range, MAX_EPK, MIN_EPK,
};

use super::client::{QueryClient, RequestExecutor};
use super::comparator::{compare_values, RowComparator};
use super::errors::{QueryError, QueryResult};
use super::options::FeedOptions;
use super::page::Page;
use super::request::QueryRequest;

const DEFAULT_COLLECTION: &str = "docs";
const DEFAULT_PARTITION_KEY: &str = "pk";

/// One request as the service saw it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRecord {
    pub partition_key_range_id: Option<String>,
    pub continuation: Option<String>,
    pub page_size: usize,
}

struct StoredDocument {
    epk: String,
    body: Value,
}

struct PendingSplit {
    after: usize,
    parts: usize,
}

struct State {
    ranges: Vec<PartitionKeyRange>,
    documents: Vec<StoredDocument>,
    partition_key: String,
    plan: Option<(QueryPlan, String)>,
    aggregate_field: Option<String>,
    splits: HashMap<String, PendingSplit>,
    served: HashMap<String, usize>,
    empty_pages: HashMap<String, usize>,
    failures: HashMap<usize, QueryError>,
    base_charge: f64,
    row_charge: f64,
    next_range_id: u64,
    latency: Option<Duration>,
    log: Vec<RequestRecord>,
}

/// Fake partitioned collection with scripted topology changes
pub struct InMemoryCollection {
    name: String,
    state: RwLock<State>,
    requests: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Decrements the in-flight count when a request finishes or is dropped
struct InFlightGuard<'a> {
    counter: &'a AtomicUsize,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, AtomicOrdering::SeqCst);
    }
}

impl InMemoryCollection {
    /// Collection tiled by `ranges`
    pub fn with_ranges(ranges: Vec<PartitionKeyRange>) -> Self {
        let next_range_id = ranges
            .iter()
            .filter_map(|r| r.id.parse::<u64>().ok())
            .max()
            .map_or(0, |id| id + 1);

        Self {
            name: DEFAULT_COLLECTION.to_string(),
            state: RwLock::new(State {
                ranges,
                documents: Vec::new(),
                partition_key: DEFAULT_PARTITION_KEY.to_string(),
                plan: None,
                aggregate_field: None,
                splits: HashMap::new(),
                served: HashMap::new(),
                empty_pages: HashMap::new(),
                failures: HashMap::new(),
                base_charge: 1.0,
                row_charge: 0.0,
                next_range_id,
                latency: None,
                log: Vec::new(),
            }),
            requests: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Collection with `count` equal ranges with ids `"0"`, `"1"`, ...
    pub fn uniform(count: usize) -> Self {
        let root = PartitionKeyRange::new("root", MIN_EPK, MAX_EPK);
        let ranges = split_range(&root, count, 0)
            .into_iter()
            .map(|mut range| {
                range.parents.clear();
                range
            })
            .collect();
        Self::with_ranges(ranges)
    }

    /// Rename the collection
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Client running queries against this collection
    pub fn client(self: &Arc<Self>) -> QueryClient {
        QueryClient::new(self.name.clone(), self.clone(), self.clone())
    }

    /// Field holding the partition key (default `pk`)
    pub fn set_partition_key(&self, field: impl Into<String>) {
        self.state().partition_key = field.into();
    }

    /// Store a document at the hash of its partition key
    ///
    /// Documents without the partition key field hash their `id`.
    pub fn insert(&self, document: Value) {
        let mut state = self.state();
        let key = document
            .get(&state.partition_key)
            .or_else(|| document.get("id"))
            .unwrap_or(&document);
        let epk = effective_partition_key(key);
        state.documents.push(StoredDocument {
            epk,
            body: document,
        });
    }

    /// Store a document inside a specific range
    pub fn insert_into(&self, range_id: &str, document: Value) -> QueryResult<()> {
        let mut state = self.state();
        let range = state
            .ranges
            .iter()
            .find(|r| r.id == range_id)
            .ok_or_else(|| QueryError::partition_gone(range_id))?;

        let lo = epk_position(&range.min_inclusive);
        let hi = epk_position(&range.max_exclusive);
        let hash = epk_position(&effective_partition_key(&document));
        let position = if hi > lo { lo + hash % (hi - lo) } else { lo };

        state.documents.push(StoredDocument {
            epk: format_epk(position),
            body: document,
        });
        Ok(())
    }

    /// Plan returned with cross-partition refusals; also drives row order
    pub fn set_plan(&self, plan: QueryPlan) -> QueryResult<()> {
        let json = serde_json::to_string(&plan)
            .map_err(|e| QueryError::invariant(format!("plan not serializable: {}", e)))?;
        self.state().plan = Some((plan, json));
        Ok(())
    }

    /// Field aggregated by SUM, MIN, MAX and AVG partials
    pub fn set_aggregate_field(&self, field: impl Into<String>) {
        self.state().aggregate_field = Some(field.into());
    }

    /// Split `range_id` into `parts` once it has served `after` pages
    pub fn split_after(&self, range_id: &str, after: usize, parts: usize) {
        self.state()
            .splits
            .insert(range_id.to_string(), PendingSplit { after, parts });
    }

    /// Answer the next `count` requests for `range_id` with empty pages
    pub fn empty_pages_before(&self, range_id: &str, count: usize) {
        self.state().empty_pages.insert(range_id.to_string(), count);
    }

    /// Fail request number `request` (1-based) with `error`
    pub fn fail_request(&self, request: usize, error: QueryError) {
        self.state().failures.insert(request, error);
    }

    /// Charge per request and per returned row
    pub fn set_charge(&self, per_request: f64, per_row: f64) {
        let mut state = self.state();
        state.base_charge = per_request;
        state.row_charge = per_row;
    }

    /// Delay every response
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = Some(latency);
    }

    /// Current ranges in key order
    pub fn ranges(&self) -> Vec<PartitionKeyRange> {
        let mut ranges = self.state().ranges.clone();
        ranges.sort_by(|a, b| a.min_inclusive.cmp(&b.min_inclusive));
        ranges
    }

    /// Requests received so far
    pub fn request_count(&self) -> usize {
        self.requests.load(AtomicOrdering::SeqCst)
    }

    /// Requests for `range_id` received so far
    pub fn requests_for(&self, range_id: &str) -> usize {
        self.state()
            .log
            .iter()
            .filter(|r| r.partition_key_range_id.as_deref() == Some(range_id))
            .count()
    }

    /// Every request received, in arrival order
    pub fn request_log(&self) -> Vec<RequestRecord> {
        self.state().log.clone()
    }

    /// Requests currently being served
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(AtomicOrdering::SeqCst)
    }

    /// Highest number of requests served at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(AtomicOrdering::SeqCst)
    }

    fn enter(&self) -> InFlightGuard<'_> {
        let now = self.in_flight.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, AtomicOrdering::SeqCst);
        InFlightGuard {
            counter: &self.in_flight,
        }
    }

    fn serve(&self, number: usize, request: &QueryRequest) -> QueryResult<Page> {
        let mut state = self.state();
        state.log.push(RequestRecord {
            partition_key_range_id: request.partition_key_range_id.clone(),
            continuation: request.continuation.clone(),
            page_size: request.page_size,
        });

        if let Some(error) = state.failures.remove(&number) {
            return Err(error);
        }

        match request.partition_key_range_id.as_deref() {
            Some(range_id) => state.serve_range(range_id, request),
            None => state.serve_collection(request),
        }
    }
}

impl State {
    fn comparator(&self) -> RowComparator {
        RowComparator::new(
            self.plan
                .as_ref()
                .map(|(plan, _)| plan.sort_specs())
                .unwrap_or_default(),
        )
    }

    fn aggregates(&self) -> &[AggregateKind] {
        self.plan
            .as_ref()
            .map(|(plan, _)| plan.aggregates())
            .unwrap_or(&[])
    }

    fn serve_collection(&mut self, request: &QueryRequest) -> QueryResult<Page> {
        if let Some((_, plan_json)) = &self.plan {
            if self.ranges.len() > 1 || !self.aggregates().is_empty() {
                let body = json!({
                    "code": "BadRequest",
                    "message": "Cross partition query is required but disabled or not servable",
                    "additionalErrorInfo": plan_json,
                });
                return Err(QueryError::cross_partition_not_servable(body.to_string())
                    .with_request_charge(self.base_charge));
            }
        }

        let rows = self.sorted_rows(|_| true);
        let page = self.page_from(rows, request)?;
        *self.served.entry(String::new()).or_default() += 1;
        Ok(page)
    }

    fn serve_range(&mut self, range_id: &str, request: &QueryRequest) -> QueryResult<Page> {
        let index = self
            .ranges
            .iter()
            .position(|r| r.id == range_id)
            .ok_or_else(|| QueryError::partition_gone(range_id))?;
        let range = self.ranges[index].clone();

        let served = self.served.get(range_id).copied().unwrap_or(0);
        if let Some(split) = self.splits.get(range_id) {
            if served >= split.after {
                let children = split_range(&range, split.parts, self.next_range_id);
                self.next_range_id += children.len() as u64;
                self.splits.remove(range_id);
                self.ranges.splice(index..=index, children);
                return Err(QueryError::partition_gone(range_id));
            }
        }
        *self.served.entry(range_id.to_string()).or_default() += 1;

        if let Some(remaining) = self.empty_pages.get_mut(range_id) {
            if *remaining > 0 {
                *remaining -= 1;
                let continuation = request.continuation.clone().or_else(|| Some("{}".into()));
                return Ok(self.page(Vec::new(), continuation, request, range_id));
            }
        }

        let span = range.range();
        let rows = self.sorted_rows(|epk| span.contains(epk));

        if !self.aggregates().is_empty() {
            let partial = self.partial_row(&rows);
            return Ok(self.page(vec![partial], None, request, range_id));
        }

        self.page_from(rows, request)
    }

    fn sorted_rows(&self, belongs: impl Fn(&str) -> bool) -> Vec<&Value> {
        let comparator = self.comparator();
        let mut rows: Vec<&Value> = self
            .documents
            .iter()
            .filter(|d| belongs(&d.epk))
            .map(|d| &d.body)
            .collect();
        rows.sort_by(|a, b| {
            comparator
                .compare_rows(a, b)
                .then_with(|| document_id(a).cmp(&document_id(b)))
        });
        rows
    }

    fn page_from(&self, rows: Vec<&Value>, request: &QueryRequest) -> QueryResult<Page> {
        let comparator = self.comparator();

        let start = match request.continuation.as_deref().map(parse_position).transpose()? {
            Some(Some(position)) => rows
                .iter()
                .position(|row| {
                    comparator
                        .compare_rows(row, &position)
                        .then_with(|| document_id(row).cmp(&document_id(&position)))
                        .is_gt()
                })
                .unwrap_or(rows.len()),
            _ => 0,
        };
        let end = (start + request.page_size.max(1)).min(rows.len());

        let continuation = if end < rows.len() {
            Some(position_token(&comparator, rows[end - 1]))
        } else {
            None
        };
        let page_rows = rows[start..end].iter().map(|row| (*row).clone()).collect();
        let range_id = request.partition_key_range_id.as_deref().unwrap_or("");
        Ok(self.page(page_rows, continuation, request, range_id))
    }

    fn page(
        &self,
        rows: Vec<Value>,
        continuation: Option<String>,
        request: &QueryRequest,
        range_id: &str,
    ) -> Page {
        let charge = self.base_charge + self.row_charge * rows.len() as f64;
        let mut page = Page::new(rows, continuation, charge);
        page.activity_id = Some(request.activity_id.to_string());
        page.session_token = Some(format!("{}:0", range_id));
        page
    }

    fn partial_row(&self, rows: &[&Value]) -> Value {
        let values: Vec<&Value> = match &self.aggregate_field {
            Some(field) => {
                let spec = SortSpec::asc(field.clone());
                rows.iter().filter_map(|row| spec.extract(row)).collect()
            }
            None => Vec::new(),
        };
        let numbers: Vec<&serde_json::Number> = values
            .iter()
            .filter_map(|v| match v {
                Value::Number(n) => Some(n),
                _ => None,
            })
            .collect();

        let partials = self
            .aggregates()
            .iter()
            .map(|kind| match kind {
                AggregateKind::Count => json!({"item": rows.len()}),
                AggregateKind::Sum if numbers.is_empty() => json!({}),
                AggregateKind::Sum => json!({"item": sum(&numbers)}),
                AggregateKind::Min => extreme(&values, std::cmp::Ordering::Less),
                AggregateKind::Max => extreme(&values, std::cmp::Ordering::Greater),
                AggregateKind::Average => {
                    json!({"item": {"sum": sum(&numbers), "count": numbers.len()}})
                }
            })
            .collect();
        Value::Array(partials)
    }
}

fn sum(numbers: &[&serde_json::Number]) -> Value {
    let integers: Option<Vec<i64>> = numbers.iter().map(|n| n.as_i64()).collect();
    match integers {
        Some(ints) => json!(ints.iter().sum::<i64>()),
        None => json!(numbers.iter().filter_map(|n| n.as_f64()).sum::<f64>()),
    }
}

fn extreme(values: &[&Value], wanted: std::cmp::Ordering) -> Value {
    let best = values.iter().copied().reduce(|best, candidate| {
        if compare_values(Some(candidate), Some(best)) == wanted {
            candidate
        } else {
            best
        }
    });
    match best {
        Some(value) => json!({"item": value}),
        None => json!({}),
    }
}

fn document_id(row: &Value) -> String {
    match row.get("id") {
        Some(Value::String(id)) => id.clone(),
        Some(other) => other.to_string(),
        None => row.to_string(),
    }
}

fn position_token(comparator: &RowComparator, row: &Value) -> String {
    let items: Vec<Value> = (0..comparator.specs().len())
        .map(|index| match comparator.sort_key(row, index) {
            Some(key) => json!({"item": key}),
            None => json!({}),
        })
        .collect();
    json!({"orderByItems": items, "id": document_id(row)}).to_string()
}

/// Parsed continuation; `None` resumes from the start
fn parse_position(token: &str) -> QueryResult<Option<Value>> {
    let position: Value = serde_json::from_str(token)
        .map_err(|_| QueryError::transport(400, format!("malformed continuation '{}'", token)))?;
    Ok(position.get("id").is_some().then_some(position))
}

impl RequestExecutor for InMemoryCollection {
    fn execute(&self, request: QueryRequest) -> BoxFuture<'_, QueryResult<Page>> {
        Box::pin(async move {
            let number = self.requests.fetch_add(1, AtomicOrdering::SeqCst) + 1;
            let _in_flight = self.enter();

            let latency = self.state().latency;
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            self.serve(number, &request)
        })
    }
}

impl PartitionKeyRangeResolver for InMemoryCollection {
    fn overlapping_ranges<'a>(
        &'a self,
        _collection: &'a str,
        range: &'a Range,
    ) -> BoxFuture<'a, QueryResult<Vec<PartitionKeyRange>>> {
        Box::pin(async move {
            Ok(self
                .ranges()
                .into_iter()
                .filter(|r| r.range().overlaps(range))
                .collect())
        })
    }
}

fn default_collection() -> String {
    DEFAULT_COLLECTION.to_string()
}

fn default_partition_key() -> String {
    DEFAULT_PARTITION_KEY.to_string()
}

fn default_split_parts() -> usize {
    2
}

/// Scripted split in a fixture
#[derive(Debug, Clone, Deserialize)]
pub struct FixtureSplit {
    pub range: String,
    pub after_requests: usize,
    #[serde(default = "default_split_parts")]
    pub parts: usize,
}

/// JSON description of a collection and a query to run against it
#[derive(Debug, Clone, Deserialize)]
pub struct Fixture {
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Ranges; a single range covering the key space when empty
    #[serde(default)]
    pub ranges: Vec<PartitionKeyRange>,
    #[serde(default)]
    pub documents: Vec<Value>,
    #[serde(default = "default_partition_key")]
    pub partition_key: String,
    /// Query plan the gateway answers cross-partition queries with
    #[serde(default)]
    pub plan: Option<Value>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub aggregate_field: Option<String>,
    #[serde(default)]
    pub splits: Vec<FixtureSplit>,
    #[serde(default)]
    pub options: FeedOptions,
}

impl Fixture {
    /// Load a fixture file
    pub fn load(path: &Path) -> QueryResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| QueryError::Config(format!("Failed to read fixture: {}", e)))?;
        Self::from_json(&content)
    }

    /// Parse a fixture
    pub fn from_json(json: &str) -> QueryResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| QueryError::Config(format!("Invalid fixture JSON: {}", e)))
    }

    /// The fixture's query plan, validated
    pub fn plan(&self) -> QueryResult<Option<QueryPlan>> {
        self.plan
            .as_ref()
            .map(|value| QueryPlan::from_json(&value.to_string()))
            .transpose()
    }

    /// Build the collection the fixture describes
    pub fn build(&self) -> QueryResult<Arc<InMemoryCollection>> {
        let ranges = if self.ranges.is_empty() {
            vec![PartitionKeyRange::new("0", MIN_EPK, MAX_EPK)]
        } else {
            self.ranges.clone()
        };

        let collection = InMemoryCollection::with_ranges(ranges).named(self.collection.clone());
        collection.set_partition_key(self.partition_key.clone());
        if let Some(plan) = self.plan()? {
            collection.set_plan(plan)?;
        }
        if let Some(field) = &self.aggregate_field {
            collection.set_aggregate_field(field.clone());
        }
        for split in &self.splits {
            collection.split_after(&split.range, split.after_requests, split.parts);
        }
        for document in &self.documents {
            collection.insert(document.clone());
        }
        Ok(Arc::new(collection))
    }
}
