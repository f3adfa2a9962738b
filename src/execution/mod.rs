//! Query execution subsystem for shardflow
//!
//! Turns a query and its feed options into a pull-based sequence of pages.
//!
//! # Execution Flow
//!
//! 1. Run the query as one unpartitioned stream
//! 2. On a cross-partition refusal, parse the plan the gateway returned
//! 3. Resolve the partition key ranges the plan targets
//! 4. Build one producer per range
//! 5. Merge: concatenation, or k-way merge when the plan sorts
//! 6. Reduce aggregates, then enforce TOP
//!
//! # Invariants
//!
//! - Nothing is requested unless the caller pulls
//! - A split never surfaces: the gone range is replaced by its children
//! - Every request's charge reaches exactly one emitted page
//! - TOP is exact: `min(TOP, available)` rows

mod aggregate;
mod client;
mod comparator;
mod config;
mod context;
mod continuation;
mod errors;
mod fetcher;
mod memory;
mod options;
mod order_by;
mod page;
mod paginator;
mod parallel;
mod pipeline;
mod producer;
mod proxy;
mod request;
mod top;

pub use aggregate::AggregateContext;
pub use client::{NoRetryPolicy, QueryClient, RequestExecutor, RetryPolicy, RetryPolicyFactory};
pub use comparator::{compare_values, unwrap_payload, OrderedRow, RowComparator};
pub use config::PipelineConfig;
pub use context::{drain, into_page_stream, ExecutionContext};
pub use continuation::{CompositeContinuationToken, OrderByContinuationToken, RangeContinuation};
pub use errors::{QueryError, QueryResult, Severity};
pub use fetcher::{FetchState, Fetcher};
pub use memory::{Fixture, FixtureSplit, InMemoryCollection, RequestRecord};
pub use options::{effective_page_size, FeedOptions};
pub use order_by::OrderByContext;
pub use page::{ChargeTracker, Page};
pub use paginator::{Paginator, SingleStreamContext, StopReason};
pub use parallel::ParallelContext;
pub use pipeline::{build_pipeline, PipelineShape};
pub use producer::{Producer, ProducerStep, MAX_MOVE_RETRIES};
pub use proxy::ProxyContext;
pub use request::{headers, QueryRequest, RequestSpec};
pub use top::TopContext;
