//! Query plans for shardflow
//!
//! The client never plans queries itself. The service returns a plan
//! describing the rewritten per-partition query, the target key spans, and
//! which cross-partition operators (ORDER BY, TOP, aggregates) the client
//! must apply while merging.

mod ast;
mod query_plan;

pub use ast::{AggregateKind, SortDirection, SortSpec, SqlParameter, SqlQuerySpec};
pub use query_plan::{DistinctType, QueryInfo, QueryPlan, QueryRange};
