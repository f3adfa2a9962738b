//! shardflow - client-side query pipeline for a partitioned document store
//!
//! A query first runs as a single stream. When the gateway refuses it as
//! cross-partition, the returned plan is turned into a pipeline of
//! per-range producers behind a concatenating or sort-merging context,
//! optionally wrapped by aggregate and TOP stages.

pub mod cli;
pub mod execution;
pub mod observability;
pub mod plan;
pub mod routing;
