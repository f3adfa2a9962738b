//! Partition routing for shardflow
//!
//! A collection's key space is tiled by partition key ranges. Queries fan
//! out to every range overlapping the spans named by the query plan, and a
//! split replaces one range with contiguous children covering the same span.

mod range;
mod resolver;

pub use range::{
    effective_partition_key, epk_position, format_epk, split_range, PartitionKeyRange, Range,
    MAX_EPK, MIN_EPK,
};
pub use resolver::{resolve_all, PartitionKeyRangeResolver, StaticRangeResolver};
