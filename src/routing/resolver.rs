//! Partition key range resolution
//!
//! The pipeline never caches topology itself; it asks a resolver for the
//! ranges overlapping a key span whenever it builds producers or replaces a
//! producer after a split.

use futures_util::future::BoxFuture;

use crate::execution::QueryResult;

use super::range::{PartitionKeyRange, Range};

/// Source of the current partition key ranges of a collection
pub trait PartitionKeyRangeResolver: Send + Sync {
    /// Ranges of `collection` overlapping `range`, ordered by `min_inclusive`
    fn overlapping_ranges<'a>(
        &'a self,
        collection: &'a str,
        range: &'a Range,
    ) -> BoxFuture<'a, QueryResult<Vec<PartitionKeyRange>>>;
}

/// Resolve several spans, dropping duplicate ranges
///
/// The result is ordered by `min_inclusive`.
pub async fn resolve_all(
    resolver: &dyn PartitionKeyRangeResolver,
    collection: &str,
    spans: &[Range],
) -> QueryResult<Vec<PartitionKeyRange>> {
    let mut resolved: Vec<PartitionKeyRange> = Vec::new();
    for span in spans {
        for range in resolver.overlapping_ranges(collection, span).await? {
            if !resolved.iter().any(|r| r.id == range.id) {
                resolved.push(range);
            }
        }
    }
    resolved.sort_by(|a, b| a.min_inclusive.cmp(&b.min_inclusive));
    Ok(resolved)
}

/// Resolver over a fixed list of ranges
#[derive(Debug, Clone, Default)]
pub struct StaticRangeResolver {
    ranges: Vec<PartitionKeyRange>,
}

impl StaticRangeResolver {
    /// Create a resolver over `ranges`
    pub fn new(ranges: Vec<PartitionKeyRange>) -> Self {
        Self { ranges }
    }
}

impl PartitionKeyRangeResolver for StaticRangeResolver {
    fn overlapping_ranges<'a>(
        &'a self,
        _collection: &'a str,
        range: &'a Range,
    ) -> BoxFuture<'a, QueryResult<Vec<PartitionKeyRange>>> {
        Box::pin(async move {
            let mut matching: Vec<PartitionKeyRange> = self
                .ranges
                .iter()
                .filter(|r| r.range().overlaps(range))
                .cloned()
                .collect();
            matching.sort_by(|a, b| a.min_inclusive.cmp(&b.min_inclusive));
            Ok(matching)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_ranges() -> StaticRangeResolver {
        StaticRangeResolver::new(vec![
            PartitionKeyRange::new("2", "A0", "FF"),
            PartitionKeyRange::new("0", "", "50"),
            PartitionKeyRange::new("1", "50", "A0"),
        ])
    }

    #[tokio::test]
    async fn test_static_resolver_orders_by_min() {
        let resolver = three_ranges();
        let ranges = resolver
            .overlapping_ranges("coll", &Range::full())
            .await
            .unwrap();
        let ids: Vec<_> = ranges.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["0", "1", "2"]);
    }

    #[tokio::test]
    async fn test_resolve_all_dedupes() {
        let resolver = three_ranges();
        let spans = vec![Range::new("", "60"), Range::new("55", "58")];
        let ranges = resolve_all(&resolver, "coll", &spans).await.unwrap();
        let ids: Vec<_> = ranges.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["0", "1"]);
    }
}
