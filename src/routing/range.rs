//! Partition key ranges and effective-partition-key arithmetic
//!
//! Effective partition keys are uppercase hex strings. The empty string is
//! the lowest key and `"FF"` is the exclusive upper bound of the key space.
//! Keys produced by [`effective_partition_key`] are always 16 hex digits
//! with a leading byte below `FF`, so plain string comparison orders them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Lowest effective partition key
pub const MIN_EPK: &str = "";

/// Exclusive upper bound of the key space
pub const MAX_EPK: &str = "FF";

/// Half-open interval `[min, max)` of effective partition keys
///
/// A range with `min == max` is a point range matching exactly that key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub min: String,
    pub max: String,
}

impl Range {
    /// Create a range
    pub fn new(min: impl Into<String>, max: impl Into<String>) -> Self {
        Self {
            min: min.into(),
            max: max.into(),
        }
    }

    /// The whole key space
    pub fn full() -> Self {
        Self::new(MIN_EPK, MAX_EPK)
    }

    /// Point range for a single key
    pub fn point(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            min: key.clone(),
            max: key,
        }
    }

    /// Whether this is a point range
    pub fn is_point(&self) -> bool {
        self.min == self.max
    }

    /// Whether `key` lies inside the range
    pub fn contains(&self, key: &str) -> bool {
        if self.is_point() {
            return key == self.min;
        }
        self.min.as_str() <= key && key < self.max.as_str()
    }

    /// Whether two ranges share at least one key
    pub fn overlaps(&self, other: &Range) -> bool {
        match (self.is_point(), other.is_point()) {
            (true, true) => self.min == other.min,
            (true, false) => other.contains(&self.min),
            (false, true) => self.contains(&other.min),
            (false, false) => self.min < other.max && other.min < self.max,
        }
    }
}

/// A partition key range as reported by the service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionKeyRange {
    pub id: String,
    pub min_inclusive: String,
    pub max_exclusive: String,
    /// Ids of the ranges this one replaced
    #[serde(default)]
    pub parents: Vec<String>,
}

impl PartitionKeyRange {
    /// Create a range without parents
    pub fn new(
        id: impl Into<String>,
        min_inclusive: impl Into<String>,
        max_exclusive: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            min_inclusive: min_inclusive.into(),
            max_exclusive: max_exclusive.into(),
            parents: Vec::new(),
        }
    }

    /// Boundaries as a [`Range`]
    pub fn range(&self) -> Range {
        Range::new(self.min_inclusive.clone(), self.max_exclusive.clone())
    }

    /// Whether `key` belongs to this range
    pub fn contains(&self, key: &str) -> bool {
        self.range().contains(key)
    }
}

/// Hash a partition key value into the effective-partition-key space
pub fn effective_partition_key(partition_key: &Value) -> String {
    let digest = Sha256::digest(partition_key.to_string().as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    format_epk(u64::from_be_bytes(prefix) % EPK_SPACE)
}

/// Numeric size of the key space below `"FF"`
const EPK_SPACE: u64 = 0xFF00_0000_0000_0000;

/// Parse a boundary into its numeric position
pub fn epk_position(epk: &str) -> u64 {
    if epk.is_empty() {
        return 0;
    }
    if epk == MAX_EPK {
        return EPK_SPACE;
    }
    let padded = format!("{:0<16}", epk);
    u64::from_str_radix(&padded[..16], 16).unwrap_or(EPK_SPACE)
}

/// Format a numeric position as a boundary string
pub fn format_epk(position: u64) -> String {
    if position == 0 {
        return MIN_EPK.to_string();
    }
    if position >= EPK_SPACE {
        return MAX_EPK.to_string();
    }
    format!("{:016X}", position)
}

/// Split a range into `parts` contiguous children covering the same span
///
/// Children get ids `"{next_id}"`, `"{next_id + 1}"`, ... and list the
/// source as their parent.
pub fn split_range(source: &PartitionKeyRange, parts: usize, next_id: u64) -> Vec<PartitionKeyRange> {
    let parts = parts.max(1) as u64;
    let lo = epk_position(&source.min_inclusive);
    let hi = epk_position(&source.max_exclusive);
    let step = (hi - lo) / parts;

    let mut children = Vec::with_capacity(parts as usize);
    let mut start = source.min_inclusive.clone();
    for i in 0..parts {
        let end = if i + 1 == parts {
            source.max_exclusive.clone()
        } else {
            format_epk(lo + step * (i + 1))
        };
        let mut parents = source.parents.clone();
        parents.push(source.id.clone());
        children.push(PartitionKeyRange {
            id: (next_id + i).to_string(),
            min_inclusive: start,
            max_exclusive: end.clone(),
            parents,
        });
        start = end;
    }
    children
}
