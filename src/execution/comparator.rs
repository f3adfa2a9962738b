//! Row ordering for ORDER BY merges
//!
//! Rows from an ORDER BY query arrive either as plain documents or wrapped
//! in the rewritten-query envelope:
//!
//! ```text
//! {"orderByItems": [{"item": <key 0>}, ...], "payload": <document>}
//! ```
//!
//! Sort keys are read from `orderByItems` when present, otherwise from the
//! document by field path. Rows with equal keys are ordered by document id,
//! the order every range returns them in, so the merged order does not
//! depend on how the key space is partitioned.

use std::cmp::Ordering;

use serde_json::Value;

use crate::plan::{SortDirection, SortSpec};

const ORDER_BY_ITEMS: &str = "orderByItems";
const PAYLOAD: &str = "payload";
const RID: &str = "_rid";

/// Compares two JSON values for sorting.
///
/// Ordering rules:
/// - undefined < null < bool < number < string < array < object
/// - For same types, natural ordering; arrays and objects compare equal
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a_val), Some(b_val)) => {
            let a_type = type_order(a_val);
            let b_type = type_order(b_val);
            if a_type != b_type {
                return a_type.cmp(&b_type);
            }

            match (a_val, b_val) {
                (Value::Bool(a_b), Value::Bool(b_b)) => a_b.cmp(b_b),
                (Value::Number(a_n), Value::Number(b_n)) => {
                    if let (Some(a_i), Some(b_i)) = (a_n.as_i64(), b_n.as_i64()) {
                        return a_i.cmp(&b_i);
                    }
                    let a_f = a_n.as_f64().unwrap_or(0.0);
                    let b_f = b_n.as_f64().unwrap_or(0.0);
                    a_f.partial_cmp(&b_f).unwrap_or(Ordering::Equal)
                }
                (Value::String(a_s), Value::String(b_s)) => a_s.cmp(b_s),
                _ => Ordering::Equal,
            }
        }
    }
}

fn type_order(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Strip the ORDER BY envelope, returning the document
pub fn unwrap_payload(row: Value) -> Value {
    match row {
        Value::Object(mut map) if map.contains_key(ORDER_BY_ITEMS) => {
            map.remove(PAYLOAD).unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Document id of a plain or enveloped row
pub fn row_id(row: &Value) -> Option<&Value> {
    if row.get(ORDER_BY_ITEMS).is_some() {
        return row
            .get(RID)
            .or_else(|| row.get(PAYLOAD).and_then(|payload| payload.get("id")));
    }
    row.get("id")
}

/// A row at the head of one source of a merge
#[derive(Debug, Clone, Copy)]
pub struct OrderedRow<'a> {
    /// Lower bound of the key span the row came from
    pub range_min: &'a str,
    pub row: &'a Value,
}

/// Total order over rows built from a sort specification
#[derive(Debug, Clone, Default)]
pub struct RowComparator {
    specs: Vec<SortSpec>,
}

impl RowComparator {
    pub fn new(specs: Vec<SortSpec>) -> Self {
        Self { specs }
    }

    pub fn specs(&self) -> &[SortSpec] {
        &self.specs
    }

    /// Sort key `index` of `row`; `None` is undefined
    pub fn sort_key<'a>(&self, row: &'a Value, index: usize) -> Option<&'a Value> {
        match row.get(ORDER_BY_ITEMS) {
            Some(Value::Array(items)) => items.get(index).and_then(|item| item.get("item")),
            _ => self.specs.get(index).and_then(|spec| spec.extract(row)),
        }
    }

    /// Compare two rows by the sort keys alone
    pub fn compare_rows(&self, a: &Value, b: &Value) -> Ordering {
        for (index, spec) in self.specs.iter().enumerate() {
            let ordering = compare_values(self.sort_key(a, index), self.sort_key(b, index));
            let ordering = match spec.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    /// Compare by sort keys, then document id
    pub fn compare_positions(&self, a: &Value, b: &Value) -> Ordering {
        self.compare_rows(a, b)
            .then_with(|| compare_values(row_id(a), row_id(b)))
    }

    /// Compare merge heads; rows equal by position break on span start
    pub fn compare(&self, a: OrderedRow<'_>, b: OrderedRow<'_>) -> Ordering {
        self.compare_positions(a.row, b.row)
            .then_with(|| a.range_min.cmp(b.range_min))
    }

    /// Envelope recording where `row` sits in the merged order
    pub fn position_of(&self, row: &Value) -> Value {
        let items: Vec<Value> = (0..self.specs.len())
            .map(|index| match self.sort_key(row, index) {
                Some(key) => serde_json::json!({ "item": key }),
                None => serde_json::json!({}),
            })
            .collect();
        serde_json::json!({
            ORDER_BY_ITEMS: items,
            RID: row_id(row).cloned().unwrap_or(Value::Null),
        })
    }
}
