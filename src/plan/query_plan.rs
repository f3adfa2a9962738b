//! Server-supplied query plans
//!
//! The gateway answers a cross-partition query it cannot serve with a 400
//! whose body carries the partitioned execution info under
//! `additionalErrorInfo`, either as an embedded JSON string or as an object.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::execution::{QueryError, QueryResult};
use crate::routing::Range;

use super::ast::{AggregateKind, SortDirection, SortSpec};

/// Placeholder the gateway leaves in rewritten ORDER BY queries
const ORDER_BY_FILTER_PLACEHOLDER: &str = "{documentdb-formattableorderbyquery-filter}";

/// DISTINCT mode of a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DistinctType {
    #[default]
    None,
    Ordered,
    Unordered,
}

/// Execution info for one query
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryInfo {
    #[serde(default)]
    pub distinct_type: DistinctType,
    #[serde(default)]
    pub top: Option<usize>,
    #[serde(default)]
    pub order_by: Vec<SortDirection>,
    #[serde(default)]
    pub order_by_expressions: Vec<String>,
    #[serde(default)]
    pub group_by_expressions: Vec<String>,
    #[serde(default)]
    pub aggregates: Vec<AggregateKind>,
    #[serde(default)]
    pub rewritten_query: String,
    #[serde(default)]
    pub has_select_value: bool,
}

/// Key span targeted by a query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRange {
    pub min: String,
    pub max: String,
    #[serde(default = "default_true")]
    pub is_min_inclusive: bool,
    #[serde(default)]
    pub is_max_inclusive: bool,
}

fn default_true() -> bool {
    true
}

impl QueryRange {
    /// Convert to a half-open range, or a point range for `[k, k]`
    pub fn to_range(&self) -> Range {
        if self.min == self.max && self.is_max_inclusive {
            Range::point(self.min.clone())
        } else {
            Range::new(self.min.clone(), self.max.clone())
        }
    }
}

/// Partitioned query execution info
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPlan {
    #[serde(default)]
    pub partitioned_query_execution_info_version: u32,
    #[serde(default)]
    pub query_info: QueryInfo,
    #[serde(default)]
    pub query_ranges: Vec<QueryRange>,
}

impl QueryPlan {
    /// Parse a plan from its JSON form
    pub fn from_json(json: &str) -> QueryResult<Self> {
        let plan: QueryPlan = serde_json::from_str(json)
            .map_err(|e| QueryError::malformed_plan(format!("invalid plan JSON: {}", e)))?;
        plan.check_well_formed()?;
        Ok(plan)
    }

    /// Parse the plan embedded in a cross-partition error body
    pub fn from_error_payload(payload: &str) -> QueryResult<Self> {
        let body: Value = serde_json::from_str(payload)
            .map_err(|e| QueryError::malformed_plan(format!("error body is not JSON: {}", e)))?;

        match body.get("additionalErrorInfo") {
            Some(Value::String(embedded)) => Self::from_json(embedded),
            Some(info @ Value::Object(_)) => {
                let plan: QueryPlan = serde_json::from_value(info.clone())
                    .map_err(|e| QueryError::malformed_plan(format!("invalid plan: {}", e)))?;
                plan.check_well_formed()?;
                Ok(plan)
            }
            _ => Err(QueryError::malformed_plan(
                "error body has no additionalErrorInfo",
            )),
        }
    }

    fn check_well_formed(&self) -> QueryResult<()> {
        let info = &self.query_info;
        if info.order_by.len() != info.order_by_expressions.len() {
            return Err(QueryError::malformed_plan(format!(
                "{} sort directions for {} sort expressions",
                info.order_by.len(),
                info.order_by_expressions.len()
            )));
        }
        for range in &self.query_ranges {
            if range.min > range.max {
                return Err(QueryError::malformed_plan(format!(
                    "query range min '{}' above max '{}'",
                    range.min, range.max
                )));
            }
        }
        Ok(())
    }

    /// Reject plans that need operators this pipeline does not implement
    pub fn check_supported(&self) -> QueryResult<()> {
        let info = &self.query_info;
        if !info.aggregates.is_empty() && !info.order_by.is_empty() {
            return Err(QueryError::unsupported_plan(
                "queries with both ORDER BY and aggregates are not supported",
            ));
        }
        if !info.group_by_expressions.is_empty() {
            return Err(QueryError::unsupported_plan("GROUP BY queries are not supported"));
        }
        if info.distinct_type != DistinctType::None {
            return Err(QueryError::unsupported_plan("DISTINCT queries are not supported"));
        }
        Ok(())
    }

    /// Sort specification, empty when the query has no ORDER BY
    pub fn sort_specs(&self) -> Vec<SortSpec> {
        self.query_info
            .order_by_expressions
            .iter()
            .zip(&self.query_info.order_by)
            .map(|(expression, direction)| SortSpec::from_expression(expression, *direction))
            .collect()
    }

    /// Requested TOP, if any
    pub fn top(&self) -> Option<usize> {
        self.query_info.top
    }

    /// Requested aggregates
    pub fn aggregates(&self) -> &[AggregateKind] {
        &self.query_info.aggregates
    }

    /// Key spans to fan out to; the whole key space when none are given
    pub fn target_spans(&self) -> Vec<Range> {
        if self.query_ranges.is_empty() {
            return vec![Range::full()];
        }
        self.query_ranges.iter().map(QueryRange::to_range).collect()
    }

    /// Query text to send to each partition
    pub fn partition_query<'a>(&'a self, original: &'a str) -> std::borrow::Cow<'a, str> {
        let rewritten = &self.query_info.rewritten_query;
        if rewritten.is_empty() {
            std::borrow::Cow::Borrowed(original)
        } else {
            std::borrow::Cow::Owned(rewritten.replace(ORDER_BY_FILTER_PLACEHOLDER, "true"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn order_by_plan() -> Value {
        json!({
            "partitionedQueryExecutionInfoVersion": 2,
            "queryInfo": {
                "distinctType": "None",
                "top": 5,
                "orderBy": ["Ascending", "Descending"],
                "orderByExpressions": ["c.k", "c.name"],
                "aggregates": [],
                "rewrittenQuery": "SELECT c FROM c WHERE {documentdb-formattableorderbyquery-filter} ORDER BY c.k",
                "hasSelectValue": false
            },
            "queryRanges": [
                {"min": "", "max": "FF", "isMinInclusive": true, "isMaxInclusive": false}
            ]
        })
    }

    #[test]
    fn test_parse_plan() {
        let plan = QueryPlan::from_json(&order_by_plan().to_string()).unwrap();
        assert_eq!(plan.top(), Some(5));
        let sorts = plan.sort_specs();
        assert_eq!(sorts, vec![SortSpec::asc("k"), SortSpec::desc("name")]);
        assert_eq!(plan.target_spans(), vec![Range::full()]);
    }

    #[test]
    fn test_parse_from_error_payload_string() {
        let body = json!({
            "code": "BadRequest",
            "additionalErrorInfo": order_by_plan().to_string(),
        });
        let plan = QueryPlan::from_error_payload(&body.to_string()).unwrap();
        assert_eq!(plan.query_info.order_by.len(), 2);
    }

    #[test]
    fn test_parse_from_error_payload_object() {
        let body = json!({ "additionalErrorInfo": order_by_plan() });
        assert!(QueryPlan::from_error_payload(&body.to_string()).is_ok());
    }

    #[test]
    fn test_missing_plan_is_fatal() {
        let err = QueryPlan::from_error_payload("{\"code\":\"BadRequest\"}").unwrap_err();
        assert!(err.is_fatal());
        let err = QueryPlan::from_error_payload("not json").unwrap_err();
        assert_eq!(err.code(), "SHARDFLOW_QUERY_PLAN_MALFORMED");
    }

    #[test]
    fn test_mismatched_sort_lists_rejected() {
        let mut plan = order_by_plan();
        plan["queryInfo"]["orderByExpressions"] = json!(["c.k"]);
        assert!(QueryPlan::from_json(&plan.to_string()).is_err());
    }

    #[test]
    fn test_unsupported_features() {
        let mut plan = QueryPlan::from_json(&order_by_plan().to_string()).unwrap();
        plan.query_info.aggregates = vec![AggregateKind::Count];
        assert!(plan.check_supported().is_err());

        let mut plan = QueryPlan::from_json(&order_by_plan().to_string()).unwrap();
        plan.query_info.distinct_type = DistinctType::Ordered;
        assert!(plan.check_supported().is_err());
    }

    #[test]
    fn test_rewritten_query_placeholder() {
        let plan = QueryPlan::from_json(&order_by_plan().to_string()).unwrap();
        let query = plan.partition_query("SELECT * FROM c ORDER BY c.k");
        assert!(query.contains("WHERE true"));
        assert!(!query.contains("documentdb"));
    }

    #[test]
    fn test_point_query_range() {
        let range = QueryRange {
            min: "05C1".to_string(),
            max: "05C1".to_string(),
            is_min_inclusive: true,
            is_max_inclusive: true,
        };
        assert!(range.to_range().is_point());
    }
}
