//! Query text, sort and aggregate descriptors

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A parameter bound into a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlParameter {
    pub name: String,
    pub value: Value,
}

/// Query text plus parameters, the body of every query request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlQuerySpec {
    pub query: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<SqlParameter>,
}

impl SqlQuerySpec {
    /// Create a query without parameters
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            parameters: Vec::new(),
        }
    }

    /// Bind a parameter
    pub fn with_parameter(mut self, name: impl Into<String>, value: Value) -> Self {
        self.parameters.push(SqlParameter {
            name: name.into(),
            value,
        });
        self
    }

    /// Same parameters, different text
    pub fn with_text(&self, query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            parameters: self.parameters.clone(),
        }
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    #[serde(rename = "Ascending")]
    Asc,
    #[serde(rename = "Descending")]
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

/// One key of a sort specification
///
/// `field` is a dotted path into the row, without the collection alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    /// Field to sort by
    pub field: String,
    /// Sort direction
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }

    /// Build from a query expression such as `c.address.city`
    ///
    /// The leading alias is dropped. A bare alias sorts on the whole row.
    pub fn from_expression(expression: &str, direction: SortDirection) -> Self {
        let field = match expression.split_once('.') {
            Some((_alias, path)) => path.to_string(),
            None => String::new(),
        };
        Self { field, direction }
    }

    /// Look up the sort key in a row; `None` means undefined
    pub fn extract<'a>(&self, row: &'a Value) -> Option<&'a Value> {
        if self.field.is_empty() {
            return Some(row);
        }
        self.field
            .split('.')
            .try_fold(row, |value, segment| value.get(segment))
    }
}

/// Aggregate functions the pipeline can reduce across partitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregateKind {
    Count,
    Sum,
    Min,
    Max,
    Average,
}

impl AggregateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateKind::Count => "Count",
            AggregateKind::Sum => "Sum",
            AggregateKind::Min => "Min",
            AggregateKind::Max => "Max",
            AggregateKind::Average => "Average",
        }
    }
}

impl fmt::Display for AggregateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AggregateKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "count" => Ok(AggregateKind::Count),
            "sum" => Ok(AggregateKind::Sum),
            "min" => Ok(AggregateKind::Min),
            "max" => Ok(AggregateKind::Max),
            "average" | "avg" => Ok(AggregateKind::Average),
            other => Err(format!("unknown aggregate '{}'", other)),
        }
    }
}
