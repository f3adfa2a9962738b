//! Cross-partition aggregate reduction
//!
//! Each range answers an aggregate query with one partial row holding one
//! element per requested aggregate:
//!
//! ```text
//! [{"item": 12}, {"item": {"sum": 40, "count": 8}}, {}]
//! ```
//!
//! `{}` marks a range with no value. Average partials carry a sum and a
//! count so they can be combined exactly.

use std::cmp::Ordering;

use futures_util::future::BoxFuture;
use serde_json::{json, Value};

use crate::plan::AggregateKind;

use super::comparator::compare_values;
use super::context::ExecutionContext;
use super::errors::{QueryError, QueryResult};
use super::page::Page;

/// Running sum that stays integral while every input is
#[derive(Debug, Clone, Copy)]
enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn zero() -> Self {
        Number::Int(0)
    }

    fn add(self, value: &serde_json::Number) -> Self {
        match (self, value.as_i64()) {
            (Number::Int(a), Some(b)) => match a.checked_add(b) {
                Some(sum) => Number::Int(sum),
                None => Number::Float(a as f64 + b as f64),
            },
            (current, _) => Number::Float(current.as_f64() + value.as_f64().unwrap_or(0.0)),
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Number::Int(n) => n as f64,
            Number::Float(f) => f,
        }
    }

    fn to_value(self) -> Value {
        match self {
            Number::Int(n) => json!(n),
            Number::Float(f) => json!(f),
        }
    }
}

/// Accumulator for one aggregate
#[derive(Debug, Clone)]
enum Accumulator {
    Count(Number),
    Sum { total: Number, defined: bool },
    Min(Option<Value>),
    Max(Option<Value>),
    Average { sum: Number, count: Number },
}

impl Accumulator {
    fn new(kind: AggregateKind) -> Self {
        match kind {
            AggregateKind::Count => Accumulator::Count(Number::zero()),
            AggregateKind::Sum => Accumulator::Sum {
                total: Number::zero(),
                defined: true,
            },
            AggregateKind::Min => Accumulator::Min(None),
            AggregateKind::Max => Accumulator::Max(None),
            AggregateKind::Average => Accumulator::Average {
                sum: Number::zero(),
                count: Number::zero(),
            },
        }
    }

    /// Fold one partial; `None` is a range without a value
    fn add(&mut self, partial: Option<&Value>) -> QueryResult<()> {
        let Some(item) = partial else {
            return Ok(());
        };

        match self {
            Accumulator::Count(total) => {
                let n = as_number(item).ok_or_else(|| malformed("count", item))?;
                *total = total.add(n);
            }
            Accumulator::Sum { total, defined } => match as_number(item) {
                Some(n) => *total = total.add(n),
                None => *defined = false,
            },
            Accumulator::Min(current) => {
                if current
                    .as_ref()
                    .map_or(true, |c| compare_values(Some(item), Some(c)) == Ordering::Less)
                {
                    *current = Some(item.clone());
                }
            }
            Accumulator::Max(current) => {
                if current
                    .as_ref()
                    .map_or(true, |c| compare_values(Some(item), Some(c)) == Ordering::Greater)
                {
                    *current = Some(item.clone());
                }
            }
            Accumulator::Average { sum, count } => {
                let partial_sum = item.get("sum").and_then(as_number);
                let partial_count = item.get("count").and_then(as_number);
                match (partial_sum, partial_count) {
                    (Some(s), Some(c)) => {
                        *sum = sum.add(s);
                        *count = count.add(c);
                    }
                    _ => return Err(malformed("average", item)),
                }
            }
        }
        Ok(())
    }

    /// Final value; `None` when undefined
    fn result(&self) -> Option<Value> {
        match self {
            Accumulator::Count(total) => Some(total.to_value()),
            Accumulator::Sum { total, defined } => defined.then(|| total.to_value()),
            Accumulator::Min(value) | Accumulator::Max(value) => value.clone(),
            Accumulator::Average { sum, count } => {
                let count = count.as_f64();
                (count > 0.0).then(|| json!(sum.as_f64() / count))
            }
        }
    }
}

fn as_number(value: &Value) -> Option<&serde_json::Number> {
    match value {
        Value::Number(n) => Some(n),
        _ => None,
    }
}

fn malformed(kind: &str, item: &Value) -> QueryError {
    QueryError::invariant(format!("malformed {} partial: {}", kind, item))
}

/// Folds every upstream row into one terminal page
pub struct AggregateContext<C> {
    inner: C,
    kinds: Vec<AggregateKind>,
    accumulators: Vec<Accumulator>,
    done: bool,
}

impl<C: ExecutionContext> AggregateContext<C> {
    pub fn new(inner: C, kinds: Vec<AggregateKind>) -> Self {
        let accumulators = kinds.iter().copied().map(Accumulator::new).collect();
        Self {
            inner,
            kinds,
            accumulators,
            done: false,
        }
    }

    pub fn kinds(&self) -> &[AggregateKind] {
        &self.kinds
    }

    fn fold(&mut self, row: &Value) -> QueryResult<()> {
        let partials: Vec<&Value> = match row {
            Value::Array(items) => items.iter().collect(),
            Value::Object(_) => vec![row],
            other => {
                return Err(QueryError::invariant(format!(
                    "aggregate partial row is not an array: {}",
                    other
                )))
            }
        };
        if partials.len() != self.accumulators.len() {
            return Err(QueryError::invariant(format!(
                "{} partials for {} aggregates",
                partials.len(),
                self.accumulators.len()
            )));
        }
        for (accumulator, partial) in self.accumulators.iter_mut().zip(partials) {
            accumulator.add(partial.get("item"))?;
        }
        Ok(())
    }

    fn result_row(&self) -> Option<Value> {
        if let [single] = self.accumulators.as_slice() {
            return single.result();
        }
        Some(Value::Array(
            self.accumulators
                .iter()
                .map(|a| a.result().unwrap_or(Value::Null))
                .collect(),
        ))
    }

    async fn next_page_inner(&mut self) -> QueryResult<Option<Page>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;

        let mut charge = 0.0;
        let mut session_token = None;
        while let Some(page) = self.inner.next_page().await? {
            charge += page.request_charge;
            if page.session_token.is_some() {
                session_token = page.session_token.clone();
            }
            for row in &page.rows {
                self.fold(row)?;
            }
        }

        let rows = self.result_row().into_iter().collect();
        let mut page = Page::new(rows, None, charge);
        page.session_token = session_token;
        Ok(Some(page))
    }
}

impl<C: ExecutionContext> ExecutionContext for AggregateContext<C> {
    fn next_page(&mut self) -> BoxFuture<'_, QueryResult<Option<Page>>> {
        Box::pin(self.next_page_inner())
    }
}
