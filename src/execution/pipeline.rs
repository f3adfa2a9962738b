//! Pipeline assembly from a query plan
//!
//! ```text
//! Top( Aggregate( OrderBy | Parallel ( Producer* ) ) )
//! ```
//!
//! The merge stage is chosen by the presence of a sort specification; the
//! aggregate and TOP stages are added only when the plan asks for them.

use std::sync::Arc;

use serde::Serialize;

use crate::observability::{log_event_with_fields, Event};
use crate::plan::{AggregateKind, QueryPlan, SqlQuerySpec};
use crate::routing::{resolve_all, PartitionKeyRange};

use super::aggregate::AggregateContext;
use super::client::QueryClient;
use super::comparator::RowComparator;
use super::context::ExecutionContext;
use super::continuation::{CompositeContinuationToken, OrderByContinuationToken};
use super::errors::{QueryError, QueryResult};
use super::fetcher::Fetcher;
use super::options::{effective_page_size, FeedOptions};
use super::order_by::OrderByContext;
use super::parallel::ParallelContext;
use super::producer::Producer;
use super::top::TopContext;

/// Stages a plan turns into, before any range is resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineShape {
    /// Query text sent to every range
    pub partition_query: String,
    pub order_by: Vec<String>,
    pub aggregates: Vec<AggregateKind>,
    pub top: Option<usize>,
    pub page_size: usize,
}

impl PipelineShape {
    /// Derive the shape of the pipeline for `plan`
    pub fn new(
        plan: &QueryPlan,
        query: &SqlQuerySpec,
        options: &FeedOptions,
        default_page_size: usize,
    ) -> QueryResult<Self> {
        plan.check_supported()?;

        let top = plan.top().or(options.top);
        Ok(Self {
            partition_query: plan.partition_query(&query.query).into_owned(),
            order_by: plan
                .sort_specs()
                .iter()
                .map(|s| format!("{} {}", s.field, s.direction.as_str()))
                .collect(),
            aggregates: plan.aggregates().to_vec(),
            top,
            page_size: effective_page_size(options.max_item_count, top, default_page_size),
        })
    }

    /// Stage names from the outermost inward
    pub fn stages(&self) -> Vec<&'static str> {
        let mut stages = Vec::new();
        if self.top.is_some() {
            stages.push("top");
        }
        if !self.aggregates.is_empty() {
            stages.push("aggregate");
        }
        stages.push(if self.order_by.is_empty() { "parallel" } else { "order_by" });
        stages
    }
}

/// Assemble the partitioned execution for `plan`
pub async fn build_pipeline(
    client: &QueryClient,
    query: &SqlQuerySpec,
    plan: &QueryPlan,
    options: &FeedOptions,
) -> QueryResult<Box<dyn ExecutionContext>> {
    let shape = PipelineShape::new(plan, query, options, client.config().default_page_size)?;
    let sort_specs = plan.sort_specs();

    log_event_with_fields(
        Event::QueryPlanned,
        &[
            ("order_by", &shape.order_by.join(",")),
            ("aggregates", &shape.aggregates.len().to_string()),
            ("top", &shape.top.map(|t| t.to_string()).unwrap_or_default()),
        ],
    );

    // Partials are one row per range; TOP applies to the reduced result
    let producer_top = if shape.aggregates.is_empty() { shape.top } else { None };

    let mut resume_after = None;
    let seeds = match options.continuation.as_deref() {
        Some(token) if !sort_specs.is_empty() => {
            let token = OrderByContinuationToken::decode(token)?;
            if token.order_by_items.len() != sort_specs.len() {
                return Err(QueryError::InvalidContinuation(format!(
                    "token has {} sort keys, query has {}",
                    token.order_by_items.len(),
                    sort_specs.len()
                )));
            }
            resume_after = Some(token.position());
            resume_seeds(client, token.ranges()).await?
        }
        Some(token) => resume_seeds(client, CompositeContinuationToken::decode(token)?).await?,
        None => resolve_all(client.resolver(), client.collection(), &plan.target_spans())
            .await?
            .into_iter()
            .map(|range| (range, None))
            .collect(),
    };

    let partition_query = Arc::new(query.with_text(shape.partition_query.clone()));
    let producer_options = Arc::new(options.with_continuation(None));
    let producers: Vec<Producer> = seeds
        .into_iter()
        .map(|(range, token)| {
            let fetcher = Fetcher::new(token, shape.page_size, producer_top)
                .with_change_feed(options.change_feed);
            Producer::new(
                client.clone(),
                range,
                Arc::clone(&partition_query),
                Arc::clone(&producer_options),
                fetcher,
            )
        })
        .collect();

    let range_count = producers.len();
    let parallelism = client
        .config()
        .parallelism(options.max_degree_of_parallelism, range_count);

    let mut context: Box<dyn ExecutionContext> = if sort_specs.is_empty() {
        Box::new(ParallelContext::new(producers, parallelism))
    } else {
        let merge = OrderByContext::new(
            producers,
            RowComparator::new(sort_specs),
            shape.page_size,
            parallelism,
        );
        match resume_after {
            Some(position) => Box::new(merge.resume_after(position)),
            None => Box::new(merge),
        }
    };

    if !shape.aggregates.is_empty() {
        context = Box::new(AggregateContext::new(context, shape.aggregates.clone()));
    }
    if let Some(top) = shape.top {
        context = Box::new(TopContext::new(context, top));
    }

    log_event_with_fields(
        Event::PipelineBuilt,
        &[
            ("stages", &shape.stages().join(">")),
            ("ranges", &range_count.to_string()),
            ("parallelism", &parallelism.to_string()),
            ("page_size", &shape.page_size.to_string()),
        ],
    );

    Ok(context)
}

/// Ranges to start from when resuming a composite continuation
async fn resume_seeds(
    client: &QueryClient,
    composite: CompositeContinuationToken,
) -> QueryResult<Vec<(PartitionKeyRange, Option<String>)>> {
    let mut seeds = Vec::new();
    for entry in composite.ranges {
        let ranges = client
            .resolver()
            .overlapping_ranges(client.collection(), &entry.range)
            .await?;
        if ranges.is_empty() {
            return Err(QueryError::InvalidContinuation(format!(
                "no partition key range covers [{}, {})",
                entry.range.min, entry.range.max
            )));
        }
        for range in ranges {
            seeds.push((range, entry.token.clone()));
        }
    }
    Ok(seeds)
}
