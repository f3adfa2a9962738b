//! Query entry point with cross-partition fallback
//!
//! ```text
//! Optimistic --first request refused as cross-partition--> Fallback(pipeline)
//!     \--drained or failed--> Done
//! ```
//!
//! A query first runs as one unpartitioned stream. If the gateway refuses
//! it before anything was emitted, the plan carried by the refusal is used
//! to build the partitioned pipeline, and pages continue from there as if
//! nothing happened.

use std::time::Instant;

use futures_util::future::BoxFuture;

use crate::observability::{log_event_at, log_event_with_fields, Event, Severity};
use crate::plan::{QueryPlan, SqlQuerySpec};

use super::client::QueryClient;
use super::context::ExecutionContext;
use super::errors::{QueryError, QueryResult};
use super::options::FeedOptions;
use super::page::Page;
use super::paginator::SingleStreamContext;
use super::pipeline::build_pipeline;

enum ProxyState {
    Optimistic(SingleStreamContext),
    Fallback(Box<dyn ExecutionContext>),
    Done,
}

/// The execution handed to callers of [`QueryClient::query`]
pub struct ProxyContext {
    client: QueryClient,
    query: SqlQuerySpec,
    options: FeedOptions,
    state: ProxyState,
    pages_emitted: usize,
    rows_emitted: usize,
    started: Option<Instant>,
}

impl ProxyContext {
    pub fn new(client: QueryClient, query: SqlQuerySpec, options: FeedOptions) -> Self {
        let optimistic = SingleStreamContext::new(&client, query.clone(), options.clone());
        Self {
            client,
            query,
            options,
            state: ProxyState::Optimistic(optimistic),
            pages_emitted: 0,
            rows_emitted: 0,
            started: None,
        }
    }

    /// Whether the partitioned pipeline took over
    pub fn is_partitioned(&self) -> bool {
        matches!(self.state, ProxyState::Fallback(_))
    }

    pub fn pages_emitted(&self) -> usize {
        self.pages_emitted
    }

    async fn next_page_inner(&mut self) -> QueryResult<Option<Page>> {
        if self.started.is_none() {
            self.started = Some(Instant::now());
            self.client.metrics().increment_queries_started();
            log_event_with_fields(
                Event::QueryBegin,
                &[
                    ("collection", self.client.collection()),
                    ("query", &self.query.query),
                ],
            );
        }

        match self.pull().await {
            Ok(Some(page)) => {
                self.pages_emitted += 1;
                self.rows_emitted += page.len();
                self.client
                    .metrics()
                    .record_page(page.len(), page.request_charge);
                Ok(Some(page))
            }
            Ok(None) => {
                if !matches!(self.state, ProxyState::Done) {
                    self.state = ProxyState::Done;
                    self.client.metrics().increment_queries_completed();
                    log_event_with_fields(
                        Event::QueryComplete,
                        &[
                            ("pages", &self.pages_emitted.to_string()),
                            ("rows", &self.rows_emitted.to_string()),
                            ("elapsed_ms", &self.elapsed_ms()),
                        ],
                    );
                }
                Ok(None)
            }
            Err(e) => {
                self.state = ProxyState::Done;
                self.client.metrics().increment_queries_failed();
                let severity = if e.is_fatal() {
                    Severity::Fatal
                } else {
                    Severity::Error
                };
                log_event_at(
                    severity,
                    Event::QueryFailed,
                    &[
                        ("code", e.code()),
                        ("error", &e.to_string()),
                        ("pages", &self.pages_emitted.to_string()),
                    ],
                );
                Err(e)
            }
        }
    }

    async fn pull(&mut self) -> QueryResult<Option<Page>> {
        let result = match &mut self.state {
            ProxyState::Done => return Ok(None),
            ProxyState::Fallback(context) => return context.next_page().await,
            ProxyState::Optimistic(context) => context.next_page().await,
        };

        match result {
            Err(QueryError::CrossPartitionNotServable {
                payload,
                request_charge,
            }) if self.pages_emitted == 0 => {
                let mut pipeline = self.fall_back(&payload).await?;
                let page = pipeline.next_page().await;
                self.state = ProxyState::Fallback(pipeline);

                // The refused request is charged to the first page
                match page {
                    Ok(Some(mut page)) => {
                        page.request_charge += request_charge;
                        Ok(Some(page))
                    }
                    Ok(None) if request_charge > 0.0 => Ok(Some(Page::charge_only(request_charge))),
                    other => other,
                }
            }
            other => other,
        }
    }

    async fn fall_back(&mut self, payload: &str) -> QueryResult<Box<dyn ExecutionContext>> {
        let plan = QueryPlan::from_error_payload(payload)?;

        log_event_with_fields(
            Event::CrossPartitionFallback,
            &[
                ("collection", self.client.collection()),
                ("query_ranges", &plan.query_ranges.len().to_string()),
            ],
        );
        self.client.metrics().increment_fallbacks();

        build_pipeline(&self.client, &self.query, &plan, &self.options).await
    }

    fn elapsed_ms(&self) -> String {
        self.started
            .map(|s| s.elapsed().as_millis().to_string())
            .unwrap_or_default()
    }
}

impl ExecutionContext for ProxyContext {
    fn next_page(&mut self) -> BoxFuture<'_, QueryResult<Option<Page>>> {
        Box::pin(self.next_page_inner())
    }
}
