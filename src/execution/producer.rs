//! Per-range page producers
//!
//! A [`Producer`] owns the fetcher for one partition key range. When the
//! range is split or moved it does not retry: it resolves the ranges now
//! covering its span and hands back child producers that resume from its
//! last continuation. A range that resolves to itself was moved; it is
//! re-read from the same continuation a bounded number of times in a row.

use std::collections::VecDeque;
use std::sync::Arc;

use serde_json::Value;

use crate::observability::{log_event_at, log_event_with_fields, Event, Severity};
use crate::plan::SqlQuerySpec;
use crate::routing::{PartitionKeyRange, Range};

use super::client::{QueryClient, RetryPolicy};
use super::errors::{QueryError, QueryResult};
use super::fetcher::Fetcher;
use super::options::FeedOptions;
use super::page::Page;
use super::request::RequestSpec;

/// Consecutive gone signals tolerated from a range that resolves to itself
pub const MAX_MOVE_RETRIES: usize = 3;

/// Outcome of one producer step
pub enum ProducerStep {
    /// A page fetched from the range
    Page(Page),
    /// The range is gone; these producers replace it, in key order
    Split(Vec<Producer>),
    /// Nothing left to fetch
    Done,
}

/// Lazy page source for one partition key range
pub struct Producer {
    client: QueryClient,
    range: PartitionKeyRange,
    query: Arc<SqlQuerySpec>,
    options: Arc<FeedOptions>,
    fetcher: Fetcher,
    retry: Box<dyn RetryPolicy>,
    buffer: VecDeque<Value>,
    /// Continuation the buffered rows were fetched with
    buffered_from: Option<String>,
    moves: usize,
}

impl Producer {
    /// Create a producer for `range` driven by `fetcher`
    pub fn new(
        client: QueryClient,
        range: PartitionKeyRange,
        query: Arc<SqlQuerySpec>,
        options: Arc<FeedOptions>,
        fetcher: Fetcher,
    ) -> Self {
        let retry = client.retry_policy();
        Self {
            client,
            range,
            query,
            options,
            fetcher,
            retry,
            buffer: VecDeque::new(),
            buffered_from: None,
            moves: 0,
        }
    }

    pub fn range_id(&self) -> &str {
        &self.range.id
    }

    pub fn partition_key_range(&self) -> &PartitionKeyRange {
        &self.range
    }

    /// Key span covered by this producer
    pub fn span(&self) -> Range {
        self.range.range()
    }

    /// Continuation the next request will carry
    pub fn continuation(&self) -> Option<&str> {
        self.fetcher.continuation()
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    /// Continuation that re-reads every row not yet taken from the buffer
    pub fn resume_token(&self) -> Option<&str> {
        if self.buffer.is_empty() {
            self.fetcher.continuation()
        } else {
            self.buffered_from.as_deref()
        }
    }

    /// Whether another request may be issued
    pub fn can_fetch(&self) -> bool {
        self.fetcher.should_fetch_more()
    }

    /// No request left to issue and no buffered rows
    pub fn is_done(&self) -> bool {
        !self.can_fetch() && self.buffer.is_empty()
    }

    /// Rows fetched but not yet consumed by a merge
    pub fn buffer(&self) -> &VecDeque<Value> {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut VecDeque<Value> {
        &mut self.buffer
    }

    /// Head of the buffer
    pub fn peek(&self) -> Option<&Value> {
        self.buffer.front()
    }

    /// Fetch the next page from the range
    pub async fn step(&mut self) -> QueryResult<ProducerStep> {
        if !self.fetcher.should_fetch_more() {
            return Ok(ProducerStep::Done);
        }

        let client = &self.client;
        let range_id = self.range.id.as_str();
        let query = self.query.as_ref();
        let options = self.options.as_ref();
        let retry = &mut self.retry;
        let fetched_from = self.fetcher.continuation().map(str::to_string);

        let result = self
            .fetcher
            .next_page(|continuation, page_size| {
                let mut request = client.executor().create_request(RequestSpec {
                    query,
                    partition_key_range_id: Some(range_id),
                    continuation: continuation.as_deref(),
                    page_size,
                    options,
                });
                retry.before_send(&mut request);
                client.metrics().increment_requests();
                log_event_at(
                    Severity::Trace,
                    Event::RequestSent,
                    &[
                        ("activity_id", &request.activity_id.to_string()),
                        ("range", range_id),
                        ("page_size", &page_size.to_string()),
                    ],
                );
                client.executor().execute(request)
            })
            .await;

        match result {
            Ok(page) => {
                self.moves = 0;
                if self.buffer.is_empty() {
                    self.buffered_from = fetched_from;
                }
                Ok(ProducerStep::Page(page))
            }
            Err(e) if e.is_split() => self.split().await.map(ProducerStep::Split),
            Err(e) => Err(e),
        }
    }

    async fn split(&mut self) -> QueryResult<Vec<Producer>> {
        let span = self.span();
        let ranges = self
            .client
            .resolver()
            .overlapping_ranges(self.client.collection(), &span)
            .await?;

        if let [same] = ranges.as_slice() {
            if same.id == self.range.id {
                return self.moved(same.clone()).map(|replacement| vec![replacement]);
            }
        }
        if ranges.is_empty() || ranges.iter().any(|r| r.id == self.range.id) {
            return Err(QueryError::partition_gone(self.range.id.clone()));
        }

        let child_ids: Vec<&str> = ranges.iter().map(|r| r.id.as_str()).collect();
        log_event_with_fields(
            Event::PartitionSplit,
            &[
                ("range", &self.range.id),
                ("children", &child_ids.join(",")),
                ("continuation", self.fetcher.continuation().unwrap_or("")),
            ],
        );
        self.client.metrics().increment_splits();

        let mut children: Vec<Producer> = ranges
            .into_iter()
            .map(|range| {
                Producer::new(
                    self.client.clone(),
                    range,
                    Arc::clone(&self.query),
                    Arc::clone(&self.options),
                    self.fetcher.resume(),
                )
            })
            .collect();

        if let Some(first) = children.first_mut() {
            first.buffer = std::mem::take(&mut self.buffer);
            first.buffered_from = self.buffered_from.take();
        }
        Ok(children)
    }

    /// Replacement for a range that still exists under the same id
    fn moved(&mut self, range: PartitionKeyRange) -> QueryResult<Producer> {
        if self.moves >= MAX_MOVE_RETRIES {
            return Err(QueryError::partition_gone(self.range.id.clone()));
        }

        log_event_at(
            Severity::Warn,
            Event::PartitionMoved,
            &[
                ("range", &self.range.id),
                ("attempt", &(self.moves + 1).to_string()),
            ],
        );

        let mut replacement = Producer::new(
            self.client.clone(),
            range,
            Arc::clone(&self.query),
            Arc::clone(&self.options),
            self.fetcher.resume(),
        );
        replacement.buffer = std::mem::take(&mut self.buffer);
        replacement.buffered_from = self.buffered_from.take();
        replacement.moves = self.moves + 1;
        Ok(replacement)
    }
}
