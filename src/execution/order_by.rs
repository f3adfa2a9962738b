//! Streaming k-way merge for ORDER BY queries
//!
//! Every range returns its rows already sorted. The merge keeps one row
//! buffer per producer and only picks the next row once every live
//! producer has a buffered head, so a row from a range that has not been
//! fetched yet can never be skipped over. Buffers are refilled lazily,
//! one request per empty producer, right before the next pick.
//!
//! Each page carries the position of its last row. Buffered rows are
//! re-read on resume, so a resumed merge drops every fetched row at or
//! before that position.

use futures_util::future::{join_all, BoxFuture};

use crate::observability::{log_event_at, Event, Severity};

use serde_json::Value;

use super::comparator::{unwrap_payload, OrderedRow, RowComparator};
use super::context::ExecutionContext;
use super::continuation::{OrderByContinuationToken, RangeContinuation};
use super::errors::QueryResult;
use super::page::{ChargeTracker, Page};
use super::producer::{Producer, ProducerStep};

/// Globally ordered merge of every producer's rows
pub struct OrderByContext {
    producers: Vec<Producer>,
    comparator: RowComparator,
    page_size: usize,
    parallelism: usize,
    charges: ChargeTracker,
    /// Position of the last emitted row
    last_position: Option<Value>,
    /// Rows at or before this position were emitted before a resume
    resume_after: Option<Value>,
    terminated: bool,
}

impl OrderByContext {
    /// Merge `producers` into pages of `page_size` rows
    pub fn new(
        producers: Vec<Producer>,
        comparator: RowComparator,
        page_size: usize,
        parallelism: usize,
    ) -> Self {
        Self {
            producers,
            comparator,
            page_size: page_size.max(1),
            parallelism: parallelism.max(1),
            charges: ChargeTracker::new(),
            last_position: None,
            resume_after: None,
            terminated: false,
        }
    }

    /// Skip every row up to and including `position`
    pub fn resume_after(mut self, position: Value) -> Self {
        self.resume_after = Some(position);
        self
    }

    pub fn charges(&self) -> &ChargeTracker {
        &self.charges
    }

    async fn next_page_inner(&mut self) -> QueryResult<Option<Page>> {
        if self.terminated {
            return Ok(None);
        }
        match self.merge_page().await {
            Ok(page) => Ok(page),
            Err(e) => {
                self.terminated = true;
                Err(e)
            }
        }
    }

    async fn merge_page(&mut self) -> QueryResult<Option<Page>> {
        let mut rows = Vec::with_capacity(self.page_size);

        while rows.len() < self.page_size {
            self.refill().await?;
            match self.pop_min() {
                Some(row) => {
                    self.last_position = Some(self.comparator.position_of(&row));
                    rows.push(unwrap_payload(row));
                }
                None => break,
            }
        }

        if rows.is_empty() {
            self.terminated = true;
            if !self.charges.has_pending() {
                return Ok(None);
            }
        }

        let continuation = if self.terminated { None } else { self.continuation()? };
        let mut page = Page::new(rows, continuation, 0.0);
        self.charges.settle(&mut page);
        log_event_at(
            Severity::Trace,
            Event::PageEmitted,
            &[
                ("rows", &page.len().to_string()),
                ("sources", &self.producers.len().to_string()),
            ],
        );
        Ok(Some(page))
    }

    /// Token resuming right after the last emitted row
    fn continuation(&self) -> QueryResult<Option<String>> {
        let Some(position) = &self.last_position else {
            return Ok(None);
        };
        let entries: Vec<RangeContinuation> = self
            .producers
            .iter()
            .filter(|p| !p.is_done())
            .map(|p| RangeContinuation::new(p.resume_token().map(str::to_string), p.span()))
            .collect();
        if entries.is_empty() {
            return Ok(None);
        }
        OrderByContinuationToken::new(entries, position)
            .encode()
            .map(Some)
    }

    /// Fetch until every live producer has a buffered head
    async fn refill(&mut self) -> QueryResult<()> {
        loop {
            self.producers.retain(|p| !p.is_done());

            let starving: Vec<usize> = self
                .producers
                .iter()
                .enumerate()
                .filter(|(_, p)| p.buffer().is_empty())
                .map(|(i, _)| i)
                .take(self.parallelism)
                .collect();
            if starving.is_empty() {
                return Ok(());
            }

            let steps = join_all(
                self.producers
                    .iter_mut()
                    .enumerate()
                    .filter(|(i, _)| starving.contains(i))
                    .map(|(_, p)| p.step()),
            )
            .await;

            // Apply in reverse so earlier indices stay valid across splices
            for (index, step) in starving.into_iter().zip(steps).rev() {
                match step? {
                    ProducerStep::Page(page) => {
                        self.charges.record(page.request_charge);
                        let comparator = &self.comparator;
                        let resume_after = self.resume_after.as_ref();
                        let rows = page.rows.into_iter().filter(|row| match resume_after {
                            Some(position) => comparator.compare_positions(row, position).is_gt(),
                            None => true,
                        });
                        self.producers[index].buffer_mut().extend(rows);
                    }
                    ProducerStep::Split(children) => {
                        self.producers.splice(index..=index, children);
                    }
                    ProducerStep::Done => {}
                }
            }
        }
    }

    fn pop_min(&mut self) -> Option<serde_json::Value> {
        let mut best: Option<usize> = None;
        for (index, producer) in self.producers.iter().enumerate() {
            let Some(row) = producer.peek() else { continue };
            let candidate = OrderedRow {
                range_min: &producer.partition_key_range().min_inclusive,
                row,
            };
            best = match best {
                None => Some(index),
                Some(current) => {
                    let incumbent = &self.producers[current];
                    let incumbent = OrderedRow {
                        range_min: &incumbent.partition_key_range().min_inclusive,
                        row: incumbent.peek()?,
                    };
                    if self.comparator.compare(candidate, incumbent).is_lt() {
                        Some(index)
                    } else {
                        Some(current)
                    }
                }
            };
        }
        self.producers[best?].buffer_mut().pop_front()
    }
}

impl ExecutionContext for OrderByContext {
    fn next_page(&mut self) -> BoxFuture<'_, QueryResult<Option<Page>>> {
        Box::pin(self.next_page_inner())
    }
}
