//! Unordered fan-out across partition key ranges
//!
//! Producers are fetched in batches of at most the degree of parallelism.
//! A new batch starts only after every page of the previous one was handed
//! out, so at most one unemitted page per producer is held at a time.
//! Pages without rows are not emitted; their charge rides on the next page
//! that is, or on a final charge-only page.

use futures_util::future::{join_all, BoxFuture};

use crate::observability::{log_event_at, Event, Severity};
use crate::routing::Range;

use super::context::ExecutionContext;
use super::continuation::{CompositeContinuationToken, RangeContinuation};
use super::errors::QueryResult;
use super::page::{ChargeTracker, Page};
use super::producer::{Producer, ProducerStep};

/// A fetched page waiting to be handed out
struct ReadyPage {
    range_id: String,
    span: Range,
    /// Continuation the page was fetched with
    resume_token: Option<String>,
    page: Page,
}

/// Concatenation of every producer's pages
pub struct ParallelContext {
    producers: Vec<Producer>,
    ready: Vec<ReadyPage>,
    charges: ChargeTracker,
    parallelism: usize,
    terminated: bool,
}

impl ParallelContext {
    /// Fan out over `producers`, fetching at most `parallelism` at once
    pub fn new(producers: Vec<Producer>, parallelism: usize) -> Self {
        Self {
            producers,
            ready: Vec::new(),
            charges: ChargeTracker::new(),
            parallelism: parallelism.max(1),
            terminated: false,
        }
    }

    /// Producers still able to fetch
    pub fn active_ranges(&self) -> Vec<&str> {
        self.producers.iter().map(Producer::range_id).collect()
    }

    pub fn charges(&self) -> &ChargeTracker {
        &self.charges
    }

    async fn next_page_inner(&mut self) -> QueryResult<Option<Page>> {
        if self.terminated {
            return Ok(None);
        }
        match self.advance().await {
            Ok(page) => Ok(page),
            Err(e) => {
                self.terminated = true;
                Err(e)
            }
        }
    }

    async fn advance(&mut self) -> QueryResult<Option<Page>> {
        loop {
            if !self.ready.is_empty() {
                let ready = self.ready.remove(0);
                return self.emit(ready).map(Some);
            }

            if self.producers.is_empty() {
                self.terminated = true;
                if self.charges.has_pending() {
                    let mut page = Page::charge_only(0.0);
                    self.charges.settle(&mut page);
                    return Ok(Some(page));
                }
                return Ok(None);
            }

            self.fetch_batch().await?;
        }
    }

    async fn fetch_batch(&mut self) -> QueryResult<()> {
        let width = self.parallelism.min(self.producers.len());
        let tokens: Vec<Option<String>> = self.producers[..width]
            .iter()
            .map(|p| p.continuation().map(str::to_string))
            .collect();

        let results = join_all(self.producers[..width].iter_mut().map(|p| p.step())).await;

        let batch: Vec<Producer> = self.producers.drain(..width).collect();
        let mut survivors = Vec::with_capacity(batch.len());

        for ((producer, resume_token), result) in batch.into_iter().zip(tokens).zip(results) {
            match result? {
                ProducerStep::Page(mut page) => {
                    self.charges.record(page.request_charge);
                    page.request_charge = 0.0;
                    if !page.is_empty() {
                        self.ready.push(ReadyPage {
                            range_id: producer.range_id().to_string(),
                            span: producer.span(),
                            resume_token,
                            page,
                        });
                    }
                    if producer.can_fetch() {
                        survivors.push(producer);
                    }
                }
                ProducerStep::Split(children) => survivors.extend(children),
                ProducerStep::Done => {}
            }
        }

        survivors.append(&mut self.producers);
        self.producers = survivors;
        Ok(())
    }

    fn emit(&mut self, ready: ReadyPage) -> QueryResult<Page> {
        let mut page = ready.page;
        self.charges.settle(&mut page);
        page.continuation = self.continuation()?;

        log_event_at(
            Severity::Trace,
            Event::PageEmitted,
            &[
                ("range", &ready.range_id),
                ("rows", &page.len().to_string()),
                ("span_min", &ready.span.min),
            ],
        );
        Ok(page)
    }

    /// Token resuming right after the page being emitted
    ///
    /// Ranges with a page still waiting resume from before that page; every
    /// other live producer resumes from its current continuation.
    fn continuation(&self) -> QueryResult<Option<String>> {
        let mut entries: Vec<RangeContinuation> = self
            .ready
            .iter()
            .map(|r| RangeContinuation::new(r.resume_token.clone(), r.span.clone()))
            .collect();

        for producer in &self.producers {
            let waiting = self.ready.iter().any(|r| r.range_id == producer.range_id());
            if !waiting {
                entries.push(RangeContinuation::new(
                    producer.continuation().map(str::to_string),
                    producer.span(),
                ));
            }
        }

        CompositeContinuationToken::new(entries).encode()
    }
}

impl ExecutionContext for ParallelContext {
    fn next_page(&mut self) -> BoxFuture<'_, QueryResult<Option<Page>>> {
        Box::pin(self.next_page_inner())
    }
}
