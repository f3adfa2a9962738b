//! Generic single-stream pagination
//!
//! A [`Paginator`] pairs a [`Fetcher`] with a request factory and an execute
//! function. It is the whole execution for queries pinned to one stream and
//! reports why it stopped, so "no more data" and "page budget reached" can
//! be told apart.

use std::future::Future;

use futures_util::future::BoxFuture;

use crate::observability::{log_event_at, Event, Severity};
use crate::plan::SqlQuerySpec;

use super::client::QueryClient;
use super::context::ExecutionContext;
use super::errors::QueryResult;
use super::fetcher::Fetcher;
use super::options::{effective_page_size, FeedOptions};
use super::page::Page;
use super::request::{QueryRequest, RequestSpec};

/// Why a paginator stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The service returned an empty continuation
    Exhausted,
    /// The TOP budget reached zero
    TopReached,
    /// The configured page budget was spent while data remained
    PageBudgetReached,
}

/// Continuation-driven page sequence for one stream
pub struct Paginator<C, E> {
    fetcher: Fetcher,
    create_request: C,
    execute: E,
    max_pages: Option<usize>,
    pages: usize,
}

impl<C, E, R, Fut> Paginator<C, E>
where
    C: FnMut(Option<String>, usize) -> R,
    E: FnMut(R) -> Fut,
    Fut: Future<Output = QueryResult<Page>>,
{
    /// Create a paginator over `fetcher`
    pub fn new(fetcher: Fetcher, create_request: C, execute: E) -> Self {
        Self {
            fetcher,
            create_request,
            execute,
            max_pages: None,
            pages: 0,
        }
    }

    /// Stop after `max_pages` pages even if more data exists
    pub fn with_page_budget(mut self, max_pages: usize) -> Self {
        self.max_pages = Some(max_pages);
        self
    }

    /// Why the paginator stopped, or `None` while pages remain
    pub fn stop_reason(&self) -> Option<StopReason> {
        if !self.fetcher.should_fetch_more() {
            if self.fetcher.remaining_top() == Some(0) {
                return Some(StopReason::TopReached);
            }
            return Some(StopReason::Exhausted);
        }
        match self.max_pages {
            Some(max) if self.pages >= max => Some(StopReason::PageBudgetReached),
            _ => None,
        }
    }

    /// Pages returned so far
    pub fn pages(&self) -> usize {
        self.pages
    }

    /// Underlying pagination state
    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    /// Fetch the next page, or `None` once stopped
    pub async fn next_page(&mut self) -> QueryResult<Option<Page>> {
        if self.stop_reason().is_some() {
            return Ok(None);
        }

        let create_request = &mut self.create_request;
        let execute = &mut self.execute;
        let page = self
            .fetcher
            .next_page(|continuation, page_size| execute(create_request(continuation, page_size)))
            .await?;

        self.pages += 1;
        Ok(Some(page))
    }
}

type RequestFactory = Box<dyn FnMut(Option<String>, usize) -> QueryRequest + Send>;
type RequestSender = Box<dyn FnMut(QueryRequest) -> BoxFuture<'static, QueryResult<Page>> + Send>;

/// Execution of a query as one unpartitioned stream
///
/// Used for the optimistic gateway attempt and for queries pinned to a
/// single partition key range. Pages pass through unchanged.
pub struct SingleStreamContext {
    paginator: Paginator<RequestFactory, RequestSender>,
    terminated: bool,
}

impl SingleStreamContext {
    /// Stream `query` through `client` with `options`
    pub fn new(client: &QueryClient, query: SqlQuerySpec, options: FeedOptions) -> Self {
        let page_size = effective_page_size(
            options.max_item_count,
            options.top,
            client.config().default_page_size,
        );
        let fetcher = Fetcher::new(options.continuation.clone(), page_size, options.top)
            .with_change_feed(options.change_feed);

        let factory_client = client.clone();
        let mut policy = client.retry_policy();
        let create_request: RequestFactory = Box::new(move |continuation, page_size| {
            let mut request = factory_client.executor().create_request(RequestSpec {
                query: &query,
                partition_key_range_id: options.partition_key_range_id.as_deref(),
                continuation: continuation.as_deref(),
                page_size,
                options: &options,
            });
            policy.before_send(&mut request);
            request
        });

        let send_client = client.clone();
        let execute: RequestSender = Box::new(move |request| {
            let client = send_client.clone();
            Box::pin(async move {
                client.metrics().increment_requests();
                log_event_at(
                    Severity::Trace,
                    Event::RequestSent,
                    &[
                        ("activity_id", &request.activity_id.to_string()),
                        ("range", request.partition_key_range_id.as_deref().unwrap_or("")),
                    ],
                );
                client.executor().execute(request).await
            })
        });

        Self {
            paginator: Paginator::new(fetcher, create_request, execute),
            terminated: false,
        }
    }

    async fn next_page_inner(&mut self) -> QueryResult<Option<Page>> {
        if self.terminated {
            return Ok(None);
        }
        match self.paginator.next_page().await {
            Ok(page) => Ok(page),
            Err(e) => {
                self.terminated = true;
                Err(e)
            }
        }
    }
}

impl ExecutionContext for SingleStreamContext {
    fn next_page(&mut self) -> BoxFuture<'_, QueryResult<Option<Page>>> {
        Box::pin(self.next_page_inner())
    }
}
