//! Continuation-driven pagination state for one request stream
//!
//! ```text
//! ReadyToFetch --next_page--> Fetching --ok--> ReadyToFetch | Exhausted
//!                                 \--err--> ReadyToFetch (continuation kept)
//! ```
//!
//! The stream ends when the continuation comes back empty, when an active
//! TOP budget reaches zero, or (change feed only) when the service reports
//! no changes.

use std::future::Future;

use crate::observability::{log_event_at, Event, Severity};

use super::errors::{QueryError, QueryResult};
use super::page::Page;

/// Fetcher lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    ReadyToFetch,
    Fetching,
    Exhausted,
}

/// Pagination state for exactly one stream
#[derive(Debug, Clone)]
pub struct Fetcher {
    continuation: Option<String>,
    configured_page_size: usize,
    page_size: usize,
    remaining_top: Option<usize>,
    change_feed: bool,
    state: FetchState,
    pages_fetched: usize,
}

impl Fetcher {
    /// Fresh fetcher starting at `continuation`
    pub fn new(continuation: Option<String>, page_size: usize, top: Option<usize>) -> Self {
        let mut fetcher = Self {
            continuation: continuation.filter(|token| !token.is_empty()),
            configured_page_size: page_size,
            page_size,
            remaining_top: top,
            change_feed: false,
            state: FetchState::ReadyToFetch,
            pages_fetched: 0,
        };
        if let Some(remaining) = top {
            fetcher.page_size = page_size.min(remaining);
            if remaining == 0 {
                fetcher.state = FetchState::Exhausted;
            }
        }
        fetcher
    }

    /// Enable change-feed termination
    pub fn with_change_feed(mut self, change_feed: bool) -> Self {
        self.change_feed = change_feed;
        self
    }

    /// Fetcher for a child range, resuming where this one stopped
    pub fn resume(&self) -> Self {
        let mut child = Self::new(
            self.continuation.clone(),
            self.configured_page_size,
            self.remaining_top,
        );
        child.change_feed = self.change_feed;
        child
    }

    /// Whether another page may be requested
    pub fn should_fetch_more(&self) -> bool {
        self.state != FetchState::Exhausted
    }

    pub fn state(&self) -> FetchState {
        self.state
    }

    /// Continuation the next request will carry
    pub fn continuation(&self) -> Option<&str> {
        self.continuation.as_deref()
    }

    /// Page size the next request will carry
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Remaining TOP budget, `None` when unbounded
    pub fn remaining_top(&self) -> Option<usize> {
        self.remaining_top
    }

    /// Pages successfully fetched so far
    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    /// Issue the next request through `send` and update state from its page
    ///
    /// `send` receives the continuation and page size to request. A stream
    /// left in `Fetching` by a dropped future resends with the same
    /// continuation.
    pub async fn next_page<F, Fut>(&mut self, send: F) -> QueryResult<Page>
    where
        F: FnOnce(Option<String>, usize) -> Fut,
        Fut: Future<Output = QueryResult<Page>>,
    {
        if self.state == FetchState::Exhausted {
            log_event_at(
                Severity::Fatal,
                Event::FetchAfterExhaustion,
                &[("pages_fetched", &self.pages_fetched.to_string())],
            );
            return Err(QueryError::FetchAfterExhaustion);
        }

        self.state = FetchState::Fetching;
        match send(self.continuation.clone(), self.page_size).await {
            Ok(page) => {
                self.apply(&page);
                Ok(page)
            }
            Err(e) => {
                self.state = FetchState::ReadyToFetch;
                Err(e)
            }
        }
    }

    fn apply(&mut self, page: &Page) {
        self.pages_fetched += 1;
        self.continuation = page.continuation().map(str::to_string);

        if let Some(remaining) = self.remaining_top {
            let returned = page.len();
            if returned > remaining {
                log_event_at(
                    Severity::Warn,
                    Event::TopOverfetch,
                    &[
                        ("received", &returned.to_string()),
                        ("remaining", &remaining.to_string()),
                    ],
                );
            }
            let remaining = remaining.saturating_sub(returned);
            self.remaining_top = Some(remaining);
            self.page_size = self.configured_page_size.min(remaining);
        }

        let exhausted = self.continuation.is_none()
            || self.remaining_top == Some(0)
            || (self.change_feed && page.not_modified);

        self.state = if exhausted {
            FetchState::Exhausted
        } else {
            FetchState::ReadyToFetch
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(n: usize) -> Vec<serde_json::Value> {
        (0..n).map(|i| json!(i)).collect()
    }

    #[tokio::test]
    async fn test_follows_continuation_until_empty() {
        let mut fetcher = Fetcher::new(None, 10, None);
        let mut seen = Vec::new();

        while fetcher.should_fetch_more() {
            let step = fetcher.pages_fetched();
            fetcher
                .next_page(|continuation, _| {
                    seen.push(continuation.clone());
                    async move {
                        let next = if step < 2 { Some(format!("t{}", step + 1)) } else { None };
                        Ok(Page::new(rows(1), next, 1.0))
                    }
                })
                .await
                .unwrap();
        }

        assert_eq!(seen, vec![None, Some("t1".to_string()), Some("t2".to_string())]);
        assert_eq!(fetcher.state(), FetchState::Exhausted);
    }

    #[tokio::test]
    async fn test_top_budget_shrinks_page_size() {
        let mut fetcher = Fetcher::new(None, 4, Some(6));
        assert_eq!(fetcher.page_size(), 4);

        fetcher
            .next_page(|_, size| async move { Ok(Page::new(rows(size), Some("t".into()), 1.0)) })
            .await
            .unwrap();
        assert_eq!(fetcher.remaining_top(), Some(2));
        assert_eq!(fetcher.page_size(), 2);

        fetcher
            .next_page(|_, size| async move { Ok(Page::new(rows(size), Some("t".into()), 1.0)) })
            .await
            .unwrap();
        assert_eq!(fetcher.remaining_top(), Some(0));
        assert!(!fetcher.should_fetch_more());
    }

    #[tokio::test]
    async fn test_overfetch_floors_at_zero() {
        let mut fetcher = Fetcher::new(None, 5, Some(3));
        fetcher
            .next_page(|_, _| async { Ok(Page::new(rows(7), Some("t".into()), 1.0)) })
            .await
            .unwrap();

        assert_eq!(fetcher.remaining_top(), Some(0));
        assert_eq!(fetcher.state(), FetchState::Exhausted);
    }

    #[tokio::test]
    async fn test_fetch_after_exhaustion_is_fatal() {
        let mut fetcher = Fetcher::new(None, 5, None);
        fetcher
            .next_page(|_, _| async { Ok(Page::new(rows(1), None, 1.0)) })
            .await
            .unwrap();

        let err = fetcher
            .next_page(|_, _| async { Ok(Page::default()) })
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::FetchAfterExhaustion));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_zero_top_is_exhausted_immediately() {
        let fetcher = Fetcher::new(None, 5, Some(0));
        assert!(!fetcher.should_fetch_more());
    }

    #[tokio::test]
    async fn test_error_keeps_continuation() {
        let mut fetcher = Fetcher::new(Some("t3".to_string()), 5, None);
        let err = fetcher
            .next_page(|_, _| async { Err(QueryError::partition_gone("0")) })
            .await
            .unwrap_err();

        assert!(err.is_split());
        assert_eq!(fetcher.state(), FetchState::ReadyToFetch);
        assert_eq!(fetcher.continuation(), Some("t3"));
    }

    #[tokio::test]
    async fn test_change_feed_stops_on_not_modified() {
        let mut fetcher = Fetcher::new(None, 5, None).with_change_feed(true);
        let mut page = Page::new(Vec::new(), Some("etag-9".into()), 1.0);
        page.not_modified = true;

        fetcher.next_page(|_, _| async move { Ok(page) }).await.unwrap();
        assert!(!fetcher.should_fetch_more());
        assert_eq!(fetcher.continuation(), Some("etag-9"));
    }

    #[tokio::test]
    async fn test_resume_inherits_budget_and_token() {
        let mut fetcher = Fetcher::new(None, 5, Some(8));
        fetcher
            .next_page(|_, size| async move { Ok(Page::new(rows(size), Some("t1".into()), 1.0)) })
            .await
            .unwrap();

        let child = fetcher.resume();
        assert_eq!(child.continuation(), Some("t1"));
        assert_eq!(child.remaining_top(), Some(3));
        assert_eq!(child.page_size(), 3);
        assert_eq!(child.state(), FetchState::ReadyToFetch);
    }
}
