//! TOP enforcement over any execution context

use futures_util::future::BoxFuture;

use crate::observability::{log_event_with_fields, Event};

use super::context::ExecutionContext;
use super::errors::QueryResult;
use super::page::Page;

/// Caps the total number of rows handed out
///
/// Once the budget is spent the inner context is never pulled again, so no
/// further requests are issued.
pub struct TopContext<C> {
    inner: C,
    top: usize,
    remaining: usize,
}

impl<C: ExecutionContext> TopContext<C> {
    pub fn new(inner: C, top: usize) -> Self {
        Self {
            inner,
            top,
            remaining: top,
        }
    }

    /// Rows still allowed through
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    async fn next_page_inner(&mut self) -> QueryResult<Option<Page>> {
        if self.remaining == 0 {
            return Ok(None);
        }

        let Some(mut page) = self.inner.next_page().await? else {
            return Ok(None);
        };

        if page.len() >= self.remaining {
            page.rows.truncate(self.remaining);
            page.continuation = None;
            self.remaining = 0;
            log_event_with_fields(Event::TopSatisfied, &[("top", &self.top.to_string())]);
        } else {
            self.remaining -= page.len();
        }
        Ok(Some(page))
    }
}

impl<C: ExecutionContext> ExecutionContext for TopContext<C> {
    fn next_page(&mut self) -> BoxFuture<'_, QueryResult<Option<Page>>> {
        Box::pin(self.next_page_inner())
    }
}
