//! The pull interface shared by every execution context
//!
//! Nothing runs unless the caller pulls: a context issues requests only
//! while a `next_page` future is being polled, so dropping the context (or
//! the stream wrapping it) stops all further requests.

use futures_util::future::BoxFuture;
use futures_util::stream::{self, Stream};

use super::errors::QueryResult;
use super::page::Page;

/// A source of result pages
pub trait ExecutionContext: Send {
    /// Next page, or `None` once the execution is drained
    ///
    /// After an error the context is terminated and returns `Ok(None)`.
    fn next_page(&mut self) -> BoxFuture<'_, QueryResult<Option<Page>>>;
}

impl<C: ExecutionContext + ?Sized> ExecutionContext for Box<C> {
    fn next_page(&mut self) -> BoxFuture<'_, QueryResult<Option<Page>>> {
        (**self).next_page()
    }
}

/// Adapt a context into a stream of pages; the stream ends after an error
pub fn into_page_stream<C>(context: C) -> impl Stream<Item = QueryResult<Page>> + Send
where
    C: ExecutionContext + 'static,
{
    stream::unfold(Some(context), |state| async move {
        let mut context = state?;
        match context.next_page().await {
            Ok(Some(page)) => Some((Ok(page), Some(context))),
            Ok(None) => None,
            Err(e) => Some((Err(e), None)),
        }
    })
}

/// Pull every page of a context
pub async fn drain<C: ExecutionContext + ?Sized>(context: &mut C) -> QueryResult<Vec<Page>> {
    let mut pages = Vec::new();
    while let Some(page) = context.next_page().await? {
        pages.push(page);
    }
    Ok(pages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use serde_json::json;

    use crate::execution::QueryError;

    struct Scripted {
        pages: Vec<QueryResult<Option<Page>>>,
    }

    impl ExecutionContext for Scripted {
        fn next_page(&mut self) -> BoxFuture<'_, QueryResult<Option<Page>>> {
            let next = if self.pages.is_empty() {
                Ok(None)
            } else {
                self.pages.remove(0)
            };
            Box::pin(async move { next })
        }
    }

    #[tokio::test]
    async fn test_stream_yields_pages_then_ends() {
        let context = Scripted {
            pages: vec![
                Ok(Some(Page::new(vec![json!(1)], Some("a".into()), 1.0))),
                Ok(Some(Page::new(vec![json!(2)], None, 1.0))),
            ],
        };
        let pages: Vec<_> = into_page_stream(context).collect().await;
        assert_eq!(pages.len(), 2);
        assert!(pages.iter().all(|p| p.is_ok()));
    }

    #[tokio::test]
    async fn test_stream_stops_after_error() {
        let context = Scripted {
            pages: vec![
                Err(QueryError::transport(503, "unavailable")),
                Ok(Some(Page::new(vec![json!(1)], None, 1.0))),
            ],
        };
        let pages: Vec<_> = into_page_stream(context).collect().await;
        assert_eq!(pages.len(), 1);
        assert!(pages[0].is_err());
    }

    #[tokio::test]
    async fn test_drain_collects_until_none() {
        let mut context = Scripted {
            pages: vec![Ok(Some(Page::default())), Ok(Some(Page::default()))],
        };
        assert_eq!(drain(&mut context).await.unwrap().len(), 2);
    }
}
