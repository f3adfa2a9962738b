//! Collaborator traits and the client bundle every context runs against
//!
//! Transport, topology and retry behavior are supplied by the embedding
//! SDK. The pipeline only issues requests through [`RequestExecutor`],
//! consults a [`RetryPolicy`] before each send, and asks a
//! [`PartitionKeyRangeResolver`] for topology.

use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::observability::QueryMetrics;
use crate::plan::SqlQuerySpec;
use crate::routing::PartitionKeyRangeResolver;

use super::config::PipelineConfig;
use super::errors::QueryResult;
use super::options::FeedOptions;
use super::page::Page;
use super::proxy::ProxyContext;
use super::request::{QueryRequest, RequestSpec};

/// Sends query requests to the service
pub trait RequestExecutor: Send + Sync {
    /// Build the request for one page
    fn create_request(&self, spec: RequestSpec<'_>) -> QueryRequest {
        QueryRequest::from_spec(spec)
    }

    /// Execute a request and return its page
    ///
    /// A split or moved range must surface as
    /// [`QueryError::PartitionGone`](super::QueryError::PartitionGone), a
    /// gateway refusal of a cross-partition query as
    /// [`QueryError::CrossPartitionNotServable`](super::QueryError::CrossPartitionNotServable).
    fn execute(&self, request: QueryRequest) -> BoxFuture<'_, QueryResult<Page>>;
}

/// Consulted before every send; may rewrite the request
pub trait RetryPolicy: Send {
    fn before_send(&mut self, request: &mut QueryRequest);
}

/// Creates one retry policy per request stream
pub trait RetryPolicyFactory: Send + Sync {
    fn create(&self) -> Box<dyn RetryPolicy>;
}

/// Policy that leaves requests untouched
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRetryPolicy;

impl RetryPolicy for NoRetryPolicy {
    fn before_send(&mut self, _request: &mut QueryRequest) {}
}

impl RetryPolicyFactory for NoRetryPolicy {
    fn create(&self) -> Box<dyn RetryPolicy> {
        Box::new(NoRetryPolicy)
    }
}

/// Everything a query execution needs from its environment
#[derive(Clone)]
pub struct QueryClient {
    collection: String,
    executor: Arc<dyn RequestExecutor>,
    resolver: Arc<dyn PartitionKeyRangeResolver>,
    retry: Arc<dyn RetryPolicyFactory>,
    metrics: Arc<QueryMetrics>,
    config: PipelineConfig,
}

impl QueryClient {
    /// Create a client for `collection`
    pub fn new(
        collection: impl Into<String>,
        executor: Arc<dyn RequestExecutor>,
        resolver: Arc<dyn PartitionKeyRangeResolver>,
    ) -> Self {
        Self {
            collection: collection.into(),
            executor,
            resolver,
            retry: Arc::new(NoRetryPolicy),
            metrics: Arc::new(QueryMetrics::new()),
            config: PipelineConfig::default(),
        }
    }

    /// Use a retry policy factory
    pub fn with_retry_policy(mut self, retry: Arc<dyn RetryPolicyFactory>) -> Self {
        self.retry = retry;
        self
    }

    /// Share a metrics registry
    pub fn with_metrics(mut self, metrics: Arc<QueryMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Use a pipeline configuration
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn executor(&self) -> &dyn RequestExecutor {
        self.executor.as_ref()
    }

    pub fn resolver(&self) -> &dyn PartitionKeyRangeResolver {
        self.resolver.as_ref()
    }

    pub fn metrics(&self) -> &QueryMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// New retry policy for one request stream
    pub fn retry_policy(&self) -> Box<dyn RetryPolicy> {
        self.retry.create()
    }

    /// Start a query; pages are pulled from the returned context
    pub fn query(&self, query: SqlQuerySpec, options: FeedOptions) -> ProxyContext {
        ProxyContext::new(self.clone(), query, options)
    }
}
