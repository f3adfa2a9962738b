//! Query requests and their wire headers

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::plan::SqlQuerySpec;

use super::options::FeedOptions;

/// Header names understood by the service
pub mod headers {
    pub const CONTINUATION: &str = "x-ms-continuation";
    pub const PARTITION_KEY_RANGE_ID: &str = "x-ms-documentdb-partitionkeyrangeid";
    pub const REQUEST_CHARGE: &str = "x-ms-request-charge";
    pub const MAX_ITEM_COUNT: &str = "x-ms-max-item-count";
    pub const IS_QUERY: &str = "x-ms-documentdb-isquery";
    pub const ENABLE_CROSS_PARTITION: &str = "x-ms-documentdb-query-enablecrosspartition";
    pub const PARALLELIZE_CROSS_PARTITION: &str =
        "x-ms-documentdb-query-parallelizecrosspartitionquery";
    pub const SESSION_TOKEN: &str = "x-ms-session-token";
    pub const ACTIVITY_ID: &str = "x-ms-activity-id";
    pub const CONTENT_TYPE: &str = "Content-Type";

    /// Content type of a query body
    pub const QUERY_CONTENT_TYPE: &str = "application/query+json";
}

/// Inputs a request factory needs to build one page request
#[derive(Debug, Clone, Copy)]
pub struct RequestSpec<'a> {
    pub query: &'a SqlQuerySpec,
    pub partition_key_range_id: Option<&'a str>,
    pub continuation: Option<&'a str>,
    pub page_size: usize,
    pub options: &'a FeedOptions,
}

/// One query request against the service
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub activity_id: Uuid,
    pub query: SqlQuerySpec,
    pub partition_key_range_id: Option<String>,
    pub continuation: Option<String>,
    pub page_size: usize,
    pub enable_cross_partition_query: bool,
    pub max_degree_of_parallelism: Option<usize>,
    pub session_token: Option<String>,
    /// Headers added by retry policies or callers
    pub extra_headers: BTreeMap<String, String>,
}

impl QueryRequest {
    /// Build a request from a spec
    pub fn from_spec(spec: RequestSpec<'_>) -> Self {
        Self {
            activity_id: Uuid::new_v4(),
            query: spec.query.clone(),
            partition_key_range_id: spec.partition_key_range_id.map(str::to_string),
            continuation: spec.continuation.map(str::to_string),
            page_size: spec.page_size,
            enable_cross_partition_query: spec.options.enable_cross_partition_query,
            max_degree_of_parallelism: spec.options.max_degree_of_parallelism,
            session_token: spec.options.session_token.clone(),
            extra_headers: BTreeMap::new(),
        }
    }

    /// Wire headers for this request, in deterministic order
    pub fn headers(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        out.insert(headers::IS_QUERY.to_string(), "True".to_string());
        out.insert(
            headers::CONTENT_TYPE.to_string(),
            headers::QUERY_CONTENT_TYPE.to_string(),
        );
        out.insert(headers::ACTIVITY_ID.to_string(), self.activity_id.to_string());
        out.insert(headers::MAX_ITEM_COUNT.to_string(), self.page_size.to_string());
        if let Some(token) = &self.continuation {
            out.insert(headers::CONTINUATION.to_string(), token.clone());
        }
        if let Some(range_id) = &self.partition_key_range_id {
            out.insert(headers::PARTITION_KEY_RANGE_ID.to_string(), range_id.clone());
        }
        if self.enable_cross_partition_query {
            out.insert(headers::ENABLE_CROSS_PARTITION.to_string(), "True".to_string());
        }
        if let Some(dop) = self.max_degree_of_parallelism {
            out.insert(
                headers::PARALLELIZE_CROSS_PARTITION.to_string(),
                if dop != 1 { "True" } else { "False" }.to_string(),
            );
        }
        if let Some(session) = &self.session_token {
            out.insert(headers::SESSION_TOKEN.to_string(), session.clone());
        }
        for (name, value) in &self.extra_headers {
            out.insert(name.clone(), value.clone());
        }
        out
    }

    /// JSON body of the request
    pub fn body(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&self.query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_for_partition_request() {
        let query = SqlQuerySpec::new("SELECT * FROM c");
        let options = FeedOptions::cross_partition().with_session_token("0:7");
        let request = QueryRequest::from_spec(RequestSpec {
            query: &query,
            partition_key_range_id: Some("3"),
            continuation: Some("tok"),
            page_size: 25,
            options: &options,
        });

        let h = request.headers();
        assert_eq!(h[headers::IS_QUERY], "True");
        assert_eq!(h[headers::PARTITION_KEY_RANGE_ID], "3");
        assert_eq!(h[headers::CONTINUATION], "tok");
        assert_eq!(h[headers::MAX_ITEM_COUNT], "25");
        assert_eq!(h[headers::ENABLE_CROSS_PARTITION], "True");
        assert_eq!(h[headers::SESSION_TOKEN], "0:7");
        assert_eq!(h[headers::CONTENT_TYPE], "application/query+json");
    }

    #[test]
    fn test_first_request_has_no_continuation() {
        let query = SqlQuerySpec::new("SELECT * FROM c");
        let options = FeedOptions::default();
        let request = QueryRequest::from_spec(RequestSpec {
            query: &query,
            partition_key_range_id: None,
            continuation: None,
            page_size: 10,
            options: &options,
        });

        let h = request.headers();
        assert!(!h.contains_key(headers::CONTINUATION));
        assert!(!h.contains_key(headers::PARTITION_KEY_RANGE_ID));
        assert!(!h.contains_key(headers::ENABLE_CROSS_PARTITION));
    }

    #[test]
    fn test_body_is_query_json() {
        let query = SqlQuerySpec::new("SELECT * FROM c WHERE c.a = @a")
            .with_parameter("@a", serde_json::json!(1));
        let options = FeedOptions::default();
        let request = QueryRequest::from_spec(RequestSpec {
            query: &query,
            partition_key_range_id: None,
            continuation: None,
            page_size: 10,
            options: &options,
        });
        let body: serde_json::Value = serde_json::from_slice(&request.body().unwrap()).unwrap();
        assert_eq!(body["parameters"][0]["name"], "@a");
    }
}
