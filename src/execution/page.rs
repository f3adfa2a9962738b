//! Pages and request-charge accounting

use serde_json::Value;

/// One page of query results
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    /// Rows in stream order
    pub rows: Vec<Value>,
    /// Token for the next page; `None` or empty means exhausted
    pub continuation: Option<String>,
    /// Cost of the request(s) that produced this page
    pub request_charge: f64,
    /// Session token returned by the service
    pub session_token: Option<String>,
    /// Activity id of the request that produced this page
    pub activity_id: Option<String>,
    /// Change-feed "no changes" signal
    pub not_modified: bool,
}

impl Page {
    /// Create a page
    pub fn new(rows: Vec<Value>, continuation: Option<String>, request_charge: f64) -> Self {
        Self {
            rows,
            continuation,
            request_charge,
            ..Default::default()
        }
    }

    /// An empty terminal page that only carries charge
    pub fn charge_only(request_charge: f64) -> Self {
        Self::new(Vec::new(), None, request_charge)
    }

    /// Continuation token, with empty strings treated as absent
    pub fn continuation(&self) -> Option<&str> {
        self.continuation.as_deref().filter(|token| !token.is_empty())
    }

    /// Whether another page follows this one
    pub fn has_more(&self) -> bool {
        self.continuation().is_some()
    }

    /// Returns true if the page has no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns the number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

/// Request-charge accumulator
///
/// Charge from requests whose rows are not emitted yet (filtered empty
/// pages, rows still buffered in a merge) stays pending until the next
/// emitted page absorbs it. `emitted()` always equals the charge handed to
/// the caller, `recorded()` the charge of every request seen.
#[derive(Debug, Clone, Default)]
pub struct ChargeTracker {
    pending: f64,
    recorded: f64,
    emitted: f64,
}

impl ChargeTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the charge of one underlying request
    pub fn record(&mut self, charge: f64) {
        self.pending += charge;
        self.recorded += charge;
    }

    /// Move all pending charge onto a page about to be emitted
    pub fn settle(&mut self, page: &mut Page) {
        page.request_charge += self.pending;
        self.emitted += self.pending;
        self.pending = 0.0;
    }

    /// Pending charge not yet attached to any page
    pub fn pending(&self) -> f64 {
        self.pending
    }

    /// Whether any charge is waiting for a page
    pub fn has_pending(&self) -> bool {
        self.pending > 0.0
    }

    /// Total charge of all recorded requests
    pub fn recorded(&self) -> f64 {
        self.recorded
    }

    /// Total charge handed out on pages
    pub fn emitted(&self) -> f64 {
        self.emitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_continuation_means_exhausted() {
        let page = Page::new(vec![json!(1)], Some(String::new()), 1.0);
        assert!(!page.has_more());
        assert_eq!(page.continuation(), None);

        let page = Page::new(vec![json!(1)], Some("next".to_string()), 1.0);
        assert!(page.has_more());
    }

    #[test]
    fn test_charge_tracker_carries_forward() {
        let mut tracker = ChargeTracker::new();
        tracker.record(1.5);
        tracker.record(2.0);

        let mut page = Page::new(vec![json!(1)], None, 0.0);
        tracker.settle(&mut page);

        assert_eq!(page.request_charge, 3.5);
        assert!(!tracker.has_pending());
        assert_eq!(tracker.recorded(), tracker.emitted());
    }

    #[test]
    fn test_charge_only_page() {
        let page = Page::charge_only(4.0);
        assert!(page.is_empty());
        assert!(!page.has_more());
        assert_eq!(page.request_charge, 4.0);
    }
}
