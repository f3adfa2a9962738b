//! Observable query pipeline events
//!
//! Events are explicit and typed.

use std::fmt;

/// Observable events in the query pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Configuration
    /// Pipeline configuration loaded
    ConfigLoaded,

    // Query lifecycle
    /// Query execution started
    QueryBegin,
    /// Query plan parsed
    QueryPlanned,
    /// Partitioned pipeline assembled
    PipelineBuilt,
    /// Optimistic single-range attempt rejected, replanning
    CrossPartitionFallback,
    /// Query drained every page
    QueryComplete,
    /// Query terminated with an error
    QueryFailed,

    // Partition topology
    /// A producer was replaced by child producers
    PartitionSplit,
    /// A gone range resolved to itself and was re-read
    PartitionMoved,

    // Paging
    /// A request was sent for one range
    RequestSent,
    /// A page was handed to the caller
    PageEmitted,
    /// TOP budget satisfied, upstream stopped
    TopSatisfied,
    /// Server returned more rows than requested
    TopOverfetch,
    /// Fetch attempted on an exhausted stream
    FetchAfterExhaustion,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ConfigLoaded => "CONFIG_LOADED",

            Event::QueryBegin => "QUERY_BEGIN",
            Event::QueryPlanned => "QUERY_PLANNED",
            Event::PipelineBuilt => "PIPELINE_BUILT",
            Event::CrossPartitionFallback => "CROSS_PARTITION_FALLBACK",
            Event::QueryComplete => "QUERY_COMPLETE",
            Event::QueryFailed => "QUERY_FAILED",

            Event::PartitionSplit => "PARTITION_SPLIT",
            Event::PartitionMoved => "PARTITION_MOVED",

            Event::RequestSent => "REQUEST_SENT",
            Event::PageEmitted => "PAGE_EMITTED",
            Event::TopSatisfied => "TOP_SATISFIED",
            Event::TopOverfetch => "TOP_OVERFETCH",
            Event::FetchAfterExhaustion => "FETCH_AFTER_EXHAUSTION",
        }
    }

    /// Returns true if this event indicates an invariant violation
    pub fn is_fatal(&self) -> bool {
        matches!(self, Event::FetchAfterExhaustion)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_events_have_string_representation() {
        let events = [
            Event::ConfigLoaded,
            Event::QueryBegin,
            Event::QueryPlanned,
            Event::PipelineBuilt,
            Event::CrossPartitionFallback,
            Event::QueryComplete,
            Event::QueryFailed,
            Event::PartitionSplit,
            Event::PartitionMoved,
            Event::RequestSent,
            Event::PageEmitted,
            Event::TopSatisfied,
            Event::TopOverfetch,
            Event::FetchAfterExhaustion,
        ];

        for event in events {
            let s = event.as_str();
            assert!(!s.is_empty());
            assert!(s.chars().all(|c| c.is_uppercase() || c == '_'));
        }
    }

    #[test]
    fn test_fatal_events() {
        assert!(Event::FetchAfterExhaustion.is_fatal());
        assert!(!Event::PartitionSplit.is_fatal());
        assert!(!Event::TopOverfetch.is_fatal());
    }

    #[test]
    fn test_event_display() {
        assert_eq!(format!("{}", Event::CrossPartitionFallback), "CROSS_PARTITION_FALLBACK");
    }
}
