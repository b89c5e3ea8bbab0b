//! State behind the spans view: the current event, its parsed trace, the search query and the
//! latest related errors. Everything shown on screen is derived from this state in
//! [SpansInterface::render].

use crate::related_errors::{
    related_errors_message, related_errors_query, ErrorEventsSnapshot, RelatedErrorsConfig,
    RelatedErrorsQuery,
};
use crate::span_filter::{filter_spans, spans_in_tree_order, SpanRow};
use crate::trace_parser::{parse_trace, MalformedTrace};
use crate::types::{ParsedTrace, RawEvent, Span};

pub const SEARCH_PLACEHOLDER: &str = "Search for spans";

#[derive(Debug, Clone)]
pub struct SpansInterface {
    org_slug: String,
    event: RawEvent,
    parsed_trace: ParsedTrace,
    search_query: Option<String>,
    related_errors: ErrorEventsSnapshot,
    config: RelatedErrorsConfig,
}

/// Everything the view draws, top to bottom.
#[derive(Debug, Clone, PartialEq)]
pub struct SpansView<'a> {
    pub alert: Option<String>,
    pub search_query: String,
    pub search_placeholder: &'static str,
    pub trace: &'a ParsedTrace,
    /// Matching spans in trace order.
    pub spans: Vec<&'a Span>,
    /// The same spans laid out as a tree, for drawing.
    pub rows: Vec<SpanRow<'a>>,
}

impl SpansInterface {
    pub fn new(
        org_slug: impl Into<String>,
        event: RawEvent,
        config: RelatedErrorsConfig,
    ) -> Result<SpansInterface, MalformedTrace> {
        let parsed_trace = parse_trace(&event)?;
        Ok(SpansInterface {
            org_slug: org_slug.into(),
            event,
            parsed_trace,
            search_query: None,
            related_errors: ErrorEventsSnapshot::Loading,
            config,
        })
    }

    /// Swaps in a new event. The trace is parsed from scratch and the related errors go back to
    /// loading, on failure the previous state is kept.
    pub fn set_event(&mut self, event: RawEvent) -> Result<(), MalformedTrace> {
        self.parsed_trace = parse_trace(&event)?;
        self.event = event;
        self.related_errors = ErrorEventsSnapshot::Loading;
        Ok(())
    }

    pub fn handle_span_filter(&mut self, search_query: &str) {
        self.search_query = if search_query.is_empty() {
            None
        } else {
            Some(search_query.to_string())
        };
    }

    pub fn set_related_errors(&mut self, snapshot: ErrorEventsSnapshot) {
        self.related_errors = snapshot;
    }

    pub fn related_errors_query(&self) -> RelatedErrorsQuery {
        related_errors_query(&self.event, &self.parsed_trace, &self.config)
    }

    pub fn org_slug(&self) -> &str {
        &self.org_slug
    }

    pub fn event(&self) -> &RawEvent {
        &self.event
    }

    pub fn parsed_trace(&self) -> &ParsedTrace {
        &self.parsed_trace
    }

    pub fn search_query(&self) -> Option<&str> {
        self.search_query.as_deref()
    }

    pub fn related_errors(&self) -> &ErrorEventsSnapshot {
        &self.related_errors
    }

    pub fn render(&self) -> SpansView<'_> {
        SpansView {
            alert: self
                .related_errors
                .error_count()
                .and_then(related_errors_message),
            search_query: self.search_query.clone().unwrap_or_default(),
            search_placeholder: SEARCH_PLACEHOLDER,
            trace: &self.parsed_trace,
            spans: filter_spans(&self.parsed_trace, self.search_query.as_deref()),
            rows: spans_in_tree_order(&self.parsed_trace, self.search_query.as_deref()),
        }
    }
}
