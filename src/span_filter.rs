use std::collections::HashSet;

use crate::types::{ParsedTrace, Span};

/// Case-insensitive substring query over a span's op and description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanQuery {
    needle: String,
}

impl SpanQuery {
    /// Returns `None` for an empty query, which matches everything.
    pub fn new(query: &str) -> Option<SpanQuery> {
        if query.is_empty() {
            return None;
        }
        Some(SpanQuery {
            needle: query.to_lowercase(),
        })
    }

    pub fn matches(&self, span: &Span) -> bool {
        if span.op.to_lowercase().contains(&self.needle) {
            return true;
        }
        span.description
            .as_ref()
            .is_some_and(|description| description.to_lowercase().contains(&self.needle))
    }
}

/// Spans of the trace that match the query, in trace order.
/// No query (or an empty one) keeps every span.
pub fn filter_spans<'a>(trace: &'a ParsedTrace, query: Option<&str>) -> Vec<&'a Span> {
    match query.and_then(SpanQuery::new) {
        Some(query) => trace.spans.iter().filter(|s| query.matches(s)).collect(),
        None => trace.spans.iter().collect(),
    }
}

/// Ids of the spans matched by [filter_spans], handy for highlighting.
pub fn matching_span_ids(trace: &ParsedTrace, query: Option<&str>) -> HashSet<String> {
    filter_spans(trace, query)
        .into_iter()
        .map(|span| span.span_id.clone())
        .collect()
}

/// A span placed in the trace tree, children of the root have depth 1.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanRow<'a> {
    pub span: &'a Span,
    pub depth: usize,
}

/// Matching spans in depth-first order starting at the root: each span is followed by its
/// descendants, siblings keep trace order. Spans that don't match are skipped but their
/// matching descendants still show up at their real depth.
pub fn spans_in_tree_order<'a>(trace: &'a ParsedTrace, query: Option<&str>) -> Vec<SpanRow<'a>> {
    let matching = matching_span_ids(trace, query);
    let mut rows = Vec::with_capacity(matching.len());

    let mut stack: Vec<(&Span, usize)> = trace
        .children_of(&trace.root_span_id)
        .into_iter()
        .rev()
        .map(|span| (span, 1))
        .collect();
    // The parser rejects cycles, so the walk ends.
    while let Some((span, depth)) = stack.pop() {
        if matching.contains(&span.span_id) {
            rows.push(SpanRow { span, depth });
        }
        stack.extend(
            trace
                .children_of(&span.span_id)
                .into_iter()
                .rev()
                .map(|child| (child, depth + 1)),
        );
    }
    rows
}
