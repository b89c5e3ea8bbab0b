//! Turns a raw transaction event into a [ParsedTrace].
//! The parse is a pure function of the event, so it is simply re-run whenever the event changes.

use std::collections::{BTreeMap, HashSet};

use crate::task_timer::TaskTimer;
use crate::types::{ParsedTrace, RawEvent, RawSpan, Span, TimePoint, SPANS_ENTRY_TYPE};

/// Op used for the root span when the trace context doesn't name one.
pub const DEFAULT_ROOT_OP: &str = "transaction";

#[derive(Debug, thiserror::Error)]
pub enum MalformedTrace {
    #[error("event has no root span (missing trace context or root span id)")]
    MissingRootSpan,
    #[error("spans entry could not be decoded: {0}")]
    InvalidSpanEntry(#[source] serde_json::Error),
    #[error("span id {span_id} appears more than once")]
    DuplicateSpanId { span_id: String },
    #[error("span {span_id} refers to unknown parent {parent_span_id}")]
    UnresolvedParent {
        span_id: String,
        parent_span_id: String,
    },
    #[error("span {span_id} ends ({end}) before it starts ({start})")]
    InvertedTimestamps {
        span_id: String,
        start: TimePoint,
        end: TimePoint,
    },
    #[error("{count} span(s) are not reachable from the root span {root_span_id}")]
    DetachedSpans { root_span_id: String, count: usize },
}

pub fn parse_trace(event: &RawEvent) -> Result<ParsedTrace, MalformedTrace> {
    let t = TaskTimer::new("Parsing trace");

    let trace_context = event
        .contexts
        .trace
        .as_ref()
        .filter(|context| !context.span_id.is_empty())
        .ok_or(MalformedTrace::MissingRootSpan)?;
    let root_span_id = trace_context.span_id.clone();

    let raw_spans = extract_raw_spans(event)?;

    // Single pass collecting the ids, parents are checked against this set afterwards.
    let mut known_ids = HashSet::with_capacity(raw_spans.len() + 1);
    known_ids.insert(root_span_id.as_str());
    for raw in &raw_spans {
        if !known_ids.insert(raw.span_id.as_str()) {
            return Err(MalformedTrace::DuplicateSpanId {
                span_id: raw.span_id.clone(),
            });
        }
    }

    let mut spans = Vec::with_capacity(raw_spans.len());
    for raw in &raw_spans {
        // Spans without a parent are orphans, they get attached to the root.
        let parent_span_id = match raw.parent_span_id.as_deref() {
            Some(parent) if !parent.is_empty() => parent.to_string(),
            _ => root_span_id.clone(),
        };
        if !known_ids.contains(parent_span_id.as_str()) {
            return Err(MalformedTrace::UnresolvedParent {
                span_id: raw.span_id.clone(),
                parent_span_id,
            });
        }
        if raw.timestamp < raw.start_timestamp {
            return Err(MalformedTrace::InvertedTimestamps {
                span_id: raw.span_id.clone(),
                start: raw.start_timestamp,
                end: raw.timestamp,
            });
        }

        if !raw.trace_id.is_empty() && raw.trace_id != trace_context.trace_id {
            tracing::warn!(
                span_id = %raw.span_id,
                span_trace_id = %raw.trace_id,
                trace_id = %trace_context.trace_id,
                "Span belongs to a different trace than its transaction"
            );
        }

        spans.push(Span {
            span_id: raw.span_id.clone(),
            parent_span_id,
            trace_id: if raw.trace_id.is_empty() {
                trace_context.trace_id.clone()
            } else {
                raw.trace_id.clone()
            },
            op: raw.op.clone().unwrap_or_default(),
            description: raw.description.clone(),
            start_time: raw.start_timestamp,
            end_time: raw.timestamp,
            status: raw.status.clone(),
            tags: raw.tags.clone(),
        });
    }

    // Stable sort keeps the payload order for spans with identical timestamps.
    spans.sort_by(|a, b| {
        a.start_time
            .total_cmp(&b.start_time)
            .then(a.end_time.total_cmp(&b.end_time))
    });

    let (trace_start_timestamp, trace_end_timestamp) =
        get_min_max_time(&spans).unwrap_or((event.start_timestamp, event.end_timestamp));

    let mut child_spans: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (index, span) in spans.iter().enumerate() {
        child_spans
            .entry(span.parent_span_id.clone())
            .or_default()
            .push(index);
    }

    let reachable = count_reachable(&root_span_id, &spans, &child_spans);
    if reachable != spans.len() {
        return Err(MalformedTrace::DetachedSpans {
            root_span_id,
            count: spans.len() - reachable,
        });
    }

    let parsed = ParsedTrace {
        trace_id: trace_context.trace_id.clone(),
        root_span_id,
        op: trace_context
            .op
            .clone()
            .unwrap_or_else(|| DEFAULT_ROOT_OP.to_string()),
        description: trace_context.description.clone(),
        root_span_status: trace_context.status.clone(),
        parent_span_id: trace_context.parent_span_id.clone(),
        trace_start_timestamp,
        trace_end_timestamp,
        spans,
        child_spans,
    };

    t.stop();
    Ok(parsed)
}

fn extract_raw_spans(event: &RawEvent) -> Result<Vec<RawSpan>, MalformedTrace> {
    let Some(entry) = event
        .entries
        .iter()
        .find(|entry| entry.kind == SPANS_ENTRY_TYPE)
    else {
        return Ok(Vec::new());
    };
    if entry.data.is_null() {
        return Ok(Vec::new());
    }
    serde_json::from_value(entry.data.clone()).map_err(MalformedTrace::InvalidSpanEntry)
}

pub fn get_min_max_time(spans: &[Span]) -> Option<(TimePoint, TimePoint)> {
    let first = spans.first()?;
    let mut min_time = first.start_time;
    let mut max_time = first.end_time;
    for span in spans {
        min_time = min_time.min(span.start_time);
        max_time = max_time.max(span.end_time);
    }
    Some((min_time, max_time))
}

/// Spans whose parent chain loops back on itself never reach the root.
fn count_reachable(
    root_span_id: &str,
    spans: &[Span],
    child_spans: &BTreeMap<String, Vec<usize>>,
) -> usize {
    let mut reached = 0;
    let mut stack = vec![root_span_id];
    while let Some(span_id) = stack.pop() {
        if let Some(children) = child_spans.get(span_id) {
            for index in children {
                reached += 1;
                stack.push(spans[*index].span_id.as_str());
            }
        }
    }
    reached
}
