use approx::assert_relative_eq;
use serde_json::json;

use spanview::trace_parser::{parse_trace, MalformedTrace, DEFAULT_ROOT_OP};
use spanview::types::{RawEntry, RawEvent};

use test_helpers::*;

#[test]
fn test_parse_basic_trace() {
    let parsed = parse_trace(&db_and_http_event()).unwrap();

    assert_eq!(parsed.trace_id, TRACE_ID);
    assert_eq!(parsed.root_span_id, ROOT_SPAN_ID);
    assert_eq!(parsed.op, "http.server");
    assert_eq!(parsed.num_of_spans(), 2);
    assert_relative_eq!(parsed.trace_start_timestamp, 101.0);
    assert_relative_eq!(parsed.trace_end_timestamp, 105.5);
    assert_relative_eq!(parsed.duration(), 4.5);
}

#[test]
fn test_spans_sorted_and_linked() {
    let parsed = parse_trace(&nested_event()).unwrap();

    let ids: Vec<&str> = parsed.spans.iter().map(|s| s.span_id.as_str()).collect();
    assert_eq!(ids, vec!["c4", "c1", "c2", "c3"]);

    // The orphan gets attached to the root.
    let orphan = parsed.get_span("c4").unwrap();
    assert_eq!(orphan.parent_span_id, ROOT_SPAN_ID);

    let root_children: Vec<&str> = parsed
        .children_of(ROOT_SPAN_ID)
        .iter()
        .map(|s| s.span_id.as_str())
        .collect();
    assert_eq!(root_children, vec!["c4", "c1"]);

    let render_children: Vec<&str> = parsed
        .children_of("c1")
        .iter()
        .map(|s| s.span_id.as_str())
        .collect();
    assert_eq!(render_children, vec!["c2", "c3"]);

    assert_eq!(parsed.depth_of(ROOT_SPAN_ID), Some(0));
    assert_eq!(parsed.depth_of("c1"), Some(1));
    assert_eq!(parsed.depth_of("c3"), Some(2));
    assert_eq!(parsed.depth_of("missing"), None);
}

#[test]
fn test_trace_bounds_cover_all_spans() {
    let parsed = parse_trace(&nested_event()).unwrap();

    // The orphan spans past both ends of the event itself.
    assert_relative_eq!(parsed.trace_start_timestamp, 99.0);
    assert_relative_eq!(parsed.trace_end_timestamp, 111.5);
    assert!(parsed.trace_start_timestamp <= parsed.trace_end_timestamp);
    for span in &parsed.spans {
        assert!(span.start_time <= span.end_time);
        assert!(span.start_time >= parsed.trace_start_timestamp);
        assert!(span.end_time <= parsed.trace_end_timestamp);
        assert!(
            span.parent_span_id == parsed.root_span_id
                || parsed.get_span(&span.parent_span_id).is_some(),
            "parent of {} doesn't resolve",
            span.span_id
        );
    }
}

#[test]
fn test_no_spans_uses_event_timestamps() {
    let parsed = parse_trace(&create_test_event(Some("empty"), &[])).unwrap();
    assert!(parsed.spans.is_empty());
    assert_relative_eq!(parsed.trace_start_timestamp, 100.0);
    assert_relative_eq!(parsed.trace_end_timestamp, 110.0);

    let mut without_entry = create_test_event(None, &[]);
    without_entry.entries.clear();
    let parsed = parse_trace(&without_entry).unwrap();
    assert!(parsed.spans.is_empty());
    assert_relative_eq!(parsed.trace_start_timestamp, 100.0);
}

#[test]
fn test_parse_is_idempotent() {
    let event = nested_event();
    assert_eq!(parse_trace(&event).unwrap(), parse_trace(&event).unwrap());
}

#[test]
fn test_missing_root_span() {
    let mut event = db_and_http_event();
    event.contexts.trace = None;
    assert!(matches!(
        parse_trace(&event),
        Err(MalformedTrace::MissingRootSpan)
    ));

    let mut event = db_and_http_event();
    if let Some(context) = event.contexts.trace.as_mut() {
        context.span_id.clear();
    }
    assert!(matches!(
        parse_trace(&event),
        Err(MalformedTrace::MissingRootSpan)
    ));
}

#[test]
fn test_unresolved_parent() {
    // The parent appears later in the payload, which is fine.
    let event = create_test_event(
        None,
        &[
            raw_span("child", Some("parent"), "db", None, 101.0, 102.0),
            raw_span("parent", Some(ROOT_SPAN_ID), "http", None, 100.5, 103.0),
        ],
    );
    assert!(parse_trace(&event).is_ok());

    let event = create_test_event(
        None,
        &[raw_span("child", Some("nowhere"), "db", None, 101.0, 102.0)],
    );
    match parse_trace(&event) {
        Err(MalformedTrace::UnresolvedParent {
            span_id,
            parent_span_id,
        }) => {
            assert_eq!(span_id, "child");
            assert_eq!(parent_span_id, "nowhere");
        }
        other => panic!("expected UnresolvedParent, got {other:?}"),
    }
}

#[test]
fn test_duplicate_span_ids() {
    let event = create_test_event(
        None,
        &[
            raw_span("same", Some(ROOT_SPAN_ID), "db", None, 101.0, 102.0),
            raw_span("same", Some(ROOT_SPAN_ID), "http", None, 102.0, 103.0),
        ],
    );
    assert!(matches!(
        parse_trace(&event),
        Err(MalformedTrace::DuplicateSpanId { .. })
    ));
}

#[test]
fn test_inverted_timestamps() {
    let event = create_test_event(
        None,
        &[raw_span("b1", Some(ROOT_SPAN_ID), "db", None, 105.0, 104.0)],
    );
    assert!(matches!(
        parse_trace(&event),
        Err(MalformedTrace::InvertedTimestamps { .. })
    ));
}

#[test]
fn test_invalid_spans_entry() {
    let mut event = create_test_event(None, &[]);
    event.entries = vec![RawEntry {
        kind: "spans".to_string(),
        data: json!({"not": "a list"}),
    }];
    assert!(matches!(
        parse_trace(&event),
        Err(MalformedTrace::InvalidSpanEntry(_))
    ));
}

#[test]
fn test_parse_event_json() {
    let event: RawEvent = serde_json::from_value(json!({
        "eventID": "0123",
        "projectID": 5,
        "title": "/api/checkout",
        "startTimestamp": 1600000000.0,
        "endTimestamp": 1600000002.5,
        "contexts": {
            "trace": {
                "trace_id": "t-1",
                "span_id": "r-1"
            }
        },
        "entries": [
            {"type": "breadcrumbs", "data": {"values": []}},
            {"type": "spans", "data": [
                {
                    "span_id": "s-1",
                    "parent_span_id": "r-1",
                    "trace_id": "t-1",
                    "op": "db",
                    "description": "INSERT INTO orders",
                    "start_timestamp": 1600000000.5,
                    "timestamp": 1600000001.0,
                    "tags": {"db.system": "postgres"}
                }
            ]}
        ]
    }))
    .unwrap();

    assert_eq!(event.project_id.as_deref(), Some("5"));

    let parsed = parse_trace(&event).unwrap();
    assert_eq!(parsed.op, DEFAULT_ROOT_OP);
    assert_eq!(parsed.spans.len(), 1);
    let span = &parsed.spans[0];
    assert_eq!(span.op, "db");
    assert_eq!(span.tags.get("db.system").map(String::as_str), Some("postgres"));
    assert_relative_eq!(span.duration(), 0.5);
    assert_relative_eq!(parsed.trace_start_timestamp, 1600000000.5);
    assert_relative_eq!(parsed.trace_end_timestamp, 1600000001.0);
}

#[test]
fn test_span_from_another_trace_is_kept() {
    let mut foreign = raw_span("d1", Some(ROOT_SPAN_ID), "rpc", None, 101.0, 102.0);
    foreign.trace_id = "ffffffffffffffffffffffffffffffff".to_string();
    let mut unset = raw_span("d2", Some(ROOT_SPAN_ID), "rpc", None, 102.0, 103.0);
    unset.trace_id = String::new();

    let parsed = parse_trace(&create_test_event(None, &[foreign, unset])).unwrap();

    // Logged, not rejected. A missing trace id falls back to the transaction's.
    assert_eq!(parsed.num_of_spans(), 2);
    assert_eq!(
        parsed.get_span("d1").unwrap().trace_id,
        "ffffffffffffffffffffffffffffffff"
    );
    assert_eq!(parsed.get_span("d2").unwrap().trace_id, TRACE_ID);
}
