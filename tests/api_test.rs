use std::cell::RefCell;

use serde_json::json;

use spanview::api::{
    fetch_related_errors, prompts_update, related_errors_request, ApiRequest, ApiResponse,
    ApiTransport, Method, PromptStatus, PromptsUpdateParams, RELATED_ERRORS_PER_PAGE,
};
use spanview::related_errors::{related_errors_query, ErrorEventsSnapshot, RelatedErrorsConfig};
use spanview::SpansInterface;
use spanview::trace_parser::parse_trace;

use test_helpers::*;

/// Records requests and answers each one with the same canned response.
struct RecordingTransport {
    requests: RefCell<Vec<ApiRequest>>,
    response: Option<ApiResponse>,
}

impl RecordingTransport {
    fn new(response: Option<serde_json::Value>) -> Self {
        RecordingTransport {
            requests: RefCell::new(vec![]),
            response: response.map(ApiResponse::new),
        }
    }

    fn with_total_hits(body: serde_json::Value, total_hits: usize) -> Self {
        RecordingTransport {
            requests: RefCell::new(vec![]),
            response: Some(ApiResponse {
                body,
                total_hits: Some(total_hits),
            }),
        }
    }
}

impl ApiTransport for RecordingTransport {
    fn send(&self, request: ApiRequest) -> anyhow::Result<ApiResponse> {
        self.requests.borrow_mut().push(request);
        self.response
            .clone()
            .ok_or_else(|| anyhow::anyhow!("500 Internal Server Error"))
    }
}

fn param<'a>(request: &'a ApiRequest, name: &str) -> Vec<&'a str> {
    request
        .query
        .iter()
        .filter(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
        .collect()
}

#[test]
fn test_prompts_update_request() {
    let transport = RecordingTransport::new(Some(serde_json::Value::Null));
    prompts_update(
        &transport,
        &PromptsUpdateParams {
            organization_id: "1".to_string(),
            project_id: Some("7".to_string()),
            feature: "spans_search_hint".to_string(),
            status: PromptStatus::Dismissed,
        },
    )
    .unwrap();

    let requests = transport.requests.borrow();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, Method::Put);
    assert_eq!(requests[0].path, "/promptsactivity/");
    assert_eq!(
        requests[0].body,
        Some(json!({
            "organization_id": "1",
            "project_id": "7",
            "feature": "spans_search_hint",
            "status": "dismissed",
        }))
    );
}

#[test]
fn test_prompts_update_without_project() {
    let transport = RecordingTransport::new(Some(serde_json::Value::Null));
    prompts_update(
        &transport,
        &PromptsUpdateParams {
            organization_id: "1".to_string(),
            project_id: None,
            feature: "spans_search_hint".to_string(),
            status: PromptStatus::Snoozed,
        },
    )
    .unwrap();

    let body = transport.requests.borrow()[0].body.clone().unwrap();
    assert_eq!(
        body,
        json!({"organization_id": "1", "feature": "spans_search_hint", "status": "snoozed"})
    );
}

#[test]
fn test_prompts_update_error_is_returned() {
    let transport = RecordingTransport::new(None);
    let result = prompts_update(
        &transport,
        &PromptsUpdateParams {
            organization_id: "1".to_string(),
            project_id: None,
            feature: "f".to_string(),
            status: PromptStatus::Snoozed,
        },
    );
    assert!(result.is_err());
    // No retries.
    assert_eq!(transport.requests.borrow().len(), 1);
}

#[test]
fn test_related_errors_request() {
    let event = db_and_http_event();
    let trace = parse_trace(&event).unwrap();
    let query = related_errors_query(&event, &trace, &RelatedErrorsConfig::default());
    let request = related_errors_request("acme", &query);

    assert_eq!(request.method, Method::Get);
    assert_eq!(request.path, "/organizations/acme/eventsv2/");
    assert_eq!(request.body, None);
    assert_eq!(
        param(&request, "field"),
        vec!["title", "project", "timestamp", "trace", "trace.span", "trace.parent_span"]
    );
    assert_eq!(param(&request, "sort"), vec!["-timestamp"]);
    assert_eq!(param(&request, "query"), vec![query.query_string().as_str()]);
    assert_eq!(param(&request, "start"), vec!["1970-01-01T00:01:41.000"]);
    assert_eq!(param(&request, "end"), vec!["1970-01-01T00:01:45.500"]);
    assert_eq!(
        param(&request, "per_page"),
        vec![RELATED_ERRORS_PER_PAGE.to_string().as_str()]
    );
}

#[test]
fn test_fetch_related_errors_decodes_rows() {
    let transport = RecordingTransport::new(Some(json!({
        "meta": {"title": "string"},
        "data": [
            {
                "id": "e1",
                "title": "ValueError",
                "project": "backend",
                "timestamp": "2020-09-13T12:26:40",
                "trace": TRACE_ID,
                "trace.span": "b1",
                "trace.parent_span": ROOT_SPAN_ID
            },
            {"id": "e2", "title": "KeyError"}
        ]
    })));

    let event = db_and_http_event();
    let trace = parse_trace(&event).unwrap();
    let query = related_errors_query(&event, &trace, &RelatedErrorsConfig::default());
    let errors = fetch_related_errors(&transport, "acme", &query).unwrap();

    // No hits header, the rows are all there is.
    assert_eq!(errors.total, 2);
    let rows = &errors.rows;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].trace_span.as_deref(), Some("b1"));
    assert_eq!(rows[0].trace_parent_span.as_deref(), Some(ROOT_SPAN_ID));
    assert_eq!(rows[1].project, None);
}

#[test]
fn test_fetch_related_errors_failure() {
    let transport = RecordingTransport::new(None);
    let event = db_and_http_event();
    let trace = parse_trace(&event).unwrap();
    let query = related_errors_query(&event, &trace, &RelatedErrorsConfig::default());
    assert!(fetch_related_errors(&transport, "acme", &query).is_err());
}

#[test]
fn test_related_errors_total_beyond_one_page() {
    let page: Vec<serde_json::Value> = (0..RELATED_ERRORS_PER_PAGE)
        .map(|i| json!({"id": format!("e{i}"), "title": "ValueError", "trace": TRACE_ID}))
        .collect();
    let transport = RecordingTransport::with_total_hits(json!({ "data": page }), 120);

    let mut interface = SpansInterface::new(
        "acme",
        db_and_http_event(),
        RelatedErrorsConfig::default(),
    )
    .unwrap();
    let errors = fetch_related_errors(
        &transport,
        interface.org_slug(),
        &interface.related_errors_query(),
    )
    .unwrap();
    assert_eq!(errors.rows.len(), RELATED_ERRORS_PER_PAGE);
    assert_eq!(errors.total, 120);

    interface.set_related_errors(ErrorEventsSnapshot::Loaded(errors));
    assert_eq!(
        interface.render().alert.as_deref(),
        Some("There were 120 errors associated with this event.")
    );
}
