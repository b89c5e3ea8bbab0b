//! Discover query for the error events that belong to the same trace as the transaction,
//! and the alert text summarizing them.

use crate::types::{time_point_to_date_time, ParsedTrace, RawEvent, TimePoint};

pub const RELATED_ERRORS_QUERY_NAME: &str = "Related errors";

pub const RELATED_ERRORS_FIELDS: [&str; 6] = [
    "title",
    "project",
    "timestamp",
    "trace",
    "trace.span",
    "trace.parent_span",
];

pub const RELATED_ERRORS_ORDERBY: &str = "-timestamp";

#[derive(Debug, Clone, PartialEq)]
pub struct RelatedErrorsConfig {
    /// Narrow the errors down to the ones reported for this transaction (by title).
    /// With this off, every error in the trace is related.
    pub narrow_by_transaction: bool,
    /// Widens the queried time range on both ends.
    pub time_padding_secs: f64,
}

impl Default for RelatedErrorsConfig {
    fn default() -> Self {
        RelatedErrorsConfig {
            narrow_by_transaction: true,
            time_padding_secs: 0.0,
        }
    }
}

/// Search conditions: free text terms plus `key:value` tags in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryConditions {
    pub query: Vec<String>,
    pub tags: Vec<(String, Vec<String>)>,
}

impl QueryConditions {
    pub fn add_tag(&mut self, key: &str, values: Vec<String>) {
        match self.tags.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => existing.extend(values),
            None => self.tags.push((key.to_string(), values)),
        }
    }

    pub fn get_tag(&self, key: &str) -> Option<&[String]> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, values)| values.as_slice())
    }
}

/// Render conditions in the search syntax, e.g. `event.type:error trace:abc transaction:"GET /"`.
pub fn stringify_query_object(conditions: &QueryConditions) -> String {
    let mut tokens: Vec<String> = conditions.query.clone();
    for (key, values) in &conditions.tags {
        for value in values {
            tokens.push(format!("{}:{}", key, quote_value(value)));
        }
    }
    tokens.join(" ").trim().to_string()
}

fn quote_value(value: &str) -> String {
    if value.is_empty() || value.chars().any(|c| c.is_whitespace() || c == '"') {
        format!("\"{}\"", value.replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelatedErrorsQuery {
    pub name: String,
    pub fields: Vec<String>,
    pub orderby: String,
    pub conditions: QueryConditions,
    pub start: String,
    pub end: String,
}

impl RelatedErrorsQuery {
    pub fn query_string(&self) -> String {
        stringify_query_object(&self.conditions)
    }
}

/// Formats the trace bounds as the start/end of a discover query.
pub fn get_trace_date_time_range(
    start: TimePoint,
    end: TimePoint,
    padding_secs: f64,
) -> (String, String) {
    (
        format_query_time(start - padding_secs),
        format_query_time(end + padding_secs),
    )
}

fn format_query_time(time: TimePoint) -> String {
    time_point_to_date_time(time)
        .format("%Y-%m-%dT%H:%M:%S%.3f")
        .to_string()
}

pub fn related_errors_query(
    event: &RawEvent,
    trace: &ParsedTrace,
    config: &RelatedErrorsConfig,
) -> RelatedErrorsQuery {
    let (start, end) = get_trace_date_time_range(
        trace.trace_start_timestamp,
        trace.trace_end_timestamp,
        config.time_padding_secs,
    );

    let mut conditions = QueryConditions::default();
    conditions.add_tag("event.type", vec!["error".to_string()]);
    conditions.add_tag("trace", vec![trace.trace_id.clone()]);
    if config.narrow_by_transaction {
        if let Some(title) = event.title.as_ref().filter(|title| !title.is_empty()) {
            conditions.add_tag("transaction", vec![title.clone()]);
        }
    }

    RelatedErrorsQuery {
        name: RELATED_ERRORS_QUERY_NAME.to_string(),
        fields: RELATED_ERRORS_FIELDS.iter().map(|f| f.to_string()).collect(),
        orderby: RELATED_ERRORS_ORDERBY.to_string(),
        conditions,
        start,
        end,
    }
}

/// One row of the discover results table.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct ErrorEventRow {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub trace: Option<String>,
    #[serde(rename = "trace.span", default)]
    pub trace_span: Option<String>,
    #[serde(rename = "trace.parent_span", default)]
    pub trace_parent_span: Option<String>,
}

/// Fetched error rows. `rows` may be a single page, `total` counts every match.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RelatedErrors {
    pub rows: Vec<ErrorEventRow>,
    pub total: usize,
}

impl RelatedErrors {
    pub fn from_rows(rows: Vec<ErrorEventRow>) -> RelatedErrors {
        RelatedErrors {
            total: rows.len(),
            rows,
        }
    }
}

/// Latest known state of the related errors fetch.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ErrorEventsSnapshot {
    #[default]
    Loading,
    Failed,
    Loaded(RelatedErrors),
}

impl ErrorEventsSnapshot {
    /// Loading and failed fetches have nothing to count.
    pub fn error_count(&self) -> Option<usize> {
        match self {
            ErrorEventsSnapshot::Loaded(errors) => Some(errors.total),
            ErrorEventsSnapshot::Loading | ErrorEventsSnapshot::Failed => None,
        }
    }
}

pub fn related_errors_message(count: usize) -> Option<String> {
    match count {
        0 => None,
        1 => Some("There was 1 error associated with this event.".to_string()),
        n => Some(format!("There were {n} errors associated with this event.")),
    }
}
