use std::collections::BTreeMap;

/// Seconds since epoch
pub type TimePoint = f64;

pub const MILLISECONDS_PER_SECOND: f64 = 1000.0;

/// Type of the event entry which carries the span records.
pub const SPANS_ENTRY_TYPE: &str = "spans";

/// Whole seconds and nanoseconds are converted separately, multiplying the whole time point by
/// 1e9 loses precision for present day timestamps.
pub fn time_point_to_date_time(time: TimePoint) -> chrono::DateTime<chrono::Utc> {
    let mut secs = time.floor() as i64;
    let mut nanos = ((time - time.floor()) * 1e9).round() as u32;
    if nanos >= 1_000_000_000 {
        secs += 1;
        nanos -= 1_000_000_000;
    }
    chrono::DateTime::from_timestamp(secs, nanos).unwrap_or_default()
}

pub fn time_point_to_utc_string(time: TimePoint) -> String {
    time_point_to_date_time(time)
        .format("%Y-%m-%d %H:%M:%S%.3f")
        .to_string()
}

/// Transaction event as returned by the event store.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    #[serde(rename = "eventID", default)]
    pub event_id: String,
    #[serde(
        rename = "projectID",
        default,
        deserialize_with = "deserialize_optional_id"
    )]
    pub project_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    pub start_timestamp: TimePoint,
    pub end_timestamp: TimePoint,
    #[serde(default)]
    pub contexts: Contexts,
    #[serde(default)]
    pub entries: Vec<RawEntry>,
}

#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct Contexts {
    #[serde(default)]
    pub trace: Option<TraceContext>,
}

/// Describes the root span of the transaction.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct TraceContext {
    #[serde(default)]
    pub trace_id: String,
    #[serde(default)]
    pub span_id: String,
    #[serde(default)]
    pub parent_span_id: Option<String>,
    #[serde(default)]
    pub op: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// One typed entry of an event. Only entries of type [SPANS_ENTRY_TYPE] are interpreted,
/// everything else is carried along untouched.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RawEntry {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl RawEntry {
    pub fn spans(spans: &[RawSpan]) -> serde_json::Result<RawEntry> {
        Ok(RawEntry {
            kind: SPANS_ENTRY_TYPE.to_string(),
            data: serde_json::to_value(spans)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct RawSpan {
    pub span_id: String,
    #[serde(default)]
    pub parent_span_id: Option<String>,
    #[serde(default)]
    pub trace_id: String,
    #[serde(default)]
    pub op: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub start_timestamp: TimePoint,
    /// End of the span
    pub timestamp: TimePoint,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// A normalized span. Its parent is either the root span or another span of the same trace.
#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    pub span_id: String,
    pub parent_span_id: String,
    pub trace_id: String,
    pub op: String,
    pub description: Option<String>,
    pub start_time: TimePoint,
    pub end_time: TimePoint,
    pub status: Option<String>,
    pub tags: BTreeMap<String, String>,
}

impl Span {
    pub fn duration(&self) -> TimePoint {
        self.end_time - self.start_time
    }

    /// Text shown for the span in the trace view.
    pub fn label(&self) -> String {
        match &self.description {
            Some(description) if !description.is_empty() => {
                format!("{} - {}", self.op, description)
            }
            _ => self.op.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTrace {
    pub trace_id: String,
    pub root_span_id: String,
    pub op: String,
    pub description: Option<String>,
    pub root_span_status: Option<String>,
    /// Parent of the root span, set when the transaction continues a distributed trace.
    pub parent_span_id: Option<String>,
    pub trace_start_timestamp: TimePoint,
    pub trace_end_timestamp: TimePoint,
    /// Spans sorted by start time, then end time.
    pub spans: Vec<Span>,
    /// Parent span id -> indexes into `spans`, in the same order as `spans`.
    pub child_spans: BTreeMap<String, Vec<usize>>,
}

impl ParsedTrace {
    pub fn num_of_spans(&self) -> usize {
        self.spans.len()
    }

    pub fn duration(&self) -> TimePoint {
        self.trace_end_timestamp - self.trace_start_timestamp
    }

    pub fn get_span(&self, span_id: &str) -> Option<&Span> {
        self.spans.iter().find(|span| span.span_id == span_id)
    }

    pub fn children_of(&self, span_id: &str) -> Vec<&Span> {
        self.child_spans
            .get(span_id)
            .map(|indexes| indexes.iter().map(|i| &self.spans[*i]).collect())
            .unwrap_or_default()
    }

    /// Number of ancestors between the span and the root. Direct children of the root have
    /// depth 1, the root itself has depth 0.
    pub fn depth_of(&self, span_id: &str) -> Option<usize> {
        if span_id == self.root_span_id {
            return Some(0);
        }

        let mut depth = 0;
        let mut current = self.get_span(span_id)?;
        // Parent links are validated during parsing, so every chain ends at the root.
        // The bound guards against cycles between non-root spans.
        while depth <= self.spans.len() {
            depth += 1;
            if current.parent_span_id == self.root_span_id {
                return Some(depth);
            }
            current = self.get_span(&current.parent_span_id)?;
        }
        None
    }
}

#[derive(serde::Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    String(String),
    Number(serde_json::Number),
}

fn deserialize_optional_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value: Option<StringOrNumber> = serde::Deserialize::deserialize(deserializer)?;
    Ok(value.map(|v| match v {
        StringOrNumber::String(s) => s,
        StringOrNumber::Number(n) => n.to_string(),
    }))
}
