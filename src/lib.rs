pub mod api;
pub mod colors;
pub mod persistent;
pub mod related_errors;
pub mod span_filter;
pub mod spans_interface;
pub mod task_timer;
pub mod trace_parser;
pub mod types;

pub use span_filter::filter_spans;
pub use spans_interface::{SpansInterface, SpansView};
pub use trace_parser::{parse_trace, MalformedTrace};
pub use types::{ParsedTrace, RawEvent, Span, TimePoint};
