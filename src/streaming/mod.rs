//! Streaming-side substrate: escape cleanup, optimistic argument parsing,
//! and per-call lifecycle state.

pub mod escape;
pub mod fields;
pub mod lifecycle;
pub mod parser;

pub use escape::normalize_escapes;
pub use fields::ExtractedFields;
pub use lifecycle::{CallRegistry, CallStatus, StateSink, ToolCallSession, ToolCallView};
pub use parser::{parse, ParseResult};
