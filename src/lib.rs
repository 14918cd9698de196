#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::single_match_else,
    clippy::uninlined_format_args
)]

//! Streaming substrate for tool-calling LLM agents.
//!
//! Two hard problems live here. While a model's response streams in
//! token-by-token, its tool arguments are a JSON document that is almost
//! always syntactically incomplete — [`streaming::parse`] extracts the best
//! current value of every reachable field anyway, and
//! [`streaming::ToolCallSession`] turns those observations into bounded
//! side effects over a tool call's start/delta/finish lifecycle. Once a turn
//! has settled, upstream SDKs often leave several invocations bundled into
//! one assistant turn — [`history::normalize`] rebuilds the strict
//! invocation→result alternation the model expects on replay.
//!
//! Everything is in-process: no I/O, no wire format. Tool execution,
//! persistence, and rendering are the caller's business.

pub mod error;
pub mod history;
pub mod streaming;

pub use error::LifecycleError;
pub use history::{
    normalize, AssistantPart, ConversationSummary, ConversationTurn, NormalizedHistory,
    ToolInvocation, ToolResultPart,
};
pub use streaming::{
    normalize_escapes, parse, CallRegistry, CallStatus, ExtractedFields, ParseResult, StateSink,
    ToolCallSession, ToolCallView,
};
