//! Error types.
//!
//! Only programmer-error-class misuse is typed and surfaced. Syntax problems
//! in a streaming buffer are never errors (the parser degrades instead), a
//! missing tool result is reported as data on the normalized history, and
//! sink failures are logged and swallowed at the call site.

/// Out-of-order or misaddressed lifecycle events for a tool call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("tool call {0} received a delta before start")]
    NotStarted(String),

    #[error("tool call {0} was already started")]
    AlreadyStarted(String),

    #[error("tool call {0} already finished")]
    AlreadyFinished(String),

    #[error("no in-flight tool call with id {0}")]
    UnknownCall(String),
}
