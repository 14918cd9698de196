//! Conversation-history side: turn types, the alternation normalizer, and
//! read-only inspection helpers.

pub mod inspect;
pub mod normalize;
pub mod turn;

pub use inspect::{
    conversation_summary, ends_with_tool, extract_tool_arguments, is_invocation_only,
    last_tool_used, remove_system_turns, tools_used, ConversationSummary,
};
pub use normalize::{normalize, NormalizedHistory};
pub use turn::{AssistantPart, ConversationTurn, ToolInvocation, ToolResultPart};
