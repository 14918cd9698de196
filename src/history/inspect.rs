//! Read-only queries over turn lists.

use crate::history::turn::{AssistantPart, ConversationTurn};
use serde::Serialize;
use serde_json::Value;

/// Name of the most recently invoked tool, scanning from the end.
pub fn last_tool_used(turns: &[ConversationTurn]) -> Option<&str> {
    turns.iter().rev().find_map(|turn| {
        let ConversationTurn::Assistant { parts } = turn else {
            return None;
        };
        parts
            .iter()
            .rev()
            .find_map(|part| part.as_invocation().map(|i| i.name.as_str()))
    })
}

/// Unique tool names in first-use order.
pub fn tools_used(turns: &[ConversationTurn]) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for turn in turns {
        for invocation in turn.invocations() {
            if !seen.iter().any(|name| name == &invocation.name) {
                seen.push(invocation.name.clone());
            }
        }
    }
    seen
}

/// Whether the most recent invocation was of `tool_name`.
pub fn ends_with_tool(turns: &[ConversationTurn], tool_name: &str) -> bool {
    last_tool_used(turns) == Some(tool_name)
}

/// Arguments of the first invocation of `tool_name`, if any.
pub fn extract_tool_arguments<'a>(
    turns: &'a [ConversationTurn],
    tool_name: &str,
) -> Option<&'a Value> {
    turns
        .iter()
        .flat_map(ConversationTurn::invocations)
        .find(|invocation| invocation.name == tool_name)
        .map(|invocation| &invocation.arguments)
}

/// True for an assistant turn whose parts are all invocations.
pub fn is_invocation_only(turn: &ConversationTurn) -> bool {
    match turn {
        ConversationTurn::Assistant { parts } => {
            !parts.is_empty() && parts.iter().all(AssistantPart::is_invocation)
        }
        _ => false,
    }
}

/// Copy of `turns` without system turns.
pub fn remove_system_turns(turns: &[ConversationTurn]) -> Vec<ConversationTurn> {
    turns
        .iter()
        .filter(|turn| !matches!(turn, ConversationTurn::System { .. }))
        .cloned()
        .collect()
}

/// Aggregate shape of a conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConversationSummary {
    pub user_turns: usize,
    pub assistant_turns: usize,
    pub invocations: usize,
    pub results: usize,
    pub tools_used: Vec<String>,
}

/// Count turns and tool activity across `turns`.
pub fn conversation_summary(turns: &[ConversationTurn]) -> ConversationSummary {
    let mut summary = ConversationSummary::default();
    for turn in turns {
        match turn {
            ConversationTurn::User { .. } => summary.user_turns += 1,
            ConversationTurn::Assistant { .. } => {
                summary.assistant_turns += 1;
                for invocation in turn.invocations() {
                    summary.invocations += 1;
                    if !summary.tools_used.iter().any(|n| n == &invocation.name) {
                        summary.tools_used.push(invocation.name.clone());
                    }
                }
            }
            ConversationTurn::Tool { results } => summary.results += results.len(),
            ConversationTurn::System { .. } => {}
        }
    }
    summary
}
