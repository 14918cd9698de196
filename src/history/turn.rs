//! Conversation turn types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A request, embedded in a model's output, to run a named tool with
/// structured arguments. The `id` is opaque and unique within one
/// conversation; it pairs the invocation with its result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolInvocation {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// The outcome of one tool invocation, paired by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultPart {
    pub id: String,
    pub content: Value,
}

impl ToolResultPart {
    pub fn new(id: impl Into<String>, content: Value) -> Self {
        Self {
            id: id.into(),
            content,
        }
    }
}

/// One piece of an assistant turn: prose or a tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum AssistantPart {
    Text(String),
    Invocation(ToolInvocation),
}

impl AssistantPart {
    pub fn is_invocation(&self) -> bool {
        matches!(self, Self::Invocation(_))
    }

    pub fn as_invocation(&self) -> Option<&ToolInvocation> {
        match self {
            Self::Invocation(invocation) => Some(invocation),
            Self::Text(_) => None,
        }
    }
}

/// One settled turn of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ConversationTurn {
    User { content: String },
    System { content: String },
    Assistant { parts: Vec<AssistantPart> },
    Tool { results: Vec<ToolResultPart> },
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::Assistant {
            parts: vec![AssistantPart::Text(text.into())],
        }
    }

    pub fn assistant(parts: Vec<AssistantPart>) -> Self {
        Self::Assistant { parts }
    }

    /// Assistant turn carrying a single invocation.
    pub fn invocation(invocation: ToolInvocation) -> Self {
        Self::Assistant {
            parts: vec![AssistantPart::Invocation(invocation)],
        }
    }

    pub fn tool(results: Vec<ToolResultPart>) -> Self {
        Self::Tool { results }
    }

    /// Tool turn carrying a single result.
    pub fn result(result: ToolResultPart) -> Self {
        Self::Tool {
            results: vec![result],
        }
    }

    /// The invocations this turn carries, in order (empty for non-assistant
    /// turns).
    pub fn invocations(&self) -> impl Iterator<Item = &ToolInvocation> {
        let parts: &[AssistantPart] = match self {
            Self::Assistant { parts } => parts,
            _ => &[],
        };
        parts.iter().filter_map(AssistantPart::as_invocation)
    }

    pub fn has_invocations(&self) -> bool {
        self.invocations().next().is_some()
    }
}
