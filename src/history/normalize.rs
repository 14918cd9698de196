//! Restores strict invocation→result alternation in settled history.
//!
//! An upstream model SDK may emit one assistant turn holding N invocations,
//! followed by N separate tool turns with the results — or one tool turn
//! bundling all N results. The model being replayed to expects strict
//! alternation: invocation, result, invocation, result. `normalize` rebuilds
//! that shape in one linear pass with lookahead by identifier.

use crate::history::turn::{AssistantPart, ConversationTurn, ToolResultPart};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};

/// Result of normalizing a turn list.
///
/// Incomplete pairings are expected at stream boundaries (a truncated history
/// ends on an invocation whose result never arrived), so they are reported
/// here rather than raised.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedHistory {
    pub turns: Vec<ConversationTurn>,
    /// Invocation ids that have no matching result.
    pub unpaired_invocations: Vec<String>,
    /// Result ids that match no invocation; their turns are kept at the tail.
    pub orphaned_results: Vec<String>,
}

impl NormalizedHistory {
    pub fn is_fully_paired(&self) -> bool {
        self.unpaired_invocations.is_empty() && self.orphaned_results.is_empty()
    }
}

/// Rebuild `turns` so every invocation-bearing assistant turn carries exactly
/// one invocation and is immediately followed by the one tool turn holding
/// its result.
///
/// Plain turns (user, system, text-only assistant) pass through unchanged in
/// their original relative order. Mixed assistant turns are split text-first,
/// then one turn per invocation; each invocation's result is located by
/// identifier among all results in the input — bundled result turns are split
/// the same way. The pass is idempotent and preserves the multiset of
/// invocation and result parts; nothing is dropped.
pub fn normalize(turns: &[ConversationTurn]) -> NormalizedHistory {
    // Index every result by id up front; a result may live anywhere at or
    // after its invocation, bundled or not.
    let mut results: HashMap<&str, VecDeque<&ToolResultPart>> = HashMap::new();
    let mut result_order: Vec<&str> = Vec::new();
    for turn in turns {
        if let ConversationTurn::Tool { results: parts } = turn {
            for part in parts {
                result_order.push(&part.id);
                results.entry(&part.id).or_default().push_back(part);
            }
        }
    }

    let mut out = Vec::with_capacity(turns.len());
    let mut unpaired = Vec::new();

    for turn in turns {
        match turn {
            ConversationTurn::Assistant { parts } if turn.has_invocations() => {
                let text_parts: Vec<AssistantPart> = parts
                    .iter()
                    .filter(|part| !part.is_invocation())
                    .cloned()
                    .collect();
                if !text_parts.is_empty() {
                    out.push(ConversationTurn::Assistant { parts: text_parts });
                }

                for part in parts {
                    let Some(invocation) = part.as_invocation() else {
                        continue;
                    };
                    out.push(ConversationTurn::invocation(invocation.clone()));
                    match results
                        .get_mut(invocation.id.as_str())
                        .and_then(VecDeque::pop_front)
                    {
                        Some(result) => out.push(ConversationTurn::result(result.clone())),
                        None => {
                            tracing::debug!(
                                call_id = %invocation.id,
                                tool = %invocation.name,
                                "invocation has no matching result; history may be truncated"
                            );
                            unpaired.push(invocation.id.clone());
                        }
                    }
                }
            }
            // Results re-emit next to their invocations, or at the tail below.
            ConversationTurn::Tool { .. } => {}
            other => out.push(other.clone()),
        }
    }

    // Results that matched no invocation keep their input order at the tail.
    let mut orphaned = Vec::new();
    for id in result_order {
        if let Some(result) = results.get_mut(id).and_then(VecDeque::pop_front) {
            orphaned.push(result.id.clone());
            out.push(ConversationTurn::result(result.clone()));
        }
    }

    NormalizedHistory {
        turns: out,
        unpaired_invocations: unpaired,
        orphaned_results: orphaned,
    }
}
