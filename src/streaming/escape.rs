//! Cleanup for doubly-escaped text introduced by streaming transports.
//!
//! Model output that crosses more than one JSON encoding boundary sometimes
//! arrives with control characters escaped twice (`\\n` where `\n` was
//! meant). This module collapses those sequences back to the characters the
//! model produced.

use std::borrow::Cow;

/// Doubly-escaped sequences worth paying for a rewrite.
const PROBES: [&str; 5] = ["\\\\n", "\\\\t", "\\\\r", "\\\\\"", "\\\\\\\\"];

/// Collapse doubly-escaped control characters in `text`.
///
/// Replaces, in order: `\\n` with a newline, `\\t` with a tab, `\\r` with a
/// carriage return, `\\"` with `"`, and finally four-backslash runs with two.
/// The control and quote rules run before the backslash collapse so the
/// collapse cannot resurrect a sequence they were meant to catch.
///
/// Returns the input unchanged (no allocation) when none of the sequences are
/// present. Idempotent: normalizing already-normalized text is a no-op.
pub fn normalize_escapes(text: &str) -> Cow<'_, str> {
    if !PROBES.iter().any(|probe| text.contains(probe)) {
        return Cow::Borrowed(text);
    }

    let normalized = text
        .replace("\\\\n", "\n")
        .replace("\\\\t", "\t")
        .replace("\\\\r", "\r")
        .replace("\\\\\"", "\"")
        .replace("\\\\\\\\", "\\\\");

    Cow::Owned(normalized)
}
