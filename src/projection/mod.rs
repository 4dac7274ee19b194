//! Projection of free-form model output onto structured environment actions.
//!
//! - [`action`] -- the [`Action`] type and its wire shape.
//! - [`grammar`] -- payload extraction and the ordered command rule table.
//! - [`compliance`] -- reasoning-present and no-CJK checks.
//! - [`reasoning`] -- known/unknown summaries from `<think>` blocks.
//!
//! Projection never fails: malformed output becomes [`Action::Wait`] with a
//! `false` validity flag, and a well-formed command that breaks the format
//! rules is returned as parsed but flagged invalid.

pub mod action;
pub mod compliance;
pub mod grammar;
pub mod reasoning;

pub use action::{Action, Direction, ScrollTarget};
pub use grammar::{Extractor, Grammar, ReasoningStyle};
pub use reasoning::extract_known_unknown;

use tracing::debug;

/// Project a batch of browser-agent responses, preserving order.
pub fn project<S: AsRef<str>>(raw_texts: &[S], grammar: &Grammar) -> (Vec<Action>, Vec<bool>) {
    raw_texts
        .iter()
        .enumerate()
        .map(|(i, raw)| {
            let raw = raw.as_ref();
            match grammar.parse(raw) {
                Some(action) => {
                    let valid = compliance::is_compliant(raw, grammar.reasoning);
                    (action, valid)
                }
                None => {
                    debug!(index = i, "unparseable action, substituting wait");
                    (Action::Wait, false)
                }
            }
        })
        .unzip()
}

/// Project a batch of text-environment responses (ALFWorld, WebShop).
///
/// The command is returned verbatim from the payload. When `admissible`
/// holds a per-instance command list, a command outside it (compared
/// trimmed and case-insensitively) is flagged invalid.
pub fn project_text<S: AsRef<str>>(
    raw_texts: &[S],
    grammar: &Grammar,
    admissible: Option<&[Vec<String>]>,
) -> (Vec<String>, Vec<bool>) {
    raw_texts
        .iter()
        .enumerate()
        .map(|(i, raw)| {
            let raw = raw.as_ref();
            let Some(command) = grammar.candidates(raw).first().map(|c| c.to_string()) else {
                return (String::new(), false);
            };
            let mut valid = compliance::is_compliant(raw, grammar.reasoning);
            if let Some(allowed) = admissible.and_then(|lists| lists.get(i)) {
                let wanted = command.trim().to_lowercase();
                valid &= allowed.iter().any(|a| a.trim().to_lowercase() == wanted);
            }
            (command, valid)
        })
        .unzip()
}
