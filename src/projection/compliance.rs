//! Format-compliance checks applied to the raw model response.

use std::sync::LazyLock;

use regex::Regex;

use super::grammar::ReasoningStyle;

static THINK_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<think>[\s\S]*?</think>").expect("valid regex"));

static THOUGHT_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?mi)^Thought\s*:").expect("valid regex"));

/// Whether `raw` carries a reasoning block in the given style.
pub fn has_reasoning(raw: &str, style: ReasoningStyle) -> bool {
    THINK_BLOCK.is_match(raw)
        || (style == ReasoningStyle::ThinkOrThought && THOUGHT_LINE.is_match(raw))
}

/// Whether `raw` contains any CJK unified ideograph (U+4E00..=U+9FFF).
pub fn contains_cjk(raw: &str) -> bool {
    raw.chars().any(|c| ('\u{4e00}'..='\u{9fff}').contains(&c))
}

/// Both checks combined.
pub fn is_compliant(raw: &str, style: ReasoningStyle) -> bool {
    has_reasoning(raw, style) && !contains_cjk(raw)
}
