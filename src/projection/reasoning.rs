//! Known / unknown summaries pulled out of a response's reasoning block.

use std::sync::LazyLock;

use regex::Regex;

static THINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<think>(.*?)</think>").expect("valid regex"));
static KNOWN_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<known>(.*?)</known>").expect("valid regex"));
static UNKNOWN_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<unknown>(.*?)</unknown>").expect("valid regex"));
static KNOWN_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^[ \t]*known(?:[ \t]+information)?[ \t]*:[ \t]*").expect("valid regex")
});
static UNKNOWN_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^[ \t]*unknown(?:[ \t]+information)?[ \t]*:[ \t]*").expect("valid regex")
});

/// Split the reasoning of `raw` into `(known, unknown)`.
///
/// Looks inside the `<think>` block when there is one, otherwise at the whole
/// text. Explicit `<known>` / `<unknown>` tags win over `Known:` / `Unknown:`
/// header lines. Missing parts come back empty.
pub fn extract_known_unknown(raw: &str) -> (String, String) {
    let body = THINK
        .captures(raw)
        .and_then(|c| c.get(1))
        .map_or(raw, |m| m.as_str());

    let tagged = |re: &Regex| {
        re.captures(body)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
    };
    let known_tag = tagged(&KNOWN_TAG);
    let unknown_tag = tagged(&UNKNOWN_TAG);
    if known_tag.is_some() || unknown_tag.is_some() {
        return (known_tag.unwrap_or_default(), unknown_tag.unwrap_or_default());
    }

    let unknown_at = UNKNOWN_HEADER.find(body);
    let known = KNOWN_HEADER
        .find(body)
        .map(|k| {
            let end = match unknown_at {
                Some(u) if u.start() >= k.end() => u.start(),
                _ => body.len(),
            };
            body[k.end()..end].trim().to_string()
        })
        .unwrap_or_default();
    let unknown = unknown_at
        .map(|u| body[u.end()..].trim().to_string())
        .unwrap_or_default();
    (known, unknown)
}
