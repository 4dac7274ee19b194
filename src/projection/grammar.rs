//! The command grammar: payload extraction plus an ordered rule table.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::action::{parse_index, Action, Direction, ScrollTarget};

/// How the command payload is located in a model response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extractor {
    /// A line starting with `Action:`; the command may sit on the next line.
    Line,
    /// The first `<action>...</action>` block.
    Tag,
}

/// What counts as a reasoning block for compliance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasoningStyle {
    /// `<think>...</think>` or a line starting with `Thought:`.
    ThinkOrThought,
    /// `<think>...</think>` only.
    Think,
}

/// One grammar rule. The builder may still reject a match (e.g. an empty
/// answer), in which case the next rule is tried.
pub struct Rule {
    pub name: &'static str,
    pattern: Regex,
    build: fn(&Captures<'_>) -> Option<Action>,
}

impl Rule {
    fn new(name: &'static str, pattern: &str, build: fn(&Captures<'_>) -> Option<Action>) -> Self {
        Self {
            name,
            pattern: Regex::new(pattern).unwrap_or_else(|e| panic!("rule '{name}': {e}")),
            build,
        }
    }

    /// Try this rule against a whole payload.
    pub fn apply(&self, payload: &str) -> Option<Action> {
        self.pattern.captures(payload).and_then(|c| (self.build)(&c))
    }
}

fn index(c: &Captures<'_>, group: usize) -> Option<usize> {
    parse_index(c.get(group)?.as_str())
}

fn text(c: &Captures<'_>, group: usize) -> Option<String> {
    Some(c.get(group)?.as_str().trim().to_string())
}

fn non_empty(c: &Captures<'_>, group: usize) -> Option<String> {
    text(c, group).filter(|s| !s.is_empty())
}

fn build_type(c: &Captures<'_>) -> Option<Action> {
    Some(Action::Type {
        element: index(c, 1)?,
        content: text(c, 2)?,
    })
}

fn build_answer(c: &Captures<'_>) -> Option<Action> {
    Some(Action::Answer {
        content: non_empty(c, 1)?,
    })
}

/// Command rules in priority order. The first rule that matches wins.
static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        Rule::new("click", r"(?i)^click\s*\[\s*([0-9]+)\s*\]$", |c| {
            Some(Action::Click {
                element: index(c, 1)?,
            })
        }),
        Rule::new(
            "type_legacy",
            r"(?is)^type\s*\[\s*([0-9]+)\s*\]\s*;\s*\[(.*?)\]$",
            build_type,
        ),
        Rule::new(
            "type",
            r"(?is)^type\s*\[\s*([0-9]+)\s*\]\s*\[\s*(.*?)\s*\]$",
            build_type,
        ),
        Rule::new(
            "scroll_legacy",
            r"(?i)^scroll\s*\[\s*(window|[0-9]+)\s*\]\s*;\s*\[(up|down)\]$",
            |c| {
                let target = match c.get(1)?.as_str() {
                    t if t.eq_ignore_ascii_case("window") => ScrollTarget::Window,
                    t => ScrollTarget::Element(parse_index(t)?),
                };
                Some(Action::Scroll {
                    target,
                    direction: Direction::parse(c.get(2)?.as_str())?,
                })
            },
        ),
        Rule::new("scroll", r"(?i)^scroll\s*\[\s*(up|down)\s*\]$", |c| {
            Some(Action::Scroll {
                target: ScrollTarget::Window,
                direction: Direction::parse(c.get(1)?.as_str())?,
            })
        }),
        Rule::new("wait", r"(?i)^wait$", |_| Some(Action::Wait)),
        Rule::new("goback", r"(?i)^goback$", |_| Some(Action::GoBack)),
        Rule::new("google", r"(?i)^google$", |_| Some(Action::Google)),
        Rule::new("answer_legacy", r"(?is)^answer\s*;\s*\[(.*?)\]$", build_answer),
        Rule::new("answer", r"(?is)^answer\s*\[\s*(.*?)\s*\]$", build_answer),
    ]
});

static ACTION_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?mi)^[ \t]*action[ \t]*:").expect("valid regex"));

static ACTION_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<action>(.*?)</action>").expect("valid regex"));

/// A configured command grammar.
#[derive(Clone, Copy)]
pub struct Grammar {
    pub extractor: Extractor,
    pub reasoning: ReasoningStyle,
    /// Also accept a JSON object payload after the command rules fail.
    pub structured: bool,
    rules: &'static [Rule],
}

impl std::fmt::Debug for Grammar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Grammar")
            .field("extractor", &self.extractor)
            .field("reasoning", &self.reasoning)
            .field("structured", &self.structured)
            .field("rules", &self.rules.iter().map(|r| r.name).collect::<Vec<_>>())
            .finish()
    }
}

impl Grammar {
    /// `Thought: ...` / `Action: <command>` responses, as prompted for browser tasks.
    pub fn line() -> Self {
        Self {
            extractor: Extractor::Line,
            reasoning: ReasoningStyle::ThinkOrThought,
            structured: false,
            rules: RULES.as_slice(),
        }
    }

    /// `<think>...</think><action>...</action>` responses, with JSON payloads allowed.
    pub fn tag() -> Self {
        Self {
            extractor: Extractor::Tag,
            reasoning: ReasoningStyle::Think,
            structured: true,
            rules: RULES.as_slice(),
        }
    }

    pub fn with_structured(mut self, structured: bool) -> Self {
        self.structured = structured;
        self
    }

    pub fn rules(&self) -> &'static [Rule] {
        self.rules
    }

    /// Locate the command payload(s) in `raw`, most specific first.
    ///
    /// The line extractor yields the first line after the label, then the
    /// full remainder when it differs, so multi-line content can still match.
    /// Returns an empty list when there is no payload.
    pub fn candidates<'a>(&self, raw: &'a str) -> Vec<&'a str> {
        match self.extractor {
            Extractor::Line => {
                let Some(m) = ACTION_LABEL.find(raw) else {
                    return Vec::new();
                };
                let rest = raw[m.end()..].trim_start();
                let first = rest.lines().next().unwrap_or("").trim();
                if first.is_empty() {
                    return Vec::new();
                }
                let full = rest.trim_end();
                if full == first {
                    vec![first]
                } else {
                    vec![first, full]
                }
            }
            Extractor::Tag => ACTION_TAG
                .captures(raw)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim())
                .filter(|p| !p.is_empty())
                .into_iter()
                .collect(),
        }
    }

    /// Match a single payload against the rule table, then (optionally) as JSON.
    pub fn parse_payload(&self, payload: &str) -> Option<Action> {
        if let Some(action) = self.rules.iter().find_map(|rule| rule.apply(payload)) {
            return Some(action);
        }
        if self.structured {
            let value: serde_json::Value = serde_json::from_str(payload).ok()?;
            return Action::from_loose_json(&value);
        }
        None
    }

    /// Extract and parse the command in `raw`. `None` means malformed.
    pub fn parse(&self, raw: &str) -> Option<Action> {
        self.candidates(raw)
            .into_iter()
            .find_map(|payload| self.parse_payload(payload))
    }
}
