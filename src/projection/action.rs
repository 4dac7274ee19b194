//! Structured browser actions and their wire representation.

use std::fmt;
use std::num::IntErrorKind;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

/// Scroll direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }

    /// Parse `up` / `down` case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" => Some(Self::Up),
            "down" => Some(Self::Down),
            _ => None,
        }
    }
}

/// What a scroll applies to. The window is encoded as element `-1` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollTarget {
    Window,
    Element(usize),
}

/// A fully-formed browser action.
///
/// Every variant carries exactly the payload it needs, so a half-parsed
/// action cannot be represented.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "WireAction", try_from = "WireAction")]
pub enum Action {
    Click { element: usize },
    Type { element: usize, content: String },
    Scroll { target: ScrollTarget, direction: Direction },
    Wait,
    GoBack,
    Google,
    Answer { content: String },
}

impl Action {
    /// The `action_key` used on the wire.
    pub fn key(&self) -> &'static str {
        match self {
            Self::Click { .. } => "click",
            Self::Type { .. } => "type",
            Self::Scroll { .. } => "scroll",
            Self::Wait => "wait",
            Self::GoBack => "goback",
            Self::Google => "google",
            Self::Answer { .. } => "answer",
        }
    }

    /// Build an action from a loosely-keyed JSON object.
    ///
    /// Accepts the aliases `action` for `action_key`, `idx` / `number` for
    /// `element`, `direction` for `content` and `answer` for
    /// `answer_content`. Returns `None` when any required field is missing or
    /// has the wrong type.
    pub fn from_loose_json(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let field = |names: &[&str]| names.iter().find_map(|n| obj.get(*n));

        let key = field(&["action_key", "action"])?.as_str()?.trim().to_lowercase();
        let element = field(&["element", "idx", "number"]);
        let content = field(&["content", "direction"]);
        let answer = field(&["answer_content", "answer"]);

        match key.as_str() {
            "click" => Some(Self::Click {
                element: coerce_index(element?)?,
            }),
            "type" => Some(Self::Type {
                element: coerce_index(element?)?,
                content: content?.as_str()?.trim().to_string(),
            }),
            "scroll" => {
                let direction = Direction::parse(content?.as_str()?)?;
                let target = match element {
                    None | Some(Value::Null) => ScrollTarget::Window,
                    Some(Value::String(s)) if s.trim().eq_ignore_ascii_case("window") => {
                        ScrollTarget::Window
                    }
                    Some(v) if v.as_i64() == Some(-1) => ScrollTarget::Window,
                    Some(v) => ScrollTarget::Element(coerce_index(v)?),
                };
                Some(Self::Scroll { target, direction })
            }
            "wait" => Some(Self::Wait),
            "goback" => Some(Self::GoBack),
            "google" => Some(Self::Google),
            "answer" => {
                let content = answer?.as_str()?.trim();
                (!content.is_empty()).then(|| Self::Answer {
                    content: content.to_string(),
                })
            }
            _ => None,
        }
    }
}

/// Parse an element index from a digit string. Values too large for
/// `usize` saturate; the environment rejects them as out of range.
pub(crate) fn parse_index(digits: &str) -> Option<usize> {
    match digits.trim().parse::<usize>() {
        Ok(i) => Some(i),
        Err(e) if *e.kind() == IntErrorKind::PosOverflow => Some(usize::MAX),
        Err(_) => None,
    }
}

/// Non-negative integer, either as a JSON number or a digit string.
fn coerce_index(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) => match n.as_u64() {
            Some(i) => Some(usize::try_from(i).unwrap_or(usize::MAX)),
            // Integers beyond u64 arrive as floats.
            None => n
                .as_f64()
                .filter(|f| *f >= u64::MAX as f64)
                .map(|_| usize::MAX),
        },
        Value::String(s) => parse_index(s),
        _ => None,
    }
}

impl fmt::Display for Action {
    /// Renders the action in the command syntax the model is prompted with.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Click { element } => write!(f, "Click [{element}]"),
            Self::Type { element, content } => write!(f, "Type [{element}] [{content}]"),
            Self::Scroll {
                target: ScrollTarget::Window,
                direction,
            } => write!(f, "Scroll [{}]", direction.as_str()),
            Self::Scroll {
                target: ScrollTarget::Element(i),
                direction,
            } => write!(f, "Scroll [{i}]; [{}]", direction.as_str()),
            Self::Wait => f.write_str("Wait"),
            Self::GoBack => f.write_str("GoBack"),
            Self::Google => f.write_str("Google"),
            Self::Answer { content } => write!(f, "ANSWER [{content}]"),
        }
    }
}

// ---------------------------------------------------------------------------
// Wire shape
// ---------------------------------------------------------------------------

/// `{"action_key", "element", "content", "answer_content"}` as consumed by
/// the browser environment workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireAction {
    action_key: String,
    /// Element index, or -1 for a window scroll.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    element: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    answer_content: Option<String>,
}

impl From<Action> for WireAction {
    fn from(action: Action) -> Self {
        let mut wire = WireAction {
            action_key: action.key().to_string(),
            element: None,
            content: None,
            answer_content: None,
        };
        match action {
            Action::Click { element } => wire.element = Some(wire_index(element)),
            Action::Type { element, content } => {
                wire.element = Some(wire_index(element));
                wire.content = Some(content);
            }
            Action::Scroll { target, direction } => {
                wire.element = Some(match target {
                    ScrollTarget::Window => Number::from(-1),
                    ScrollTarget::Element(i) => wire_index(i),
                });
                wire.content = Some(direction.as_str().to_string());
            }
            Action::Answer { content } => wire.answer_content = Some(content),
            Action::Wait | Action::GoBack | Action::Google => {}
        }
        wire
    }
}

fn wire_index(element: usize) -> Number {
    Number::from(element as u64)
}

impl TryFrom<WireAction> for Action {
    type Error = String;

    fn try_from(wire: WireAction) -> Result<Self, Self::Error> {
        let value = serde_json::to_value(&wire).map_err(|e| e.to_string())?;
        Action::from_loose_json(&value)
            .ok_or_else(|| format!("incomplete '{}' action", wire.action_key))
    }
}
