//! JSONL loaders for offline batch inference inputs.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use super::message::{Message, Role};

/// One step of a recorded trajectory, ready to send to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepPrompt {
    pub traj_uid: Value,
    pub step: Value,
    pub messages: Vec<Message>,
}

/// Split a prompt whose role markers (`system`, `user`, `assistant`) sit on
/// their own lines.
///
/// Text before the first marker is dropped, as are messages that end up
/// empty. A prompt without any marker becomes a single user message.
pub fn parse_role_tagged_prompt(prompt: &str) -> Vec<Message> {
    let mut messages = Vec::new();
    let mut current: Option<Role> = None;
    let mut buffer: Vec<&str> = Vec::new();

    let mut flush = |role: Option<Role>, lines: &mut Vec<&str>| {
        let content = lines.join("\n");
        let content = content.trim();
        if let Some(role) = role {
            if !content.is_empty() {
                messages.push(Message::new(role, content));
            }
        }
        lines.clear();
    };

    for line in prompt.lines() {
        match Role::from_tag(line.trim()) {
            Some(role) => {
                flush(current, &mut buffer);
                current = Some(role);
            }
            None => buffer.push(line),
        }
    }
    let tagged = current.is_some();
    flush(current, &mut buffer);

    if !tagged && !prompt.trim().is_empty() {
        messages.push(Message::user(prompt.trim()));
    }
    messages
}

/// Read newline-delimited JSON objects, skipping blank, invalid and
/// non-object lines.
pub fn read_jsonl(path: &Path) -> Result<Vec<Map<String, Value>>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(parse_jsonl(&text))
}

pub(crate) fn parse_jsonl(text: &str) -> Vec<Map<String, Value>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(i, line)| match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(obj)) => Some(obj),
            Ok(_) => {
                debug!(line = i + 1, "skipping non-object JSONL line");
                None
            }
            Err(e) => {
                debug!(line = i + 1, error = %e, "skipping invalid JSONL line");
                None
            }
        })
        .collect()
}

/// Flatten `{"traj_uid", "steps": [{"step", "prompt"}]}` records into step prompts.
pub fn steps_from_jsonl(path: &Path) -> Result<Vec<StepPrompt>> {
    Ok(steps_from_records(read_jsonl(path)?))
}

fn steps_from_records(records: Vec<Map<String, Value>>) -> Vec<StepPrompt> {
    let mut out = Vec::new();
    for mut record in records {
        let traj_uid = record.remove("traj_uid").unwrap_or(Value::Null);
        let Some(Value::Array(steps)) = record.remove("steps") else {
            continue;
        };
        for step in steps {
            let Value::Object(step) = step else { continue };
            let Some(prompt) = step.get("prompt").and_then(Value::as_str) else {
                continue;
            };
            out.push(StepPrompt {
                traj_uid: traj_uid.clone(),
                step: step.get("step").cloned().unwrap_or(Value::Null),
                messages: parse_role_tagged_prompt(prompt),
            });
        }
    }
    out
}
