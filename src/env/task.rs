//! Task records and task sets loaded from newline-delimited JSON.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use crate::util::replace_ip_and_port;

/// One task. WebVoyager rows use `ques` / `web`, WebArena rows use
/// `intent` / `start_url`; both are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(alias = "task_id", deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, alias = "intent")]
    pub ques: String,
    #[serde(default, alias = "start_url")]
    pub web: String,
    #[serde(default)]
    pub web_name: String,
    /// Everything else in the row (answers, eval configs, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn string_or_number<'de, D: Deserializer<'de>>(de: D) -> std::result::Result<String, D::Error> {
    match Value::deserialize(de)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "task id must be a string or number, got {other}"
        ))),
    }
}

/// An indexed collection of tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskSet {
    tasks: Vec<Task>,
}

impl TaskSet {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self { tasks }
    }

    /// Load one task per non-blank line.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read tasks from {}", path.display()))?;
        let tasks = text
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| {
                serde_json::from_str::<Task>(line)
                    .with_context(|| format!("{}:{}: invalid task", path.display(), i + 1))
            })
            .collect::<Result<Vec<_>>>()?;
        info!(path = %path.display(), tasks = tasks.len(), "loaded task set");
        Ok(Self { tasks })
    }

    /// Rewrite every task's entry URL to the `host:port` of `target_url`.
    pub fn rebase_hosts(&mut self, target_url: &str) {
        for task in &mut self.tasks {
            task.web = replace_ip_and_port(target_url, &task.web);
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&Task> {
        self.tasks.get(idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn webvoyager_row() {
        let task: Task = serde_json::from_value(json!({
            "web_name": "Allrecipes",
            "id": "Allrecipes--0",
            "ques": "Provide a recipe for vegetarian lasagna",
            "web": "https://www.allrecipes.com/"
        }))
        .unwrap();
        assert_eq!(task.id, "Allrecipes--0");
        assert_eq!(task.web, "https://www.allrecipes.com/");
        assert!(task.extra.is_empty());
    }

    #[test]
    fn webarena_row_uses_aliases() {
        let task: Task = serde_json::from_value(json!({
            "task_id": 27,
            "intent": "Tell me the count of comments",
            "start_url": "http://WEBARENA_HOST:PORT/forums",
            "sites": ["reddit"]
        }))
        .unwrap();
        assert_eq!(task.id, "27");
        assert_eq!(task.ques, "Tell me the count of comments");
        assert_eq!(task.extra["sites"], json!(["reddit"]));
    }

    #[test]
    fn load_and_rebase() {
        let dir = std::env::temp_dir().join(format!("webgym-tasks-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("test.jsonl");
        std::fs::write(
            &path,
            "{\"id\": 1, \"ques\": \"q\", \"web\": \"http://WEBARENA_HOST:PORT/a\"}\n\n\
             {\"id\": 2, \"ques\": \"r\", \"web\": \"http://WEBARENA_HOST:PORT/b?x=1\"}\n",
        )
        .unwrap();

        let mut set = TaskSet::load(&path).unwrap();
        assert_eq!(set.len(), 2);
        set.rebase_hosts("http://10.0.0.5:7770");
        let urls: Vec<&str> = set.iter().map(|t| t.web.as_str()).collect();
        assert_eq!(urls, ["http://10.0.0.5:7770/a", "http://10.0.0.5:7770/b?x=1"]);

        std::fs::write(&path, "{\"id\": 1}\n{oops\n").unwrap();
        let err = TaskSet::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains(":2: invalid task"));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
