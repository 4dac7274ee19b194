//! Text environments behind an HTTP server (ALFWorld, WebShop).
//!
//! The server is expected to expose two endpoints:
//! - `POST {base_url}/reset` -- body: `{"task_id": "<id>"}`
//! - `POST {base_url}/step`  -- body: `{"action": "<action string>"}`
//!
//! Both return JSON matching [`ServerResponse`].

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::task::Task;
use super::traits::{Environment, Observation, ResetOutcome, StepOutcome};

/// The JSON shape returned by the server.
#[derive(Debug, Deserialize)]
struct ServerResponse {
    observation: String,
    #[serde(default)]
    available_actions: Option<Vec<String>>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    reward: f64,
    #[serde(default)]
    task_description: Option<String>,
    #[serde(default)]
    info: Option<Value>,
}

/// A text environment that talks to an external server over HTTP.
#[derive(Debug)]
pub struct TextEnv {
    base_url: String,
    http: reqwest::Client,
    task_question: String,
    max_steps: usize,
    current_step: usize,
    started: bool,
    done: bool,
}

impl TextEnv {
    pub fn new(base_url: &str, max_steps: usize) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            task_question: String::new(),
            max_steps,
            current_step: 0,
            started: false,
            done: false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    async fn post(&self, endpoint: &str, body: &Value) -> Result<ServerResponse> {
        self.http
            .post(format!("{}/{endpoint}", self.base_url))
            .json(body)
            .send()
            .await
            .with_context(|| format!("failed to reach text env server on {endpoint}"))?
            .error_for_status()
            .with_context(|| format!("text env server rejected {endpoint}"))?
            .json()
            .await
            .with_context(|| format!("failed to parse text env {endpoint} response"))
    }

    fn observe(&self, resp: &ServerResponse) -> Observation {
        Observation {
            text: resp.observation.clone(),
            available_actions: resp.available_actions.clone(),
            task_question: self.task_question.clone(),
            ..Observation::default()
        }
    }
}

impl Environment for TextEnv {
    type Action = String;

    async fn reset(&mut self, task: &Task) -> Result<ResetOutcome> {
        self.current_step = 0;
        self.started = true;
        self.done = false;
        self.task_question = task.ques.clone();

        let resp = match self.post("reset", &json!({ "task_id": task.id })).await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(task_id = %task.id, error = %format!("{e:#}"), "text env reset failed");
                self.done = true;
                let mut observation = Observation::failure(format!("{e:#}"));
                observation.task_question = self.task_question.clone();
                return Ok(ResetOutcome {
                    observation,
                    done: true,
                    info: json!({ "task_id": task.id }),
                });
            }
        };

        if let Some(desc) = &resp.task_description {
            if self.task_question.is_empty() {
                self.task_question = desc.clone();
            }
        }
        debug!(task_id = %task.id, task = %self.task_question, "text env reset");

        Ok(ResetOutcome {
            observation: self.observe(&resp),
            done: false,
            info: resp.info.unwrap_or(Value::Null),
        })
    }

    async fn step(&mut self, action: &String) -> Result<StepOutcome> {
        if self.done {
            bail!("cannot step in a terminated episode");
        }
        if !self.started {
            bail!("step called before reset");
        }
        self.current_step += 1;
        let truncated = self.current_step >= self.max_steps;

        let outcome = match self.post("step", &json!({ "action": action })).await {
            Ok(resp) => StepOutcome {
                observation: self.observe(&resp),
                reward: resp.reward,
                done: resp.done || truncated,
                info: resp.info.unwrap_or(Value::Null),
            },
            Err(e) => {
                warn!(action = %action, error = %format!("{e:#}"), "text env step failed");
                let mut observation = Observation::failure(format!("{e:#}"));
                observation.task_question = self.task_question.clone();
                StepOutcome {
                    observation,
                    reward: 0.0,
                    done: truncated,
                    info: Value::Null,
                }
            }
        };
        self.done = outcome.done;
        Ok(outcome)
    }

    async fn close(&mut self) -> Result<()> {
        self.done = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Task {
        serde_json::from_value(json!({"task_id": 3, "intent": "put a clean mug on the desk"}))
            .unwrap()
    }

    #[test]
    fn server_response_defaults() {
        let resp: ServerResponse =
            serde_json::from_str(r#"{"observation": "You are in a kitchen."}"#).unwrap();
        assert!(!resp.done);
        assert_eq!(resp.reward, 0.0);
        assert!(resp.available_actions.is_none());
    }

    #[tokio::test]
    async fn unreachable_server_on_reset_ends_episode() {
        let mut env = TextEnv::new("http://127.0.0.1:9/", 5);
        let reset = env.reset(&task()).await.unwrap();
        assert!(reset.done);
        assert!(reset.observation.fail_obs.contains("failed to reach text env server"));
        assert_eq!(reset.observation.task_question, "put a clean mug on the desk");
        assert!(env.step(&"look".to_string()).await.is_err());
    }

    #[tokio::test]
    async fn unreachable_server_on_step_is_diagnostic() {
        let mut env = TextEnv::new("http://127.0.0.1:9", 2);
        env.started = true;
        let out = env.step(&"look".to_string()).await.unwrap();
        assert!(!out.done);
        assert!(!out.observation.fail_obs.is_empty());

        let out = env.step(&"look".to_string()).await.unwrap();
        assert!(out.done);
        assert!(env.step(&"look".to_string()).await.is_err());
    }

    #[tokio::test]
    async fn step_before_reset_errors() {
        let mut env = TextEnv::new("http://127.0.0.1:9", 2);
        assert!(env.step(&"look".to_string()).await.is_err());
    }
}
