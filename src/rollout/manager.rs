//! Browser-agent rollout: projection, dispatch and history in one loop.

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::EnvConfig;
use crate::dispatch::BatchEnv;
use crate::env::browser::{BrowserEnv, BrowserEnvConfig, DriverLauncher};
use crate::env::{Observation, ResetOutcome, TaskSet};
use crate::error::Result;
use crate::memory::{HistoryStore, RecordBatch};
use crate::model::prompt::{browser_system_prompt, intro_text, observation_text};
use crate::model::Message;
use crate::projection::{project, Action, Grammar};

/// Per-instance results of one rollout step, in instance order.
#[derive(Debug, Clone, Default)]
pub struct StepBatch {
    /// Environment reward minus the invalid-action penalty.
    pub rewards: Vec<f64>,
    pub dones: Vec<bool>,
    /// Whether each response parsed and passed the format checks.
    pub valid: Vec<bool>,
    pub infos: Vec<Value>,
}

/// Drives a batch of browser environments from raw model responses.
pub struct WebAgentRollout<L: DriverLauncher> {
    envs: BatchEnv<BrowserEnv<L>>,
    memory: HistoryStore,
    grammar: Grammar,
    config: EnvConfig,
    traj_uids: Vec<String>,
}

impl<L: DriverLauncher + Clone> WebAgentRollout<L> {
    /// Build `env_num * group_n` browser environments sharing `launcher`.
    ///
    /// Each instance works under its own `<download_dir>/env<i>/` so that
    /// group members on the same task do not overwrite each other's
    /// screenshots.
    pub fn new(launcher: L, tasks: TaskSet, config: EnvConfig) -> Result<Self> {
        let instances = (0..config.num_instances())
            .map(|i| {
                let mut env_config = BrowserEnvConfig::from(&config);
                env_config.download_dir = config.download_dir.join(format!("env{i}"));
                BrowserEnv::new(launcher.clone(), env_config)
            })
            .collect();
        let envs = BatchEnv::new(
            instances,
            tasks,
            config.env_num,
            config.group_n,
            config.seed,
            Duration::from_secs(config.step_timeout_secs),
        )?;
        Ok(Self {
            envs,
            memory: HistoryStore::with_window(config.window),
            grammar: Grammar::line(),
            config,
            traj_uids: Vec::new(),
        })
    }
}

impl<L: DriverLauncher> WebAgentRollout<L> {
    pub fn with_grammar(mut self, grammar: Grammar) -> Self {
        self.grammar = grammar;
        self
    }

    pub fn num_envs(&self) -> usize {
        self.envs.num_envs()
    }

    /// Trajectory id of each instance; group members share one.
    pub fn traj_uids(&self) -> &[String] {
        &self.traj_uids
    }

    pub fn memory(&self) -> &HistoryStore {
        &self.memory
    }

    /// Which instances have finished their episode.
    pub fn finished(&self) -> &[bool] {
        self.envs.finished()
    }

    /// Start new episodes and record each task introduction.
    pub async fn reset(&mut self) -> Result<Vec<ResetOutcome>> {
        let outcomes = self.envs.reset().await?;
        let n = outcomes.len();
        self.memory.reset(n);

        self.traj_uids = (0..self.config.env_num)
            .flat_map(|_| {
                let uid = Uuid::new_v4().to_string();
                std::iter::repeat(uid).take(self.config.group_n)
            })
            .collect();

        let tasks = self.envs.assigned_tasks();
        let user_text: Vec<String> = tasks
            .iter()
            .zip(&outcomes)
            .map(|(task, out)| intro_text(task, &out.observation, self.config.text_only))
            .collect();
        let observations: Vec<&Observation> = outcomes.iter().map(|o| &o.observation).collect();
        self.memory
            .store(records(user_text, vec![Value::Null; n], vec![Value::Null; n], &observations))?;

        info!(instances = n, "rollout reset");
        Ok(outcomes)
    }

    /// Project `raw_texts`, step every instance and record the results.
    pub async fn step<S: AsRef<str>>(&mut self, raw_texts: &[S]) -> Result<StepBatch> {
        let (actions, valid) = project(raw_texts, &self.grammar);
        let was_finished = self.envs.finished().to_vec();
        let outcomes = self.envs.step(&actions).await?;

        // Finished instances never saw this response; no penalty for them.
        let penalty = self.config.invalid_action_penalty;
        let rewards: Vec<f64> = outcomes
            .iter()
            .zip(valid.iter().zip(&was_finished))
            .map(|(out, (&ok, &finished))| {
                if ok || finished {
                    out.reward
                } else {
                    out.reward - penalty
                }
            })
            .collect();

        let user_text: Vec<String> = outcomes
            .iter()
            .map(|o| observation_text(&o.observation, self.config.text_only))
            .collect();
        let assistant_text: Vec<Value> = raw_texts
            .iter()
            .map(|r| Value::from(r.as_ref()))
            .collect();
        let action_json: Vec<Value> = actions.iter().map(action_value).collect();
        let observations: Vec<&Observation> = outcomes.iter().map(|o| &o.observation).collect();
        self.memory
            .store(records(user_text, assistant_text, action_json, &observations))?;

        let invalid = valid.iter().filter(|v| !**v).count();
        debug!(step = self.memory.len() - 1, invalid, "rollout step");

        Ok(StepBatch {
            rewards,
            dones: outcomes.iter().map(|o| o.done).collect(),
            valid,
            infos: outcomes.into_iter().map(|o| o.info).collect(),
        })
    }

    /// Message lists for the next inference call, system prompt first.
    pub fn prompts(&self) -> Vec<Vec<Message>> {
        let system = Message::system(browser_system_prompt(self.config.text_only));
        self.memory
            .build_message_history(self.config.history_length, self.config.max_images)
            .into_iter()
            .map(|history| {
                let mut messages = Vec::with_capacity(history.len() + 1);
                messages.push(system.clone());
                messages.extend(history);
                messages
            })
            .collect()
    }

    /// Recent observation/action summaries, for logging.
    pub fn summaries(&self) -> Result<Vec<String>> {
        let (contexts, _) = self
            .memory
            .fetch(self.config.history_length, "user_text", "action")?;
        Ok(contexts)
    }

    pub async fn close(&mut self) {
        self.envs.close().await;
    }

    pub fn is_closed(&self) -> bool {
        self.envs.is_closed()
    }
}

fn action_value(action: &Action) -> Value {
    serde_json::to_value(action).unwrap_or_default()
}

fn records(
    user_text: Vec<String>,
    assistant_text: Vec<Value>,
    action: Vec<Value>,
    observations: &[&Observation],
) -> RecordBatch {
    RecordBatch::new()
        .column("user_text", user_text)
        .column("assistant_text", assistant_text)
        .column("image_path", observations.iter().map(|o| o.image_path()))
        .column("action", action)
        .column("url", observations.iter().map(|o| o.url.clone()))
        .column("fail_obs", observations.iter().map(|o| o.fail_obs.clone()))
        .column("warn_obs", observations.iter().map(|o| o.warn_obs.clone()))
        .column("aux_obs", observations.iter().map(|o| o.aux_obs.clone()))
}
