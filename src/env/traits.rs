//! Core environment trait and shared types.
//!
//! Every task environment (browser, ALFWorld, WebShop, ...) implements the
//! [`Environment`] trait so that the batch layer can drive instances
//! uniformly.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::task::Task;

/// What an instance shows after a reset or step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Page/state text, or the accessibility tree in text-only mode.
    pub text: String,
    /// Screenshot of the current viewpoint, when one was saved.
    pub image: Option<PathBuf>,
    pub url: String,
    /// Why the last action could not be applied. Shown to the model verbatim.
    pub fail_obs: String,
    /// Non-fatal note about the last action.
    pub warn_obs: String,
    /// Extra environment output (e.g. downloaded document summaries).
    pub aux_obs: String,
    /// Legal commands, for environments that enumerate them.
    pub available_actions: Option<Vec<String>>,
    pub task_question: String,
}

impl Observation {
    /// An observation that only carries a diagnostic.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            fail_obs: message.into(),
            ..Self::default()
        }
    }

    /// Screenshot path as a string, for history records.
    pub fn image_path(&self) -> Option<String> {
        self.image.as_ref().map(|p| p.display().to_string())
    }
}

/// Result of [`Environment::reset`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResetOutcome {
    pub observation: Observation,
    /// Set when the episode could not be started.
    pub done: bool,
    pub info: serde_json::Value,
}

/// Result of [`Environment::step`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub observation: Observation,
    pub reward: f64,
    /// Terminal; reported once per episode.
    pub done: bool,
    pub info: serde_json::Value,
}

/// The core environment trait.
///
/// Failures to apply an action are reported in the observation's
/// `fail_obs` rather than as errors. An `Err` means the instance itself is
/// unusable (stepping a finished episode, stepping before reset, ...).
#[allow(async_fn_in_trait)]
pub trait Environment: Send {
    /// The structured action this environment consumes.
    type Action: Sync;

    /// Start a new episode for `task`, releasing any previous one.
    async fn reset(&mut self, task: &Task) -> anyhow::Result<ResetOutcome>;

    /// Apply one action.
    async fn step(&mut self, action: &Self::Action) -> anyhow::Result<StepOutcome>;

    /// Release external resources. Safe to call more than once.
    async fn close(&mut self) -> anyhow::Result<()>;
}
