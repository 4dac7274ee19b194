//! WebVoyager-style browser environment.
//!
//! Each episode gets its own working directory `<download_dir>/task<id>/`
//! holding `screenshot<k>.png` (and `accessibility_tree<k>` dumps when
//! enabled), where `k` is the step counter. Element indices in actions are
//! checked against the labels on the current page before reaching the
//! driver.

pub mod driver;
pub mod mock;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use serde_json::json;
use tracing::{debug, error, info, warn};

pub use driver::{AccessibilityTree, BrowserDriver, DriverLauncher, DriverSession};

use super::task::Task;
use super::traits::{Environment, Observation, ResetOutcome, StepOutcome};
use crate::config::EnvConfig;
use crate::projection::{Action, ScrollTarget};

const GOOGLE_URL: &str = "https://www.google.com/";

const GENERIC_FAILURE: &str = "The action you have chosen cannot be executed. Please double-check \
if you have selected the wrong Numerical Label or Action or Action format. Then provide the \
revised Thought and Action.";

/// Browser environment settings.
#[derive(Debug, Clone)]
pub struct BrowserEnvConfig {
    pub download_dir: PathBuf,
    /// Observe through the accessibility tree instead of screenshots.
    pub text_only: bool,
    /// Also dump the accessibility tree in screenshot mode.
    pub save_accessibility_tree: bool,
    /// End the episode when an action fails.
    pub fail_action_terminates: bool,
    /// How long `Wait` (and page-changing actions) pause.
    pub wait: Duration,
    /// Pause after the initial navigation.
    pub settle: Duration,
}

impl Default for BrowserEnvConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("downloads"),
            text_only: false,
            save_accessibility_tree: false,
            fail_action_terminates: false,
            wait: Duration::from_secs(5),
            settle: Duration::from_secs(3),
        }
    }
}

impl From<&EnvConfig> for BrowserEnvConfig {
    fn from(config: &EnvConfig) -> Self {
        Self {
            download_dir: config.download_dir.clone(),
            text_only: config.text_only,
            save_accessibility_tree: config.save_accessibility_tree,
            fail_action_terminates: config.fail_action_terminates,
            wait: Duration::from_secs(config.wait_secs),
            settle: Duration::from_secs(config.settle_secs),
        }
    }
}

/// A browser task environment over any [`DriverLauncher`].
pub struct BrowserEnv<L: DriverLauncher> {
    launcher: L,
    config: BrowserEnvConfig,
    session: Option<DriverSession<L::Driver>>,
    task: Option<Task>,
    task_dir: PathBuf,
    timestep: usize,
    element_count: usize,
    tree: String,
    done: bool,
}

impl<L: DriverLauncher> BrowserEnv<L> {
    pub fn new(launcher: L, config: BrowserEnvConfig) -> Self {
        Self {
            launcher,
            task_dir: config.download_dir.clone(),
            config,
            session: None,
            task: None,
            timestep: 0,
            element_count: 0,
            tree: String::new(),
            done: false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn task_dir(&self) -> &std::path::Path {
        &self.task_dir
    }

    async fn release_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.release().await {
                warn!(error = %e, "failed to quit browser");
            }
        }
    }

    fn failed_reset(&mut self, task: &Task, message: String) -> ResetOutcome {
        error!(task_id = %task.id, "{message}");
        self.done = true;
        let mut observation = Observation::failure(message);
        observation.url = task.web.clone();
        observation.task_question = task.ques.clone();
        ResetOutcome {
            observation,
            done: true,
            info: reset_info(task, self.timestep),
        }
    }

    /// Re-label the page and capture the step's artifacts. Returns the
    /// observation text and a diagnostic if labelling failed.
    async fn capture(&mut self) -> (Observation, Option<String>) {
        let mut observation = Observation::default();
        let Some(driver) = self.session.as_mut().and_then(DriverSession::driver) else {
            return (observation, Some("Browser session is not available.".into()));
        };
        let k = self.timestep;
        let mut diagnostic = None;

        if self.config.text_only || self.config.save_accessibility_tree {
            match driver.accessibility_tree().await {
                Ok(tree) => {
                    let path = self.task_dir.join(format!("accessibility_tree{k}"));
                    if let Err(e) = tokio::fs::write(&path, &tree.text).await {
                        warn!(path = %path.display(), error = %e, "failed to save accessibility tree");
                    }
                    if self.config.text_only {
                        self.element_count = tree.element_count;
                    }
                    self.tree = tree.text;
                }
                Err(e) if self.config.text_only => {
                    error!(error = %e, "Driver error when obtaining accessibility tree.");
                    diagnostic = Some("Driver error when obtaining accessibility tree.".into());
                }
                Err(e) => warn!(error = %e, "failed to obtain accessibility tree"),
            }
        }
        if !self.config.text_only {
            match driver.mark_elements().await {
                Ok(n) => self.element_count = n,
                Err(e) => {
                    error!(error = %e, "Driver error when adding set-of-mark.");
                    diagnostic = Some("Driver error when adding set-of-mark.".into());
                }
            }
        }

        let img = self.task_dir.join(format!("screenshot{k}.png"));
        match driver.screenshot(&img).await {
            Ok(()) => observation.image = Some(img),
            Err(e) => warn!(error = %e, "failed to save screenshot"),
        }
        observation.url = match driver.current_url().await {
            Ok(url) => url,
            Err(_) => self.task.as_ref().map(|t| t.web.clone()).unwrap_or_default(),
        };
        observation.text = self.tree.clone();
        observation.task_question = self.task.as_ref().map(|t| t.ques.clone()).unwrap_or_default();
        (observation, diagnostic)
    }

    /// Run one action against the driver. Returns `(fail_obs, warn_obs, done)`.
    async fn apply(&mut self, action: &Action) -> (String, String, bool) {
        let wait = self.config.wait;
        let count = self.element_count;
        let mut warn_obs = String::new();
        let Some(driver) = self.session.as_mut().and_then(DriverSession::driver) else {
            return (GENERIC_FAILURE.to_string(), warn_obs, false);
        };

        let fail_obs = match action {
            Action::Click { element } => {
                let res = match check_index(*element, count) {
                    Err(msg) => Err(msg),
                    Ok(()) => driver.click(*element).await.map_err(|e| e.to_string()),
                };
                res.err()
                    .map(|e| format!("Click action failed: {e}"))
                    .unwrap_or_default()
            }
            Action::Type { element, content } => {
                let res = match check_index(*element, count) {
                    Err(msg) => Err(msg),
                    Ok(()) => driver
                        .type_text(*element, content)
                        .await
                        .map_err(|e| e.to_string()),
                };
                match res {
                    Ok(warning) => {
                        warn_obs = warning.unwrap_or_default();
                        String::new()
                    }
                    Err(e) => format!("Type action failed: {e}"),
                }
            }
            Action::Scroll { target, direction } => {
                let res = match target {
                    ScrollTarget::Element(i) => check_index(*i, count),
                    ScrollTarget::Window => Ok(()),
                };
                let res = match res {
                    Err(msg) => Err(msg),
                    Ok(()) => driver
                        .scroll(*target, *direction)
                        .await
                        .map_err(|e| e.to_string()),
                };
                res.err()
                    .map(|e| format!("Scroll action failed: {e}"))
                    .unwrap_or_default()
            }
            Action::Wait => {
                tokio::time::sleep(wait).await;
                String::new()
            }
            Action::GoBack => match driver.go_back().await {
                Ok(()) => {
                    tokio::time::sleep(wait).await;
                    String::new()
                }
                Err(e) => {
                    error!(error = %e, "driver error on goback");
                    GENERIC_FAILURE.to_string()
                }
            },
            Action::Google => match driver.navigate(GOOGLE_URL).await {
                Ok(()) => {
                    tokio::time::sleep(wait).await;
                    String::new()
                }
                Err(e) => {
                    error!(error = %e, "driver error on google");
                    GENERIC_FAILURE.to_string()
                }
            },
            Action::Answer { content } => {
                info!(answer = %content, "episode answered");
                return (String::new(), warn_obs, true);
            }
        };
        (fail_obs, warn_obs, false)
    }
}

fn check_index(element: usize, count: usize) -> Result<(), String> {
    if element >= count {
        return Err(format!(
            "Element index {element} out of range. Available elements: {count}"
        ));
    }
    Ok(())
}

/// Task id as a single path component: anything but ASCII alphanumerics,
/// `-` and `_` becomes `_`.
fn dir_safe(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn reset_info(task: &Task, iteration: usize) -> serde_json::Value {
    json!({
        "task_id": task.id,
        "task_question": task.ques,
        "task_url": task.web,
        "iteration": iteration,
    })
}

impl<L: DriverLauncher> Environment for BrowserEnv<L> {
    type Action = Action;

    async fn reset(&mut self, task: &Task) -> Result<ResetOutcome> {
        self.release_session().await;
        self.task = Some(task.clone());
        self.timestep = 0;
        self.element_count = 0;
        self.tree.clear();
        self.done = false;

        self.task_dir = self
            .config
            .download_dir
            .join(format!("task{}", dir_safe(&task.id)));
        if let Err(e) = tokio::fs::create_dir_all(&self.task_dir).await {
            let msg = format!(
                "Failed to create task directory {}: {e}",
                self.task_dir.display()
            );
            return Ok(self.failed_reset(task, msg));
        }

        let driver = match self.launcher.launch().await {
            Ok(driver) => driver,
            Err(e) => return Ok(self.failed_reset(task, format!("Browser launch failed: {e}"))),
        };
        let session = self.session.insert(DriverSession::new(driver));
        if let Some(driver) = session.driver() {
            if let Err(e) = driver.navigate(&task.web).await {
                let msg = format!("Navigation to {} failed: {e}", task.web);
                return Ok(self.failed_reset(task, msg));
            }
        }
        tokio::time::sleep(self.config.settle).await;

        let (mut observation, diagnostic) = self.capture().await;
        if let Some(msg) = diagnostic {
            observation.fail_obs = msg;
        }
        debug!(task_id = %task.id, dir = %self.task_dir.display(), "browser env reset");

        Ok(ResetOutcome {
            observation,
            done: false,
            info: reset_info(task, self.timestep),
        })
    }

    async fn step(&mut self, action: &Action) -> Result<StepOutcome> {
        if self.done {
            bail!("cannot step in a terminated episode");
        }
        if self.task.is_none() {
            bail!("step called before reset");
        }
        self.timestep += 1;

        let (mut fail_obs, warn_obs, mut done) = self.apply(action).await;
        if !fail_obs.is_empty() {
            debug!(action = %action, fail = %fail_obs, "action failed");
            if self.config.fail_action_terminates {
                done = true;
            }
        }

        let (mut observation, diagnostic) = self.capture().await;
        if fail_obs.is_empty() {
            if let Some(msg) = diagnostic {
                fail_obs = msg;
            }
        }
        observation.fail_obs = fail_obs;
        observation.warn_obs = warn_obs;

        let reward = 0.0;
        self.done = done;
        Ok(StepOutcome {
            observation,
            reward,
            done,
            info: json!({
                "iteration": self.timestep,
                "action_key": action.key(),
                "reward": reward,
                "done": done,
            }),
        })
    }

    async fn close(&mut self) -> Result<()> {
        self.done = true;
        match self.session.take() {
            Some(mut session) => session.release().await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::Direction;
    use mock::ScriptedLauncher;

    fn task(id: &str) -> Task {
        Task {
            id: id.into(),
            ques: "Find the cheapest mug".into(),
            web: "http://shop.test".into(),
            web_name: "Shop".into(),
            extra: Default::default(),
        }
    }

    fn config(dir: &std::path::Path) -> BrowserEnvConfig {
        BrowserEnvConfig {
            download_dir: dir.to_path_buf(),
            wait: Duration::ZERO,
            settle: Duration::ZERO,
            ..BrowserEnvConfig::default()
        }
    }

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("webgym-browser-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn reset_and_step_write_artifacts() {
        let dir = temp_dir();
        let mut env = BrowserEnv::new(ScriptedLauncher::new(4), config(&dir));

        let reset = env.reset(&task("7")).await.unwrap();
        assert!(!reset.done);
        assert_eq!(reset.observation.url, "http://shop.test");
        assert_eq!(reset.info["task_id"], "7");
        assert_eq!(reset.info["iteration"], 0);
        assert!(dir.join("task7/screenshot0.png").exists());

        let out = env.step(&Action::Click { element: 2 }).await.unwrap();
        assert!(!out.done);
        assert!(out.observation.fail_obs.is_empty());
        assert_eq!(out.observation.url, "http://shop.test/link2");
        assert_eq!(out.info["action_key"], "click");
        assert_eq!(out.info["iteration"], 1);
        assert_eq!(
            out.observation.image.as_deref(),
            Some(dir.join("task7/screenshot1.png").as_path())
        );
        assert!(dir.join("task7/screenshot1.png").exists());

        env.close().await.unwrap();
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn out_of_range_element_is_reported() {
        let dir = temp_dir();
        let mut env = BrowserEnv::new(ScriptedLauncher::new(3), config(&dir));
        env.reset(&task("1")).await.unwrap();

        let out = env.step(&Action::Click { element: 3 }).await.unwrap();
        assert_eq!(
            out.observation.fail_obs,
            "Click action failed: Element index 3 out of range. Available elements: 3"
        );
        assert!(!out.done);
        assert_eq!(out.observation.url, "http://shop.test");

        let out = env
            .step(&Action::Scroll {
                target: ScrollTarget::Element(9),
                direction: Direction::Down,
            })
            .await
            .unwrap();
        assert!(out.observation.fail_obs.starts_with("Scroll action failed: "));

        let out = env.step(&Action::GoBack).await.unwrap();
        assert_eq!(out.observation.fail_obs, GENERIC_FAILURE);

        env.close().await.unwrap();
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn oversized_index_is_out_of_range() {
        let dir = temp_dir();
        let mut env = BrowserEnv::new(ScriptedLauncher::new(3), config(&dir));
        env.reset(&task("1")).await.unwrap();
        let out = env
            .step(&Action::Click {
                element: usize::MAX,
            })
            .await
            .unwrap();
        assert_eq!(
            out.observation.fail_obs,
            format!(
                "Click action failed: Element index {} out of range. Available elements: 3",
                usize::MAX
            )
        );
        env.close().await.unwrap();
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn task_dir_stays_under_download_dir() {
        let dir = temp_dir();
        let mut env = BrowserEnv::new(ScriptedLauncher::new(2), config(&dir));
        env.reset(&task("../../etc/x")).await.unwrap();
        assert_eq!(env.task_dir(), dir.join("task______etc_x").as_path());
        assert!(dir.join("task______etc_x/screenshot0.png").exists());
        assert_eq!(dir_safe("Allrecipes--0"), "Allrecipes--0");
        env.close().await.unwrap();
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn failed_action_can_terminate() {
        let dir = temp_dir();
        let cfg = BrowserEnvConfig {
            fail_action_terminates: true,
            ..config(&dir)
        };
        let mut env = BrowserEnv::new(ScriptedLauncher::new(2), cfg);
        env.reset(&task("1")).await.unwrap();
        let out = env.step(&Action::Click { element: 5 }).await.unwrap();
        assert!(out.done);
        assert!(env.is_done());
        env.close().await.unwrap();
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn answer_ends_episode() {
        let dir = temp_dir();
        let mut env = BrowserEnv::new(ScriptedLauncher::new(2), config(&dir));
        env.reset(&task("1")).await.unwrap();

        let out = env
            .step(&Action::Answer {
                content: "$4.99".into(),
            })
            .await
            .unwrap();
        assert!(out.done);
        assert_eq!(out.info["done"], true);
        assert!(env.step(&Action::Wait).await.is_err());

        env.close().await.unwrap();
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn step_before_reset_errors() {
        let dir = temp_dir();
        let mut env = BrowserEnv::new(ScriptedLauncher::new(2), config(&dir));
        assert!(env.step(&Action::Wait).await.is_err());
    }

    #[tokio::test]
    async fn launch_and_navigation_failures_end_episode() {
        let dir = temp_dir();
        let mut env = BrowserEnv::new(ScriptedLauncher::new(2).failing_launch(), config(&dir));
        let reset = env.reset(&task("1")).await.unwrap();
        assert!(reset.done);
        assert!(reset
            .observation
            .fail_obs
            .starts_with("Browser launch failed"));

        let launcher = ScriptedLauncher::new(2).failing_navigation();
        let mut env = BrowserEnv::new(launcher.clone(), config(&dir));
        let reset = env.reset(&task("2")).await.unwrap();
        assert!(reset.done);
        assert!(reset.observation.fail_obs.starts_with("Navigation to http://shop.test failed"));
        env.close().await.unwrap();
        assert_eq!(launcher.quit_count(), 1);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn marking_failure_is_diagnostic_only() {
        let dir = temp_dir();
        let mut env = BrowserEnv::new(ScriptedLauncher::new(2).failing_marking(), config(&dir));
        let reset = env.reset(&task("1")).await.unwrap();
        assert!(!reset.done);
        assert_eq!(
            reset.observation.fail_obs,
            "Driver error when adding set-of-mark."
        );
        env.close().await.unwrap();
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn typing_into_non_textbox_warns() {
        let dir = temp_dir();
        let mut env = BrowserEnv::new(ScriptedLauncher::new(3), config(&dir));
        env.reset(&task("1")).await.unwrap();

        let out = env
            .step(&Action::Type {
                element: 0,
                content: "blue mug".into(),
            })
            .await
            .unwrap();
        assert!(out.observation.warn_obs.is_empty());
        assert_eq!(out.observation.url, "http://shop.test?q=blue+mug");

        let out = env
            .step(&Action::Type {
                element: 1,
                content: "x".into(),
            })
            .await
            .unwrap();
        assert!(out.observation.warn_obs.starts_with("note: The web element"));

        env.close().await.unwrap();
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn text_only_observes_the_tree() {
        let dir = temp_dir();
        let cfg = BrowserEnvConfig {
            text_only: true,
            ..config(&dir)
        };
        let mut env = BrowserEnv::new(ScriptedLauncher::new(2), cfg);
        let reset = env.reset(&task("5")).await.unwrap();
        assert!(reset.observation.text.starts_with("RootWebArea 'http://shop.test'"));
        assert!(dir.join("task5/accessibility_tree0").exists());

        env.step(&Action::Google).await.unwrap();
        let out = env.step(&Action::GoBack).await.unwrap();
        assert!(out.observation.fail_obs.is_empty());
        assert_eq!(out.observation.url, "http://shop.test");

        env.close().await.unwrap();
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn sessions_are_released() {
        let dir = temp_dir();
        let launcher = ScriptedLauncher::new(2);
        let mut env = BrowserEnv::new(launcher.clone(), config(&dir));

        env.reset(&task("1")).await.unwrap();
        env.reset(&task("2")).await.unwrap();
        assert_eq!(launcher.launch_count(), 2);
        assert_eq!(launcher.quit_count(), 1);

        env.close().await.unwrap();
        env.close().await.unwrap();
        assert_eq!(launcher.quit_count(), 2);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
