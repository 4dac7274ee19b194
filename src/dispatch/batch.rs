//! A fixed-size batch of environment instances stepped in lock-step.

use std::time::Duration;

use futures::future::join_all;
use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::env::{Environment, Observation, ResetOutcome, StepOutcome, Task, TaskSet};
use crate::error::{HarnessError, Result};

/// `env_num * group_n` environment instances over one task set.
///
/// Every call fans out to all instances concurrently and returns once each
/// has answered (or timed out), with results in instance order. Instance
/// failures never fail the batch: they come back as `done` outcomes with
/// the error text in `fail_obs`.
pub struct BatchEnv<E: Environment> {
    instances: Vec<E>,
    tasks: TaskSet,
    env_num: usize,
    group_n: usize,
    rng: StdRng,
    step_timeout: Duration,
    assigned: Vec<usize>,
    last: Vec<Observation>,
    finished: Vec<bool>,
    closed: bool,
}

impl<E: Environment> BatchEnv<E> {
    /// Wrap `instances`, which must number exactly `env_num * group_n`.
    pub fn new(
        instances: Vec<E>,
        tasks: TaskSet,
        env_num: usize,
        group_n: usize,
        seed: u64,
        step_timeout: Duration,
    ) -> Result<Self> {
        let expected = env_num * group_n;
        if instances.len() != expected {
            return Err(HarnessError::BatchSize {
                expected,
                found: instances.len(),
            });
        }
        let n = instances.len();
        Ok(Self {
            instances,
            tasks,
            env_num,
            group_n,
            rng: StdRng::seed_from_u64(seed),
            step_timeout,
            assigned: Vec::new(),
            last: vec![Observation::default(); n],
            finished: vec![true; n],
            closed: false,
        })
    }

    /// Number of instances.
    pub fn num_envs(&self) -> usize {
        self.env_num * self.group_n
    }

    pub fn group_n(&self) -> usize {
        self.group_n
    }

    pub fn tasks(&self) -> &TaskSet {
        &self.tasks
    }

    /// Task index each instance was last reset to.
    pub fn assigned(&self) -> &[usize] {
        &self.assigned
    }

    /// Task each instance was last reset to.
    pub fn assigned_tasks(&self) -> Vec<&Task> {
        self.assigned
            .iter()
            .filter_map(|&i| self.tasks.get(i))
            .collect()
    }

    /// Which instances have finished their episode.
    pub fn finished(&self) -> &[bool] {
        &self.finished
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(HarnessError::Closed);
        }
        Ok(())
    }

    /// Sample `env_num` distinct tasks and start `group_n` instances on each.
    pub async fn reset(&mut self) -> Result<Vec<ResetOutcome>> {
        self.ensure_open()?;
        let available = self.tasks.len();
        if self.env_num > available {
            return Err(HarnessError::NotEnoughTasks {
                requested: self.env_num,
                available,
            });
        }
        let picked = index::sample(&mut self.rng, available, self.env_num).into_vec();
        let indices: Vec<usize> = picked
            .iter()
            .flat_map(|&i| std::iter::repeat(i).take(self.group_n))
            .collect();
        debug!(tasks = ?picked, "sampled tasks");
        self.reset_with(&indices).await
    }

    /// Reset instance `i` to task `indices[i]`.
    pub async fn reset_with(&mut self, indices: &[usize]) -> Result<Vec<ResetOutcome>> {
        self.ensure_open()?;
        let n = self.num_envs();
        if indices.len() != n {
            return Err(HarnessError::BatchSize {
                expected: n,
                found: indices.len(),
            });
        }
        let tasks = indices
            .iter()
            .map(|&i| {
                self.tasks.get(i).ok_or(HarnessError::InstanceOutOfRange {
                    index: i,
                    len: self.tasks.len(),
                })
            })
            .collect::<Result<Vec<&Task>>>()?;

        let limit = self.step_timeout;
        let calls = self
            .instances
            .iter_mut()
            .zip(tasks)
            .map(|(env, task)| async move {
                match tokio::time::timeout(limit, env.reset(task)).await {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(e)) => failed_reset(task, format!("Environment reset failed: {e:#}")),
                    Err(_) => failed_reset(
                        task,
                        format!("Environment reset timed out after {}s", limit.as_secs_f64()),
                    ),
                }
            });
        let outcomes = join_all(calls).await;

        for (i, outcome) in outcomes.iter().enumerate() {
            if outcome.done {
                warn!(instance = i, fail = %outcome.observation.fail_obs, "instance failed to start");
            }
            self.finished[i] = outcome.done;
            self.last[i] = outcome.observation.clone();
        }
        self.assigned = indices.to_vec();
        info!(instances = n, "batch reset");
        Ok(outcomes)
    }

    /// Apply `actions[i]` to instance `i`.
    pub async fn step(&mut self, actions: &[E::Action]) -> Result<Vec<StepOutcome>> {
        self.ensure_open()?;
        let n = self.num_envs();
        if actions.len() != n {
            return Err(HarnessError::BatchSize {
                expected: n,
                found: actions.len(),
            });
        }

        let limit = self.step_timeout;
        let finished = &self.finished;
        let last = &self.last;
        let calls = self
            .instances
            .iter_mut()
            .zip(actions)
            .enumerate()
            .map(|(i, (env, action))| async move {
                if finished[i] {
                    return terminal(&last[i]);
                }
                match tokio::time::timeout(limit, env.step(action)).await {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(e)) => failed_step(&last[i], format!("Environment step failed: {e:#}")),
                    Err(_) => failed_step(
                        &last[i],
                        format!("Environment step timed out after {}s", limit.as_secs_f64()),
                    ),
                }
            });
        let outcomes = join_all(calls).await;

        for (i, outcome) in outcomes.iter().enumerate() {
            self.finished[i] |= outcome.done;
            self.last[i] = outcome.observation.clone();
        }
        Ok(outcomes)
    }

    /// Close every instance, then drop them. Later calls do nothing.
    ///
    /// Each close gets the step timeout; instances that fail or time out are
    /// logged and dropped anyway.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let limit = self.step_timeout;
        let results = join_all(
            self.instances
                .iter_mut()
                .map(|env| tokio::time::timeout(limit, env.close())),
        )
        .await;
        for (i, res) in results.into_iter().enumerate() {
            match res {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(instance = i, error = %format!("{e:#}"), "failed to close instance")
                }
                Err(_) => warn!(
                    instance = i,
                    timeout_secs = limit.as_secs_f64(),
                    "instance close timed out"
                ),
            }
        }
        self.instances.clear();
        info!("batch closed");
    }
}

fn failed_reset(task: &Task, message: String) -> ResetOutcome {
    let mut observation = Observation::failure(message);
    observation.url = task.web.clone();
    observation.task_question = task.ques.clone();
    ResetOutcome {
        observation,
        done: true,
        info: json!({ "task_id": task.id }),
    }
}

fn failed_step(last: &Observation, message: String) -> StepOutcome {
    let mut observation = Observation::failure(message);
    observation.url = last.url.clone();
    observation.task_question = last.task_question.clone();
    StepOutcome {
        observation,
        reward: 0.0,
        done: true,
        info: json!({ "done": true }),
    }
}

fn terminal(last: &Observation) -> StepOutcome {
    StepOutcome {
        observation: last.clone(),
        reward: 0.0,
        done: true,
        info: json!({ "done": true }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Calls {
        resets: AtomicUsize,
        steps: AtomicUsize,
        closes: AtomicUsize,
    }

    /// Echoes its action into the observation; `"done"` ends the episode,
    /// `"boom"` errors and `"hang"` never returns. A `stuck` env never
    /// finishes closing.
    struct SpyEnv {
        calls: Arc<Calls>,
        task_id: String,
        stuck: bool,
    }

    impl Environment for SpyEnv {
        type Action = String;

        async fn reset(&mut self, task: &Task) -> anyhow::Result<ResetOutcome> {
            self.calls.resets.fetch_add(1, Ordering::SeqCst);
            self.task_id = task.id.clone();
            if task.ques == "broken" {
                anyhow::bail!("server down");
            }
            Ok(ResetOutcome {
                observation: Observation {
                    text: format!("start {}", task.id),
                    ..Observation::default()
                },
                done: false,
                info: json!({ "task_id": task.id }),
            })
        }

        async fn step(&mut self, action: &String) -> anyhow::Result<StepOutcome> {
            self.calls.steps.fetch_add(1, Ordering::SeqCst);
            match action.as_str() {
                "boom" => anyhow::bail!("stale session"),
                "hang" => std::future::pending().await,
                _ => Ok(StepOutcome {
                    observation: Observation {
                        text: format!("{} {action}", self.task_id),
                        ..Observation::default()
                    },
                    reward: 1.0,
                    done: action == "done",
                    info: serde_json::Value::Null,
                }),
            }
        }

        async fn close(&mut self) -> anyhow::Result<()> {
            self.calls.closes.fetch_add(1, Ordering::SeqCst);
            if self.stuck {
                std::future::pending::<()>().await;
            }
            Ok(())
        }
    }

    fn task_set(n: usize) -> TaskSet {
        TaskSet::new(
            (0..n)
                .map(|i| {
                    serde_json::from_value(json!({"id": i, "ques": format!("q{i}")})).unwrap()
                })
                .collect(),
        )
    }

    fn batch(env_num: usize, group_n: usize, tasks: TaskSet) -> (BatchEnv<SpyEnv>, Arc<Calls>) {
        let calls = Arc::new(Calls::default());
        let instances = (0..env_num * group_n)
            .map(|_| SpyEnv {
                calls: calls.clone(),
                task_id: String::new(),
                stuck: false,
            })
            .collect();
        let env = BatchEnv::new(
            instances,
            tasks,
            env_num,
            group_n,
            7,
            Duration::from_millis(200),
        )
        .unwrap();
        (env, calls)
    }

    fn actions(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn reset_groups_are_contiguous_and_distinct() {
        let (mut env, calls) = batch(3, 2, task_set(10));
        let outcomes = env.reset().await.unwrap();
        assert_eq!(outcomes.len(), 6);
        assert_eq!(calls.resets.load(Ordering::SeqCst), 6);

        let a = env.assigned().to_vec();
        assert_eq!(a[0], a[1]);
        assert_eq!(a[2], a[3]);
        assert_eq!(a[4], a[5]);
        assert!(a[0] != a[2] && a[2] != a[4] && a[0] != a[4]);
        assert_eq!(outcomes[2].observation.text, format!("start {}", a[2]));

        let (mut same_seed, _) = batch(3, 2, task_set(10));
        same_seed.reset().await.unwrap();
        assert_eq!(same_seed.assigned(), a.as_slice());
    }

    #[tokio::test]
    async fn too_few_tasks() {
        let (mut env, calls) = batch(4, 1, task_set(3));
        let err = env.reset().await.unwrap_err();
        assert!(matches!(
            err,
            HarnessError::NotEnoughTasks {
                requested: 4,
                available: 3
            }
        ));
        assert_eq!(calls.resets.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn wrong_action_count_invokes_nothing() {
        let (mut env, calls) = batch(2, 1, task_set(2));
        env.reset().await.unwrap();
        let err = env.step(&actions(&["a"])).await.unwrap_err();
        assert!(matches!(
            err,
            HarnessError::BatchSize {
                expected: 2,
                found: 1
            }
        ));
        assert_eq!(calls.steps.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn step_preserves_order_and_skips_finished() {
        let (mut env, calls) = batch(3, 1, task_set(3));
        env.reset_with(&[2, 0, 1]).await.unwrap();

        let out = env.step(&actions(&["a", "done", "c"])).await.unwrap();
        assert_eq!(out[0].observation.text, "2 a");
        assert_eq!(out[1].observation.text, "0 done");
        assert_eq!(out[2].observation.text, "1 c");
        assert!(out[1].done);
        assert_eq!(env.finished(), &[false, true, false]);

        let out = env.step(&actions(&["x", "y", "z"])).await.unwrap();
        assert_eq!(calls.steps.load(Ordering::SeqCst), 5);
        assert!(out[1].done);
        assert_eq!(out[1].reward, 0.0);
        assert_eq!(out[1].observation.text, "0 done");
        assert_eq!(out[2].observation.text, "1 z");
    }

    #[tokio::test]
    async fn errors_and_timeouts_become_done() {
        let (mut env, _) = batch(3, 1, task_set(3));
        env.reset_with(&[0, 1, 2]).await.unwrap();

        let out = env.step(&actions(&["ok", "boom", "hang"])).await.unwrap();
        assert!(!out[0].done);
        assert!(out[1].done);
        assert!(out[1].observation.fail_obs.contains("stale session"));
        assert!(out[2].done);
        assert!(out[2].observation.fail_obs.contains("timed out"));
    }

    #[tokio::test]
    async fn reset_failure_marks_instance_finished() {
        let mut tasks = task_set(2).iter().cloned().collect::<Vec<Task>>();
        tasks[1].ques = "broken".into();
        let (mut env, calls) = batch(2, 1, TaskSet::new(tasks));

        let out = env.reset_with(&[0, 1]).await.unwrap();
        assert!(!out[0].done);
        assert!(out[1].done);
        assert!(out[1].observation.fail_obs.contains("server down"));

        env.step(&actions(&["a", "b"])).await.unwrap();
        assert_eq!(calls.steps.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reset_with_checks_indices() {
        let (mut env, _) = batch(2, 1, task_set(2));
        assert!(matches!(
            env.reset_with(&[0, 5]).await.unwrap_err(),
            HarnessError::InstanceOutOfRange { index: 5, len: 2 }
        ));
        assert!(matches!(
            env.reset_with(&[0]).await.unwrap_err(),
            HarnessError::BatchSize { .. }
        ));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (mut env, calls) = batch(2, 2, task_set(4));
        env.reset().await.unwrap();
        env.close().await;
        env.close().await;
        assert_eq!(calls.closes.load(Ordering::SeqCst), 4);
        assert!(env.is_closed());
        assert!(matches!(env.reset().await.unwrap_err(), HarnessError::Closed));
        assert!(matches!(
            env.step(&actions(&["a", "b", "c", "d"])).await.unwrap_err(),
            HarnessError::Closed
        ));
    }

    #[tokio::test]
    async fn stuck_close_is_cut_off_and_dropped() {
        let calls = Arc::new(Calls::default());
        let instances = (0..2)
            .map(|i| SpyEnv {
                calls: calls.clone(),
                task_id: String::new(),
                stuck: i == 1,
            })
            .collect();
        let mut env = BatchEnv::new(
            instances,
            task_set(2),
            2,
            1,
            0,
            Duration::from_millis(100),
        )
        .unwrap();

        let closed = tokio::time::timeout(Duration::from_secs(2), env.close()).await;
        assert!(closed.is_ok());
        assert!(env.is_closed());
        assert_eq!(calls.closes.load(Ordering::SeqCst), 2);
        assert!(env.instances.is_empty());
    }

    #[test]
    fn instance_count_must_match() {
        let err = BatchEnv::<SpyEnv>::new(Vec::new(), task_set(1), 1, 2, 0, Duration::ZERO)
            .err()
            .unwrap();
        assert!(matches!(err, HarnessError::BatchSize { expected: 2, found: 0 }));
    }
}
