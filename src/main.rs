//! webgym: rollout harness for web and text agents.
//!
//! Subcommands:
//!
//! - `project`  -- Turn raw model outputs into normalized actions
//! - `infer`    -- Batch inference over a trajectory JSONL file
//! - `rollout`  -- Run browser rollouts driven by the inference server
//! - `tasks`    -- Inspect a task file

use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};
use tracing_subscriber::EnvFilter;

use webgym::config::HarnessConfig;
use webgym::env::browser::mock::ScriptedLauncher;
use webgym::env::browser::DriverLauncher;
use webgym::env::TaskSet;
use webgym::model::data_loader::steps_from_jsonl;
use webgym::model::{InferenceClient, SamplingParams};
use webgym::projection::{extract_known_unknown, project, Grammar};
use webgym::rollout::WebAgentRollout;
use webgym::util::expand_env_vars;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// webgym: rollout harness for web and text agents
#[derive(Parser)]
#[command(name = "webgym", version, about)]
struct Cli {
    /// Path to a JSON configuration file (uses defaults if not provided).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum GrammarChoice {
    /// `Thought:` / `Action:` lines.
    Line,
    /// `<think>` / `<action>` tags.
    Tag,
}

impl GrammarChoice {
    fn grammar(self) -> Grammar {
        match self {
            Self::Line => Grammar::line(),
            Self::Tag => Grammar::tag(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Project raw model outputs onto actions and print them as JSON.
    Project {
        /// JSON array of strings. Reads stdin when omitted.
        input: Option<PathBuf>,

        /// Line separating responses on stdin.
        #[arg(long, default_value = "---")]
        separator: String,

        #[arg(long, value_enum, default_value = "line")]
        grammar: GrammarChoice,
    },

    /// Run batch inference over a trajectory JSONL file.
    Infer {
        /// Records of the form `{"traj_uid", "steps": [{"step", "prompt"}]}`.
        input: PathBuf,

        /// Where to write the enriched JSONL.
        #[arg(long, default_value = "data/inference.jsonl")]
        output: PathBuf,
    },

    /// Run browser rollouts with the configured policy.
    Rollout {
        /// Use the scripted in-memory browser.
        #[arg(long)]
        mock: bool,

        /// Task file (defaults to the dataset test path).
        #[arg(long)]
        tasks: Option<PathBuf>,

        /// Rewrite every task URL to this `scheme://host:port`.
        #[arg(long)]
        target_url: Option<String>,
    },

    /// Inspect a task file.
    Tasks {
        path: PathBuf,

        /// Rewrite every task URL to this `scheme://host:port`.
        #[arg(long)]
        target_url: Option<String>,

        /// How many tasks to print.
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

// ---------------------------------------------------------------------------
// Entrypoint
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing (reads RUST_LOG env var, defaults to info).
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = HarnessConfig::load(cli.config.as_deref())?;
    config.apply_env_overrides();

    match cli.command {
        Commands::Project {
            input,
            separator,
            grammar,
        } => cmd_project(input.as_deref(), &separator, grammar.grammar()),
        Commands::Infer { input, output } => cmd_infer(&config, &input, &output).await,
        Commands::Rollout {
            mock,
            tasks,
            target_url,
        } => cmd_rollout(&config, mock, tasks, target_url.as_deref()).await,
        Commands::Tasks {
            path,
            target_url,
            limit,
        } => cmd_tasks(&path, target_url.as_deref(), limit),
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

fn cmd_project(input: Option<&Path>, separator: &str, grammar: Grammar) -> Result<()> {
    let responses: Vec<String> = match input {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("{} is not a JSON array of strings", path.display()))?
        }
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read stdin")?;
            split_responses(&text, separator)
        }
    };

    let (actions, valid) = project(&responses, &grammar);
    let rows: Vec<Value> = responses
        .iter()
        .zip(actions.iter().zip(&valid))
        .map(|(raw, (action, ok))| {
            let (known, unknown) = extract_known_unknown(raw);
            json!({
                "action": action,
                "command": action.to_string(),
                "valid": ok,
                "known": known,
                "unknown": unknown,
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(())
}

fn split_responses(text: &str, separator: &str) -> Vec<String> {
    let mut responses = vec![String::new()];
    for line in text.lines() {
        if line.trim() == separator {
            responses.push(String::new());
            continue;
        }
        if let Some(current) = responses.last_mut() {
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(line);
        }
    }
    responses.retain(|r| !r.trim().is_empty());
    responses
}

async fn cmd_infer(config: &HarnessConfig, input: &Path, output: &Path) -> Result<()> {
    let steps = steps_from_jsonl(input)?;
    tracing::info!(path = %input.display(), prompts = steps.len(), "Loaded step prompts");

    let client = InferenceClient::from_config(&config.inference)?;
    let inputs: Vec<_> = steps.iter().map(|s| s.messages.clone()).collect();
    let completions = client
        .generate_batch(
            &inputs,
            &config.inference.sampling(),
            config.inference.max_concurrency,
        )
        .await;

    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(output)
        .with_context(|| format!("Failed to create {}", output.display()))?;
    let mut out = BufWriter::new(file);
    let model = client.model();
    for (step, completion) in steps.iter().zip(completions) {
        let mut row = Map::new();
        row.insert("traj_uid".into(), step.traj_uid.clone());
        row.insert("step".into(), step.step.clone());
        row.insert(format!("{model}_response"), completion.text.into());
        row.insert(format!("{model}_reasoning"), completion.reasoning.into());
        row.insert("input_messages".into(), serde_json::to_value(&step.messages)?);
        writeln!(out, "{}", Value::Object(row))?;
    }
    out.flush()?;

    tracing::info!(path = %output.display(), rows = steps.len(), "Saved inference results");
    Ok(())
}

async fn cmd_rollout(
    config: &HarnessConfig,
    mock: bool,
    tasks: Option<PathBuf>,
    target_url: Option<&str>,
) -> Result<()> {
    if !mock {
        bail!("no live browser driver is configured; pass --mock to use the scripted browser");
    }

    let path = match tasks {
        Some(path) => path,
        None => PathBuf::from(expand_env_vars(
            &config.dataset.test_path.to_string_lossy(),
        )),
    };
    let mut task_set = TaskSet::load(&path)?;
    if let Some(target) = target_url {
        task_set.rebase_hosts(target);
    }

    let client = InferenceClient::from_config(&config.inference)?;
    let params = config.inference.sampling();
    let mut rollout = WebAgentRollout::new(ScriptedLauncher::new(8), task_set, config.env.clone())?;

    run_rollout(&mut rollout, &client, &params, config).await?;
    tracing::info!("Rollout finished");
    Ok(())
}

/// Drive `rollout` to completion, closing it whether or not a step failed.
async fn run_rollout<L: DriverLauncher>(
    rollout: &mut WebAgentRollout<L>,
    client: &InferenceClient,
    params: &SamplingParams,
    config: &HarnessConfig,
) -> Result<()> {
    let result = drive_rollout(rollout, client, params, config).await;
    rollout.close().await;
    result
}

async fn drive_rollout<L: DriverLauncher>(
    rollout: &mut WebAgentRollout<L>,
    client: &InferenceClient,
    params: &SamplingParams,
    config: &HarnessConfig,
) -> Result<()> {
    rollout.reset().await?;
    tracing::info!(instances = rollout.num_envs(), "Rollout started");

    for step in 0..config.env.max_steps {
        if rollout.finished().iter().all(|&done| done) {
            break;
        }
        let prompts = rollout.prompts();
        let completions = client
            .generate_batch(&prompts, params, config.inference.max_concurrency)
            .await;
        let texts: Vec<String> = completions.into_iter().map(|c| c.text).collect();
        let batch = rollout.step(&texts).await?;

        let valid = batch.valid.iter().filter(|&&v| v).count();
        let done = batch.dones.iter().filter(|&&d| d).count();
        tracing::info!(step, valid, done, "Rollout step");
        for (i, summary) in rollout.summaries()?.iter().enumerate() {
            tracing::debug!(instance = i, traj_uid = %rollout.traj_uids()[i], "{summary}");
        }
    }
    Ok(())
}

fn cmd_tasks(path: &Path, target_url: Option<&str>, limit: usize) -> Result<()> {
    let mut tasks = TaskSet::load(path)?;
    if let Some(target) = target_url {
        tasks.rebase_hosts(target);
    }

    println!("Task file: {}", path.display());
    println!("  Total tasks: {}", tasks.len());
    println!();
    for task in tasks.iter().take(limit) {
        println!("  [{}] {}", task.id, task.web);
        println!("    {}", task.ques);
    }
    if tasks.len() > limit {
        println!("  ... and {} more", tasks.len() - limit);
    }
    Ok(())
}
