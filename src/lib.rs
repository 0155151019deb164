//! Command-line front end for the task execution engine.
//!
//! Builds an engine from a TOML file and flags, runs one task to its
//! terminal state and hands back the status snapshot.

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use task_exec::{
    EngineConfig, SecurityLevel, TaskExecutionService, TaskKind, TaskRequest, TaskSnapshot,
};
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "TASK_ENGINE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Working directory for task processes
    #[arg(long, env = "TASK_ENGINE_SCRATCH_DIR", global = true)]
    pub scratch_dir: Option<PathBuf>,

    /// Interpreter used for script tasks
    #[arg(long, env = "TASK_ENGINE_INTERPRETER", global = true)]
    pub interpreter: Option<String>,

    /// low, medium, high or restricted
    #[arg(short, long, default_value = "medium", global = true)]
    pub security_level: SecurityLevel,

    /// Recorded on the task, never interpreted
    #[arg(long, global = true)]
    pub owner: Option<String>,

    /// Wall-clock deadline in seconds
    #[arg(short, long, global = true)]
    pub timeout: Option<u64>,

    /// Memory limit in bytes
    #[arg(long, global = true)]
    pub memory_limit: Option<u64>,

    /// CPU percentage above which usage is logged
    #[arg(long, global = true)]
    pub cpu_limit: Option<f32>,

    /// Resource monitor tick in milliseconds
    #[arg(long, global = true)]
    pub poll_interval: Option<u64>,

    #[command(subcommand)]
    pub task: TaskArgs,
}

#[derive(Subcommand, Debug)]
pub enum TaskArgs {
    /// Run a script body read from a file
    Script {
        file: PathBuf,

        /// Parameters as a JSON document
        #[arg(long)]
        params: Option<String>,
    },
    /// Run a whitelisted inspection command
    Command {
        line: String,

        /// Parameters as a JSON document
        #[arg(long)]
        params: Option<String>,
    },
}

/// Layers flags over the configuration file, or the defaults without one
pub fn engine_config(args: &Args) -> anyhow::Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    if let Some(dir) = &args.scratch_dir {
        config = config.with_scratch_dir(dir);
    }
    if let Some(interpreter) = &args.interpreter {
        config = config.with_interpreter(interpreter);
    }
    if let Some(secs) = args.timeout {
        config = config
            .with_script_timeout(Duration::from_secs(secs))
            .with_command_timeout(Duration::from_secs(secs));
    }
    if let Some(bytes) = args.memory_limit {
        config.limits.max_memory_bytes = bytes;
    }
    if let Some(percent) = args.cpu_limit {
        config.limits.max_cpu_percent = percent;
    }
    if let Some(millis) = args.poll_interval {
        config = config.with_poll_interval(Duration::from_millis(millis));
    }

    config.validate()?;
    Ok(config)
}

pub async fn task_request(args: &Args) -> anyhow::Result<TaskRequest> {
    let kind = match &args.task {
        TaskArgs::Script { file, params } => {
            let body = tokio::fs::read_to_string(file)
                .await
                .with_context(|| format!("Failed to read script {}", file.display()))?;
            TaskKind::script(body, parse_params(params.as_deref())?)
        }
        TaskArgs::Command { line, params } => {
            TaskKind::command(line.as_str(), parse_params(params.as_deref())?)
        }
    };

    let mut request = TaskRequest::new(kind, args.security_level);
    if let Some(owner) = &args.owner {
        request = request.with_owner(owner.as_str());
    }
    Ok(request)
}

fn parse_params(raw: Option<&str>) -> anyhow::Result<Value> {
    match raw {
        Some(raw) => serde_json::from_str(raw).context("--params is not valid JSON"),
        None => Ok(Value::Object(Default::default())),
    }
}

/// Runs the task described by `args` and returns its terminal snapshot
pub async fn run(args: &Args) -> anyhow::Result<TaskSnapshot> {
    let config = engine_config(args)?;
    let request = task_request(args).await?;

    debug!("Engine config: {:?}", config);
    info!(
        "Running {:?} task at {} security",
        request.kind.task_type(),
        request.security_level
    );

    let service = TaskExecutionService::new(config).await?;
    let snapshot = service.run(request).await?;

    match &snapshot.error {
        Some(error) => warn!("Task {} ended {}: {}", snapshot.id, snapshot.status, error.message),
        None => info!("Task {} ended {}", snapshot.id, snapshot.status),
    }
    Ok(snapshot)
}
