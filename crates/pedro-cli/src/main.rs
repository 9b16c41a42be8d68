//! `pedro` CLI entrypoint. Thin wrapper over the `pedro-scheduler`/
//! `pedro-agents` core: parses arguments, loads configuration, wires a
//! concrete backend, and drives jobs through the same in-process
//! `JobManager` that owns their status.
//!
//! The job index is not persisted or shared across invocations (the core
//! deliberately treats it as process-local, see `DESIGN.md`), so `submit`
//! waits for its job to reach a terminal status before the process exits
//! — otherwise the spawned worker would simply never run to completion —
//! while still printing the job id as soon as it is assigned. `status`,
//! `list`, and `cancel` build their own empty job manager and so only
//! ever see jobs submitted earlier in the *same* process; they exist for
//! parity with the job manager's `get`/`list`/`cancel` contract and as the
//! natural extension point for a future long-lived server front-end.

mod cli;
mod config;

use anyhow::{bail, Result};
use clap::Parser;
use cli::{Cli, Commands, JournalCommands};
use config::Config;
use pedro_backend::mock::MockBackend;
use pedro_backend::{BackendAdapter, OllamaBackend, OpenAiBackend};
use pedro_budget::InMemoryCompactionLog;
use pedro_core::job::{JobId, JobStatus};
use pedro_format::Dialect;
use pedro_journal::Journal;
use pedro_scheduler::{JobManager, WorkerOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn build_backend(cfg: &config::BackendConfig) -> Result<Arc<dyn BackendAdapter>> {
    match cfg.kind.as_str() {
        "openai" => Ok(Arc::new(OpenAiBackend::new(&cfg.base_url, &cfg.api_key, &cfg.model))),
        "ollama" => Ok(Arc::new(OllamaBackend::new(&cfg.base_url, &cfg.model))),
        "mock" => Ok(Arc::new(MockBackend::text_sequence(vec!["Done. TASK_COMPLETE"]))),
        other => bail!("unknown backend kind '{other}', expected one of: openai, ollama, mock"),
    }
}

fn build_job_manager(
    base_dir: std::path::PathBuf,
    working_dir: std::path::PathBuf,
    backend: Arc<dyn BackendAdapter>,
    dialect: Dialect,
    window_total: usize,
    max_rounds: u32,
    max_retries: u32,
    max_concurrent_jobs: Option<usize>,
) -> JobManager {
    let mut builder = JobManager::builder();
    for spec in pedro_agents::built_in_agents() {
        let base_dir = base_dir.clone();
        let working_dir = working_dir.clone();
        let backend = backend.clone();
        let spec = spec.clone();
        builder = builder.register_agent(
            spec.kind,
            Arc::new(move |job: pedro_core::job::Job, cancellation: CancellationToken| {
                let base_dir = base_dir.clone();
                let working_dir = working_dir.clone();
                let backend = backend.clone();
                let spec = spec.clone();
                Box::pin(async move {
                    let log = InMemoryCompactionLog::new();
                    pedro_agents::run_agent_job(
                        &spec,
                        &job,
                        cancellation,
                        &base_dir,
                        &working_dir,
                        backend.as_ref(),
                        dialect,
                        window_total,
                        max_rounds,
                        max_retries,
                        &log,
                    )
                    .await
                }) as std::pin::Pin<Box<dyn std::future::Future<Output = WorkerOutcome> + Send>>
            }),
        );
    }
    if let Some(permits) = max_concurrent_jobs {
        builder = builder.with_concurrency_limit(permits);
    }
    builder.build()
}

/// Build a job manager from `config` against `working_dir`, with no jobs
/// submitted yet — shared setup for every subcommand that touches the
/// `JobManager` API.
fn manager_from_config(config: &Config, working_dir: std::path::PathBuf) -> Result<JobManager> {
    let dialect = Dialect::from_model_name(&config.backend.model);
    let backend = build_backend(&config.backend)?;
    std::fs::create_dir_all(&config.base_dir)?;
    Ok(build_job_manager(
        config.base_dir.clone(),
        working_dir,
        backend,
        dialect,
        config.window_total,
        config.max_rounds,
        config.max_retries,
        config.max_concurrent_jobs,
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Submit { agent, cd, inputs, model } => {
            submit_command(config, agent, cd, inputs, model).await
        }
        Commands::Status { job_id } => status_command(config, job_id),
        Commands::List => list_command(config),
        Commands::Cancel { job_id } => cancel_command(config, job_id),
        Commands::Journal { command: JournalCommands::Show { job_id, base_dir } } => {
            journal_show_command(config, job_id, base_dir)
        }
    }
}

async fn submit_command(
    mut config: Config,
    agent: String,
    cd: Option<std::path::PathBuf>,
    inputs: Vec<String>,
    model_override: Option<String>,
) -> Result<()> {
    if let Some(model) = model_override {
        config.backend.model = model;
    }
    let input = cli::parse_inputs(&inputs)?;
    let working_dir = cd.unwrap_or(std::env::current_dir()?);
    let manager = manager_from_config(&config, working_dir)?;

    let id = manager.submit(&agent, input)?;
    println!("submitted job {id}");

    let job = loop {
        let job = manager.get(&id)?;
        if job.status.is_terminal() {
            break job;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    };

    println!("{}", serde_json::to_string_pretty(&job)?);
    if job.status != JobStatus::Completed {
        std::process::exit(1);
    }
    Ok(())
}

fn status_command(config: Config, job_id: String) -> Result<()> {
    let id = JobId::parse(job_id)?;
    let manager = manager_from_config(&config, std::env::current_dir()?)?;
    let job = manager.get(&id)?;
    println!("{}", serde_json::to_string_pretty(&job)?);
    Ok(())
}

fn list_command(config: Config) -> Result<()> {
    let manager = manager_from_config(&config, std::env::current_dir()?)?;
    let jobs = manager.list();
    println!("{}", serde_json::to_string_pretty(&jobs)?);
    Ok(())
}

fn cancel_command(config: Config, job_id: String) -> Result<()> {
    let id = JobId::parse(job_id)?;
    let manager = manager_from_config(&config, std::env::current_dir()?)?;
    manager.cancel(&id)?;
    println!("cancellation requested for job {id}");
    Ok(())
}

fn journal_show_command(config: Config, job_id: String, base_dir: Option<std::path::PathBuf>) -> Result<()> {
    let base = base_dir.unwrap_or(config.base_dir);
    let journal = Journal::open(&base, &job_id)?;
    let rounds = journal.read_all_rounds()?;
    for round in rounds {
        println!("{}", round.summary_line());
    }
    Ok(())
}
