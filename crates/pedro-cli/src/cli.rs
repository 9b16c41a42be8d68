use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pedro", version, about = "Self-hosted autonomous coding-agent runtime")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to a TOML config file. Falls back to built-in defaults when omitted.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Submit a job and print its id immediately, without waiting for it
    /// to finish.
    Submit {
        /// Agent kind: builder, debugger, reviewer, or triager.
        agent: String,

        /// Working directory the job's tools operate against (defaults to CWD).
        #[arg(long)]
        cd: Option<PathBuf>,

        /// One input key=value pair; repeatable (e.g. --param description="add a health check").
        #[arg(long = "param", value_name = "KEY=VALUE")]
        inputs: Vec<String>,

        /// Override the configured model name.
        #[arg(long)]
        model: Option<String>,
    },

    /// Print a job's current status, output, and error (if any).
    Status {
        job_id: String,
    },

    /// List every job known to this process.
    List,

    /// Request cancellation of a running job.
    Cancel {
        job_id: String,
    },

    /// Inspect a job's on-disk journal.
    Journal {
        #[command(subcommand)]
        command: JournalCommands,
    },
}

#[derive(Subcommand)]
pub enum JournalCommands {
    /// Print the rounds recorded in a job's on-disk journal.
    Show {
        job_id: String,

        /// Journal base directory (defaults to the configured one).
        #[arg(long)]
        base_dir: Option<PathBuf>,
    },
}

pub fn parse_inputs(pairs: &[String]) -> anyhow::Result<std::collections::BTreeMap<String, String>> {
    let mut map = std::collections::BTreeMap::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("invalid --param value '{pair}', expected key=value"))?;
        map.insert(key.to_string(), value.to_string());
    }
    Ok(map)
}
