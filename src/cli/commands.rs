//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::planner::DEFAULT_MAX_PARALLELISM;

/// funcsync - Declarative reconciler for serverless search apps.
#[derive(Parser, Debug)]
#[command(name = "funcsync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the desired-state document.
    #[arg(short, long, global = true, env = "FUNCSYNC_STATE")]
    pub state: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Drive the provider to the desired state.
    Reconcile {
        /// Delete resources the document no longer declares.
        #[arg(long)]
        prune: bool,

        /// Print the plan and stop.
        #[arg(long)]
        dry_run: bool,

        /// Start no new operation after this long (e.g. 90s, 5m, 1m30s).
        #[arg(long, value_parser = humantime::parse_duration)]
        deadline: Option<Duration>,

        /// Operations run at once inside a tier.
        #[arg(long, default_value_t = DEFAULT_MAX_PARALLELISM)]
        max_parallelism: usize,

        /// Do not lock or record the run journal.
        #[arg(long)]
        no_journal: bool,

        /// Provider connection.
        #[command(flatten)]
        provider: ProviderArgs,
    },

    /// Validate the desired-state document.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Check for drift between the document and the provider.
    Drift {
        /// Report deletes as drift too.
        #[arg(long)]
        prune: bool,

        /// Provider connection.
        #[command(flatten)]
        provider: ProviderArgs,
    },

    /// Show recorded runs.
    History {
        /// Number of runs to show.
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
}

/// Provider connection arguments.
#[derive(Args, Debug, Clone)]
pub struct ProviderArgs {
    /// Provider implementation.
    #[arg(long, default_value = "http")]
    pub provider: ProviderKind,

    /// Control-plane base URL.
    #[arg(long, env = "FUNCSYNC_PROVIDER_URL")]
    pub provider_url: Option<String>,

    /// Control-plane bearer token.
    #[arg(long, env = "FUNCSYNC_PROVIDER_TOKEN", hide_env_values = true)]
    pub provider_token: Option<String>,

    /// YAML map of secret references to values; the environment is used
    /// when omitted.
    #[arg(long, env = "FUNCSYNC_SECRETS_FILE")]
    pub secrets_file: Option<PathBuf>,
}

/// Provider implementations selectable from the CLI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ProviderKind {
    /// REST control plane.
    #[default]
    Http,
    /// In-process provider starting empty, for rehearsals.
    Memory,
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
