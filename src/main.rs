//! funcsync CLI entrypoint.
//!
//! This is the main entrypoint for the funcsync command-line tool.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use funcsync::cli::{Cli, Commands, OutputFormatter, ProviderArgs, ProviderKind};
use funcsync::config::{ConfigParser, ConfigValidator, DesiredState, find_state_file};
use funcsync::error::{ConfigError, Result};
use funcsync::journal::open_journal;
use funcsync::provider::{CloudProvider, HttpProvider, InMemoryProvider};
use funcsync::reconciler::{ReconcileOptions, Reconciler};
use funcsync::settings::{CredentialStore, EnvCredentialStore, StaticCredentialStore};

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Exit code for an invalid document.
const EXIT_INVALID: u8 = 2;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.json_logs);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

/// Initializes the logging system on stderr.
fn init_logging(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Main async entry point; returns the process exit code.
async fn run(cli: Cli) -> Result<u8> {
    let formatter = OutputFormatter::new(cli.output);
    let state = cli.state.as_deref();

    match cli.command {
        Commands::Reconcile {
            prune,
            dry_run,
            deadline,
            max_parallelism,
            no_journal,
            provider,
        } => {
            let options = ReconcileOptions {
                prune,
                deadline,
                max_parallelism,
                ..ReconcileOptions::default()
            };
            cmd_reconcile(state, options, dry_run, no_journal, &provider, &formatter).await
        }
        Commands::Validate { warnings } => cmd_validate(state, warnings, &formatter),
        Commands::Drift { prune, provider } => cmd_drift(state, prune, &provider, &formatter).await,
        Commands::History { limit } => cmd_history(state, limit, &formatter).await,
    }
}

/// Loads the document, its `.env` file and the environment overrides.
///
/// Returns the document and the directory it lives in.
fn load_document(state: Option<&Path>) -> Result<(DesiredState, PathBuf)> {
    let path = match state {
        Some(path) => path.to_path_buf(),
        None => find_state_file(std::env::current_dir()?)?,
    };
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

    let parser = ConfigParser::new().with_base_path(&dir);
    parser.load_dotenv()?;
    let desired = parser.load_with_env(&path)?;

    Ok((desired, dir))
}

/// Builds the provider selected on the command line.
fn build_provider(args: &ProviderArgs) -> Result<Arc<dyn CloudProvider>> {
    match args.provider {
        ProviderKind::Memory => {
            warn!("Using the in-memory provider: nothing leaves this process");
            Ok(Arc::new(InMemoryProvider::new()))
        }
        ProviderKind::Http => {
            let url = args.provider_url.as_deref().ok_or_else(|| ConfigError::MissingEnvVar {
                name: String::from("FUNCSYNC_PROVIDER_URL"),
            })?;
            let token = args.provider_token.as_deref().ok_or_else(|| ConfigError::MissingEnvVar {
                name: String::from("FUNCSYNC_PROVIDER_TOKEN"),
            })?;
            Ok(Arc::new(HttpProvider::new(url, token)?))
        }
    }
}

/// Builds the credential store: the secrets file if given, else the environment.
fn build_credentials(args: &ProviderArgs) -> Result<Arc<dyn CredentialStore>> {
    match &args.secrets_file {
        Some(path) => Ok(Arc::new(StaticCredentialStore::from_yaml_file(path)?)),
        None => Ok(Arc::new(EnvCredentialStore::new())),
    }
}

/// Validates the document, printing every error and warning.
///
/// Returns `None` when the document may be used.
fn check_document(
    desired: &DesiredState,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Option<u8> {
    let result = ConfigValidator::new().check(desired);
    if result.is_valid() {
        for warning in &result.warnings {
            warn!("{warning}");
        }
        None
    } else {
        println!("{}", formatter.format_validation(&result, show_warnings));
        Some(EXIT_INVALID)
    }
}

/// Validate the document.
fn cmd_validate(state: Option<&Path>, show_warnings: bool, formatter: &OutputFormatter) -> Result<u8> {
    let (desired, _) = load_document(state)?;
    info!("Validating desired state for {}", desired.resource_group);

    let result = ConfigValidator::new().check(&desired);
    println!("{}", formatter.format_validation(&result, show_warnings));

    if result.is_valid() {
        eprintln!("\nDocument summary:");
        eprintln!("  Resource group: {}", desired.resource_group);
        eprintln!("  Region: {}", desired.region);
        eprintln!("  Plans: {}", desired.plans.len());
        eprintln!("  Apps: {}", desired.apps.len());
        eprintln!("  Routes: {}", desired.routes.len());
        Ok(0)
    } else {
        Ok(EXIT_INVALID)
    }
}

/// Reconcile the provider to the document.
async fn cmd_reconcile(
    state: Option<&Path>,
    options: ReconcileOptions,
    dry_run: bool,
    no_journal: bool,
    provider_args: &ProviderArgs,
    formatter: &OutputFormatter,
) -> Result<u8> {
    let (desired, dir) = load_document(state)?;
    if let Some(code) = check_document(&desired, false, formatter) {
        return Ok(code);
    }

    let mut reconciler = Reconciler::new(
        build_provider(provider_args)?,
        build_credentials(provider_args)?,
    )
    .with_options(options);

    if dry_run {
        let plan = reconciler.plan(&desired).await?;
        println!("{}", formatter.format_plan(&plan));
        return Ok(0);
    }

    if no_journal {
        debug!("Run journal disabled");
    } else {
        let journal = open_journal(&desired.journal, &dir).await?;
        reconciler = reconciler.with_journal(journal);
    }

    let report = reconciler.reconcile(desired).await;
    println!("{}", formatter.format_report(&report));
    Ok(report.exit_code())
}

/// Report drift; exits 1 when the provider differs from the document.
async fn cmd_drift(
    state: Option<&Path>,
    prune: bool,
    provider_args: &ProviderArgs,
    formatter: &OutputFormatter,
) -> Result<u8> {
    let (desired, _) = load_document(state)?;
    if let Some(code) = check_document(&desired, false, formatter) {
        return Ok(code);
    }

    let reconciler = Reconciler::new(
        build_provider(provider_args)?,
        build_credentials(provider_args)?,
    )
    .with_options(ReconcileOptions {
        prune,
        ..ReconcileOptions::default()
    });

    let report = reconciler.check_drift(&desired).await?;
    println!("{}", formatter.format_drift(&report));
    Ok(u8::from(!report.is_converged()))
}

/// Show the run journal.
async fn cmd_history(state: Option<&Path>, limit: usize, formatter: &OutputFormatter) -> Result<u8> {
    let (desired, dir) = load_document(state)?;
    let journal = open_journal(&desired.journal, &dir).await?;
    debug!("Reading {} journal", journal.backend_type());

    if let Some(lock) = journal.lock_info().await? {
        eprintln!(
            "Journal locked by {} ({}s left)",
            lock.holder,
            lock.remaining_secs()
        );
    }

    let runs = journal.load().await?;
    println!("{}", formatter.format_history(&runs, limit));
    Ok(0)
}
