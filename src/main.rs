//! targetctl
//!
//! Validates a target document, prints the reconciliation plan, or applies
//! it through a storage backend.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use storage_target::{
    create_backend, EngineConfig, LogProgress, MemoryBackend, Reconciler, StorageBackendRef,
    TargetDocument, Targets, Validator,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Storage target validation and reconciliation
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Target document (YAML, or JSON with a .json extension)
    #[arg(long, short = 'd', env = "TARGET_DOCUMENT")]
    document: PathBuf,

    /// Engine configuration file (YAML)
    #[arg(long, short = 'c', env = "TARGET_CONFIG")]
    config: Option<PathBuf>,

    /// Storage backend (memory, command)
    #[arg(long, env = "TARGET_BACKEND", default_value = "memory")]
    backend: String,

    /// Alternate root the target is mounted under
    #[arg(long, env = "TARGET_ALT_ROOT")]
    alt_root: Option<PathBuf>,

    /// Do not activate the boot environment after creating it
    #[arg(long)]
    no_activate: bool,

    /// Output format for reports and plans
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate the desired tree
    Validate,
    /// Print the reconciliation plan without touching storage
    Plan,
    /// Validate and reconcile the desired tree
    Apply,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum OutputFormat {
    Text,
    Json,
}

// =============================================================================
// Main
// =============================================================================

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    info!("Starting targetctl");
    info!("  Version: {}", storage_target::VERSION);
    info!("  Document: {}", args.document.display());
    info!("  Backend: {}", args.backend);

    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if args.alt_root.is_some() {
        config.reconcile.alt_root = args.alt_root.clone();
    }
    if args.no_activate {
        config.reconcile.activate_boot_environment = false;
    }

    let targets = TargetDocument::load(&args.document)
        .and_then(TargetDocument::into_targets)
        .with_context(|| format!("loading target document {}", args.document.display()))?;

    let validator = Validator::new(config.validator.clone());

    match args.command {
        Command::Validate => {
            let report = validator.validate(&targets.desired);
            match args.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                OutputFormat::Text => {
                    for violation in &report.violations {
                        println!("{}", violation);
                    }
                    println!(
                        "{}",
                        if report.is_valid() { "valid" } else { "invalid" }
                    );
                }
            }
            if !report.is_valid() {
                bail!("desired tree has {} violation(s)", report.len());
            }
        }
        Command::Plan => {
            let backend = open_backend(&args.backend, &targets)?;
            let plan = Reconciler::new(backend, config.reconcile).plan(&targets)?;
            match args.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&plan)?),
                OutputFormat::Text => print!("{}", plan),
            }
        }
        Command::Apply => {
            let backend = open_backend(&args.backend, &targets)?;
            let reconciler = Reconciler::new(backend, config.reconcile);
            let summary = reconciler.apply(&targets, &validator, &mut LogProgress)?;
            match args.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
                OutputFormat::Text => println!(
                    "{} steps, {} changed",
                    summary.steps, summary.changed
                ),
            }
        }
    }

    Ok(())
}

/// The memory backend starts out mirroring the discovered tree
fn open_backend(name: &str, targets: &Targets) -> Result<StorageBackendRef> {
    if name == "memory" {
        let backend = MemoryBackend::new();
        backend.seed_from(&targets.discovered);
        return Ok(std::sync::Arc::new(backend));
    }
    Ok(create_backend(name)?)
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
