//! # Jobflow Configuration Validator
//!
//! Loads engine configuration the way the engine does at bootstrap (defaults, TOML
//! file, `JOBFLOW__*` environment variables), validates it, and prints the effective
//! configuration as JSON. Exits non-zero when loading or validation fails.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jobflow_core::config::{ConfigManager, EngineConfig};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate jobflow engine configuration")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Environment to validate (development, test, production, ...)
    #[arg(short, long)]
    environment: Option<String>,

    /// Configuration directory (default: config)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Validate a single TOML file instead of a configuration directory
    #[arg(short, long, conflicts_with = "config_dir")]
    file: Option<PathBuf>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Pretty-print JSON output
    #[arg(long)]
    pretty: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load and validate, printing the effective configuration
    Validate,

    /// Print the compiled defaults
    Defaults,

    /// Print one section of the effective configuration
    Section {
        /// executor, sla, events or coordinator
        name: String,
    },
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let _subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();

    let result = match &cli.command {
        Some(Commands::Validate) | None => validate(&cli),
        Some(Commands::Defaults) => print_json(&cli, &EngineConfig::default()),
        Some(Commands::Section { name }) => show_section(&cli, name),
    };

    match result {
        Ok(()) => {
            info!("Configuration validation completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("Configuration validation failed: {e:#}");
            eprintln!("error: {e:#}");
            process::exit(1);
        }
    }
}

fn load(cli: &Cli) -> Result<Arc<ConfigManager>> {
    if let Some(file) = &cli.file {
        return ConfigManager::load_from_file(file)
            .with_context(|| format!("loading {}", file.display()));
    }
    let environment = cli
        .environment
        .clone()
        .unwrap_or_else(ConfigManager::detect_environment);
    ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), &environment)
        .with_context(|| format!("loading configuration for environment '{environment}'"))
}

fn validate(cli: &Cli) -> Result<()> {
    let manager = load(cli)?;
    info!(
        environment = manager.environment(),
        directory = %manager.config_directory().display(),
        "Configuration loaded"
    );
    print_json(cli, manager.config())
}

fn show_section(cli: &Cli, name: &str) -> Result<()> {
    let manager = load(cli)?;
    let config = manager.config();
    let section = match name {
        "executor" => serde_json::to_value(&config.executor)?,
        "sla" => serde_json::to_value(&config.sla)?,
        "events" => serde_json::to_value(&config.events)?,
        "coordinator" => serde_json::to_value(&config.coordinator)?,
        other => anyhow::bail!("unknown section '{other}' (expected executor, sla, events or coordinator)"),
    };
    print_json(cli, &section)
}

fn print_json(cli: &Cli, value: &impl serde::Serialize) -> Result<()> {
    let rendered = if cli.pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{rendered}");
    Ok(())
}
