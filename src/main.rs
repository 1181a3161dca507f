//! Binary entry point for class-likes.
//!
//! This binary serves the likes API and offers a few maintenance commands.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use anyhow::Context;
use clap::{Parser, Subcommand};
use class_likes::config::LikesConfig;
use class_likes::observability::{self, LoggingConfig};
use class_likes::{BackendFactory, CounterStore, server};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

/// class-likes - Shared like counters for a weekly class schedule.
#[derive(Parser)]
#[command(name = "class-likes")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Serve the likes API.
    Serve {
        /// Port to listen on.
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print the current counts as JSON.
    Show {
        /// Print only this class's count.
        #[arg(long)]
        class: Option<String>,
    },

    /// Copy counts from the legacy JSON blob into the hash layout.
    Migrate,
}

/// Main entry point.
fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    if let Err(e) = observability::init_logging(LoggingConfig::from_env(cli.verbose)) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    let config = match LikesConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        },
    };

    match run_command(cli.command, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

/// Runs the selected command.
fn run_command(command: Commands, config: LikesConfig) -> anyhow::Result<()> {
    match command {
        Commands::Serve { port } => cmd_serve(port, config),
        Commands::Show { class } => cmd_show(class, &config),
        Commands::Migrate => cmd_migrate(&config),
    }
}

fn cmd_serve(port: Option<u16>, config: LikesConfig) -> anyhow::Result<()> {
    let config = match port {
        Some(port) => config.with_port(port),
        None => config,
    };

    let store = BackendFactory::create(&config);
    if let Err(e) = store.migrate() {
        tracing::warn!(error = %e, "Legacy migration failed, will retry on first request");
    }

    server::serve(&config, Arc::clone(&store)).context("likes server failed")?;
    drop(store);
    Ok(())
}

fn cmd_show(class: Option<String>, config: &LikesConfig) -> anyhow::Result<()> {
    let store = BackendFactory::create(config);
    let snapshot = store.get_all().context("failed to read likes")?;

    match class {
        Some(class) => println!("{}", snapshot.count(&class)),
        None => {
            let body = serde_json::json!({ "likes": snapshot });
            println!("{}", serde_json::to_string_pretty(&body)?);
        },
    }
    Ok(())
}

fn cmd_migrate(config: &LikesConfig) -> anyhow::Result<()> {
    let kind = BackendFactory::select(config);
    let store = BackendFactory::try_create(kind, config)
        .with_context(|| format!("failed to open {kind} backend"))?;

    let copied = store.migrate().context("migration failed")?;
    if copied == 0 {
        println!("Nothing to migrate for the {} backend", store.backend_name());
    } else {
        println!(
            "Migrated {copied} counters into the {} backend",
            store.backend_name()
        );
    }
    Ok(())
}
