//! UDT CLI
//!
//! Command-line interface for Universal Data Tool datasets.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use udt_core::{BackendKind, Config, DatasetError, DatasetManager};

mod commands;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "udt")]
#[command(about = "UDT - Universal Data Tool dataset manager")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Config file to use instead of the default location
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Collaborative session to join (implies the collaborative backend)
    #[arg(long, global = true, value_name = "ID")]
    session: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show backend, readiness and sample counts
    Status,
    /// Replace the dataset with a UDT JSON file
    Import {
        /// Dataset file
        file: PathBuf,
    },
    /// Write the full dataset as JSON
    Export {
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List samples and their annotation state
    Samples,
    /// Show one sample
    Sample {
        /// Sample index or `_id`
        target: String,
    },
    /// Print dataset changes until Ctrl-C
    Watch,
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (backend, server_url, session_id, data_dir, ...)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));
    init_logging(cli.json);

    let result = run(cli, &output).await;
    if let Err(e) = &result {
        if let Some(hint) = e
            .downcast_ref::<DatasetError>()
            .and_then(DatasetError::recovery_suggestion)
        {
            if !output.is_quiet() {
                eprintln!("hint: {}", hint);
            }
        }
    }
    result
}

async fn run(cli: Cli, output: &Output) -> Result<()> {
    let config_path = cli.config.as_deref();

    // Commands that don't need a dataset
    if let Commands::Config { command } = &cli.command {
        return handle_config_command(command.clone(), config_path, output);
    }

    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;
    if let Some(session_id) = cli.session {
        config.backend = BackendKind::Collaborative;
        config.session_id = Some(session_id);
    }

    let mut manager = DatasetManager::open(&config)
        .await
        .context("Failed to open dataset")?;

    let result = match cli.command {
        Commands::Config { .. } => unreachable!(), // Handled above
        Commands::Status => commands::status::show(&manager, &config, output).await,
        Commands::Import { file } => commands::dataset::import(&mut manager, &file, output).await,
        Commands::Export { output: path } => {
            commands::dataset::export(&manager, path.as_deref(), output).await
        }
        Commands::Samples => commands::dataset::list(&manager, output).await,
        Commands::Sample { target } => commands::dataset::sample(&manager, &target, output).await,
        Commands::Watch => commands::watch::watch(&mut manager, output).await,
    };

    manager.close().await;
    result
}

fn handle_config_command(
    command: Option<ConfigCommands>,
    config_path: Option<&std::path::Path>,
    output: &Output,
) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(config_path, output),
        Some(ConfigCommands::Set { key, value }) => {
            commands::config::set(&key, &value, config_path, output)
        }
    }
}

/// Log to stderr, filtered by RUST_LOG
fn init_logging(json: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("udt_core=info,udt=info"));

    // Ignore error if already initialized
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(!json)
        .with_writer(std::io::stderr)
        .try_init();
}
