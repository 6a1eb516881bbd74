//! purs-install CLI entry point

use clap::{CommandFactory, Parser};
use console::style;
use purs_install::cli::{Cli, Commands};
use purs_install::config::{Config, ConfigManager};
use purs_install::error::InstallResult;
use std::io;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> InstallResult<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "purs-install", &mut io::stdout());
        return Ok(());
    }

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = config_manager.load().await?;

    init_logging(cli.verbose, &config);
    debug!("Using config {}", config_manager.path().display());

    match cli.command {
        Commands::Install(args) => purs_install::cli::commands::install(args, &config).await,
        Commands::Cache(args) => purs_install::cli::commands::cache(args, &config).await,
        Commands::Config(args) => {
            purs_install::cli::commands::config(args, &config_manager, &config).await
        }
        Commands::Completions { .. } => Ok(()),
    }
}

/// 0 = warn (progress output only), 1 = info, 2+ = debug
fn init_logging(verbose: u8, config: &Config) {
    let level = match verbose {
        0 if config.general.verbose => 1,
        n => n,
    };
    let filter = match level {
        0 => EnvFilter::new("purs_install=warn"),
        1 => EnvFilter::new("purs_install=info"),
        _ => EnvFilter::new("purs_install=debug"),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false);

    if config.general.log_format == "json" {
        builder.json().init();
    } else {
        builder.without_time().init();
    }
}
