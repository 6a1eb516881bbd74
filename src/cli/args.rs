//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// purs-install - install the PureScript compiler
///
/// Downloads a prebuilt `purs` binary for this platform, or builds it from
/// source with stack when no usable prebuilt exists. The last installed
/// binary is cached for fast reinstalls.
#[derive(Parser, Debug)]
#[command(name = "purs-install")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "PURS_INSTALL_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Install the compiler binary
    Install(InstallArgs),

    /// Inspect or repair the install cache
    Cache(CacheArgs),

    /// Show or edit configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

/// Arguments for the install command
#[derive(Parser, Debug, Default)]
pub struct InstallArgs {
    /// Compiler version to install (e.g. 0.15.15)
    #[arg(id = "purs_ver", long = "purs-ver", value_name = "VERSION")]
    pub version: Option<String>,

    /// Source revision to build when no prebuilt is usable (defaults to v<VERSION>)
    #[arg(long)]
    pub revision: Option<String>,

    /// File name of the installed binary.
    ///
    /// Source builds always produce `purs` in the install directory first, so
    /// a different name fails if a `purs` is already there.
    #[arg(short, long)]
    pub name: Option<String>,

    /// Directory to install into (defaults to current directory)
    #[arg(short, long)]
    pub dir: Option<PathBuf>,

    /// Cache root directory
    #[arg(long, env = "PURS_INSTALL_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Extra HTTP header for downloads, as NAME:VALUE (repeatable)
    #[arg(long = "header", value_name = "NAME:VALUE", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Base URL of prebuilt release archives
    #[arg(long, value_name = "URL")]
    pub prebuilt_url: Option<String>,

    /// Base URL of source archives
    #[arg(long, value_name = "URL")]
    pub source_url: Option<String>,

    /// Path to the stack executable (searched on PATH by default)
    #[arg(long, value_name = "PATH")]
    pub stack: Option<PathBuf>,

    /// Extra flags passed to stack, after `--`
    #[arg(last = true, value_name = "STACK_ARGS")]
    pub stack_args: Vec<String>,
}

/// Parse a `NAME:VALUE` header argument
fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected NAME:VALUE, got {:?}", raw))?;
    let name = name.trim();
    if name.is_empty() {
        return Err("header name is empty".to_string());
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., install.version)
        key: String,
        /// Value to set
        value: String,
    },
}

/// Output format for cache info
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    #[default]
    Table,
    /// JSON output
    Json,
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Subcommand for cache
    #[command(subcommand)]
    pub action: CacheAction,

    /// Cache root directory
    #[arg(long, global = true, env = "PURS_INSTALL_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Show cached entries and disk usage
    Info {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Check cached content and drop anything broken
    Verify,

    /// Remove everything from the cache
    Clear {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}
