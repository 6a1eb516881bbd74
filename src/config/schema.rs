//! Configuration schema for purs-install
//!
//! Configuration is stored at `~/.config/purs-install/config.toml`

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Defaults for `install`
    pub install: InstallConfig,
}

/// General application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Enable verbose logging
    pub verbose: bool,

    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            log_format: "text".to_string(),
        }
    }
}

/// Install defaults; command line flags take precedence
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallConfig {
    /// Compiler version
    pub version: Option<String>,

    /// Source revision for builds from source
    pub revision: Option<String>,

    /// Installed binary name
    pub name: Option<String>,

    /// Install directory
    pub dir: Option<PathBuf>,

    /// Cache root directory
    pub cache_dir: Option<PathBuf>,

    /// Base URL of prebuilt release archives
    pub prebuilt_url: Option<String>,

    /// Base URL of source archives
    pub source_url: Option<String>,

    /// Path to the stack executable
    pub stack: Option<PathBuf>,

    /// Extra flags passed to stack
    pub stack_args: Vec<String>,

    /// Extra HTTP headers sent with every download
    pub headers: BTreeMap<String, String>,
}
