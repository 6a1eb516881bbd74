//! Error types for purs-install
//!
//! All modules use `InstallResult<T>` as their return type.

use crate::install::event::Stage;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for installer operations
pub type InstallResult<T> = Result<T, InstallError>;

/// How a subprocess ended when it did not succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// Exited with a non-zero code
    Code(i32),
    /// Terminated by a signal (Unix only)
    Signal(i32),
    /// Exit status carried neither a code nor a signal
    Unknown,
}

impl fmt::Display for ExitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "exit code {}", code),
            Self::Signal(signal) => write!(f, "terminated by signal {}", signal),
            Self::Unknown => write!(f, "unknown exit status"),
        }
    }
}

/// Coarse classification used for fallback decisions and rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    Filesystem,
    Process,
    ToolNotFound,
    UnsupportedPlatform,
    UnsupportedArchitecture,
    CacheCorruption,
    Canceled,
    InvalidOptions,
    Config,
}

/// All errors that can occur while installing
#[derive(Error, Debug)]
pub enum InstallError {
    // Network errors
    #[error("Request to {url} failed with HTTP status {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("Network error while fetching {url}: {reason}")]
    Network { url: String, reason: String },

    // Filesystem errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot install to {0}: a directory already exists at that path")]
    PathCollision(PathBuf),

    #[error("Building from source would overwrite {0}")]
    BuildOutputOccupied(PathBuf),

    #[error("Archive from {url} does not contain {entry}")]
    ArchiveEntryMissing { url: String, entry: String },

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` failed with {status}{}", format_stderr(.stderr))]
    Process {
        command: String,
        status: ExitKind,
        stderr: String,
    },

    #[error("`{command}` did not finish within {secs} seconds")]
    Timeout { command: String, secs: u64 },

    // Environment errors
    #[error("`{tool}` is required to build from source but could not be run: {reason}")]
    ToolNotFound {
        tool: String,
        reason: String,
        guidance_url: &'static str,
    },

    #[error("No prebuilt binary is published for platform {0}")]
    UnsupportedPlatform(String),

    #[error("No prebuilt binary is published for architecture {0}")]
    UnsupportedArchitecture(String),

    // Cache errors
    #[error("Cache is broken: {0}")]
    CacheCorruption(String),

    #[error("Installation canceled")]
    Canceled,

    // Configuration errors
    #[error("Invalid option: {0}")]
    InvalidOptions(String),

    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// An error annotated with the stage that produced it
    #[error("{stage} failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<InstallError>,
    },
}

fn format_stderr(stderr: &str) -> String {
    if stderr.trim().is_empty() {
        String::new()
    } else {
        format!("\n{}", stderr.trim_end())
    }
}

impl InstallError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed (spawn) error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a network error from any displayable cause
    pub fn network(url: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Network {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Tag this error with the stage that produced it.
    ///
    /// Already tagged errors keep their original stage.
    pub fn in_stage(self, stage: Stage) -> Self {
        match self {
            Self::Stage { .. } => self,
            other => Self::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// The stage this error was tagged with, if any
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// The error with any stage annotation removed
    pub fn root(&self) -> &InstallError {
        match self {
            Self::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            Self::HttpStatus { .. } | Self::Network { .. } => ErrorKind::Network,
            Self::Io { .. }
            | Self::PathCollision(_)
            | Self::BuildOutputOccupied(_)
            | Self::ArchiveEntryMissing { .. } => ErrorKind::Filesystem,
            Self::CommandFailed { .. } | Self::Process { .. } | Self::Timeout { .. } => {
                ErrorKind::Process
            }
            Self::ToolNotFound { .. } => ErrorKind::ToolNotFound,
            Self::UnsupportedPlatform(_) => ErrorKind::UnsupportedPlatform,
            Self::UnsupportedArchitecture(_) => ErrorKind::UnsupportedArchitecture,
            Self::CacheCorruption(_) => ErrorKind::CacheCorruption,
            Self::Canceled => ErrorKind::Canceled,
            Self::InvalidOptions(_) => ErrorKind::InvalidOptions,
            Self::ConfigInvalid { .. } | Self::Json(_) | Self::TomlSerialize(_) => {
                ErrorKind::Config
            }
            Self::Stage { source, .. } => source.kind(),
        }
    }

    /// Whether the error was caused by cancellation
    pub fn is_canceled(&self) -> bool {
        self.kind() == ErrorKind::Canceled
    }

    /// Whether a failure on the prebuilt path may fall back to a source build
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self.root(),
            Self::Canceled
                | Self::PathCollision(_)
                | Self::BuildOutputOccupied(_)
                | Self::ToolNotFound { .. }
        ) && !matches!(self.kind(), ErrorKind::InvalidOptions | ErrorKind::Config)
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<String> {
        match self.root() {
            Self::ToolNotFound { guidance_url, .. } => {
                Some(format!("Install stack first: {}", guidance_url))
            }
            Self::PathCollision(_) => {
                Some("Remove the directory or choose another name with --name".to_string())
            }
            Self::BuildOutputOccupied(path) => Some(format!(
                "stack always writes {}; move that file away first",
                path.display()
            )),
            Self::CacheCorruption(_) => Some("Run: purs-install cache clear".to_string()),
            Self::HttpStatus { status: 404, .. } => {
                Some("Check that the requested version or revision exists".to_string())
            }
            _ => None,
        }
    }
}
