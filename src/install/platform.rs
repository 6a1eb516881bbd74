//! Platform and architecture detection
//!
//! Decides whether a prebuilt release exists for the running system and
//! which release archive to fetch. Prebuilt releases are published for
//! 64-bit x86 Linux, macOS and Windows only; everything else builds from
//! source.

use crate::error::{InstallError, InstallResult};
use std::fmt;

/// Base name of the compiler binary inside release archives
pub const BINARY_BASE_NAME: &str = "purs";

/// Operating system family
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Os {
    Linux,
    MacOs,
    Windows,
    /// Any other OS, by its `std::env::consts::OS` name
    Other(String),
}

impl Os {
    fn from_name(name: &str) -> Self {
        match name {
            "linux" => Self::Linux,
            "macos" => Self::MacOs,
            "windows" => Self::Windows,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Linux => "linux",
            Self::MacOs => "macos",
            Self::Windows => "windows",
            Self::Other(name) => name,
        }
    }
}

/// The running (or requested) platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: Os,
    pub arch: String,
}

impl Platform {
    /// Detect the current platform
    pub fn detect() -> Self {
        Self::new(std::env::consts::OS, std::env::consts::ARCH)
    }

    /// Build a platform from `std::env::consts`-style names
    pub fn new(os: &str, arch: &str) -> Self {
        Self {
            os: Os::from_name(os),
            arch: arch.to_string(),
        }
    }

    pub fn is_windows(&self) -> bool {
        self.os == Os::Windows
    }

    /// Executable file suffix for this platform
    pub fn exe_suffix(&self) -> &'static str {
        if self.is_windows() {
            ".exe"
        } else {
            ""
        }
    }

    /// File name of the compiler as shipped in archives and built by stack
    pub fn binary_file_name(&self) -> String {
        format!("{}{}", BINARY_BASE_NAME, self.exe_suffix())
    }

    /// Release archive label for this platform.
    ///
    /// Fails with `UnsupportedPlatform` / `UnsupportedArchitecture` when no
    /// prebuilt binary is published.
    pub fn release_label(&self) -> InstallResult<&'static str> {
        let label = match self.os {
            Os::Linux => "linux64",
            Os::MacOs => "macos",
            Os::Windows => "win64",
            Os::Other(ref name) => return Err(InstallError::UnsupportedPlatform(name.clone())),
        };
        if self.arch != "x86_64" {
            return Err(InstallError::UnsupportedArchitecture(self.arch.clone()));
        }
        Ok(label)
    }

    /// Where to learn how to install stack on this platform
    pub fn stack_guidance_url(&self) -> &'static str {
        match self.os {
            Os::MacOs => "https://docs.haskellstack.org/en/stable/install_and_upgrade/#macos",
            Os::Linux => "https://docs.haskellstack.org/en/stable/install_and_upgrade/#linux",
            Os::Windows => "https://docs.haskellstack.org/en/stable/install_and_upgrade/#windows",
            Os::Other(_) => {
                "https://docs.haskellstack.org/en/stable/install_and_upgrade/#manual-download"
            }
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.os.name(), self.arch)
    }
}
