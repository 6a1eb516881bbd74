//! Validated build options
//!
//! Everything the workflow needs is collected and checked here, once,
//! before any network or filesystem work starts.

use crate::error::{InstallError, InstallResult};
use crate::install::platform::Platform;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Url;
use std::path::{Path, PathBuf};

/// Compiler version installed when none is requested
pub const DEFAULT_VERSION: &str = "0.15.15";

/// Where prebuilt release archives are published
pub const DEFAULT_PREBUILT_URL: &str = "https://github.com/purescript/purescript/releases/download";

/// Where source archives for a revision are served
pub const DEFAULT_SOURCE_URL: &str = "https://github.com/purescript/purescript/archive";

/// stack flags that only make sense for `stack install`
pub const INSTALL_ONLY_FLAGS: &[&str] = &[
    "--dry-run",
    "--pedantic",
    "--fast",
    "--only-snapshot",
    "--only-dependencies",
    "--only-locals",
    "--file-watch",
    "--file-watch-poll",
    "--haddock",
    "--no-haddock",
    "--haddock-deps",
    "--no-haddock-deps",
    "--copy-bins",
    "--no-copy-bins",
    "--force-dirty",
    "--no-run-tests",
    "--no-run-benchmarks",
    "--keep-going",
    "--no-keep-going",
];

/// Flags the installer sets itself and refuses from callers
const RESERVED_FLAGS: &[&str] = &["--local-bin-path"];

/// Caller-supplied stack flags, split by where they are passed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtraArgs {
    /// Passed to both `stack setup` and `stack install`
    pub shared: Vec<String>,
    /// Passed to `stack install` only
    pub install_only: Vec<String>,
}

impl ExtraArgs {
    /// Partition flags using [`INSTALL_ONLY_FLAGS`].
    ///
    /// `--flag=value` forms are matched on the part before `=`.
    pub fn partition(args: &[String]) -> Self {
        let mut out = Self::default();
        for arg in args {
            if INSTALL_ONLY_FLAGS.contains(&flag_name(arg)) {
                out.install_only.push(arg.clone());
            } else {
                out.shared.push(arg.clone());
            }
        }
        out
    }
}

fn flag_name(arg: &str) -> &str {
    arg.split_once('=').map_or(arg, |(name, _)| name)
}

/// Immutable options for one installation
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub version: semver::Version,
    /// Source revision (tag or commit) used for source builds
    pub revision: String,
    /// File name of the installed binary
    pub binary_name: String,
    /// Directory the binary is installed into
    pub target_dir: PathBuf,
    /// Root directory of the persistent cache store
    pub cache_root: PathBuf,
    pub extra_args: ExtraArgs,
    /// Extra HTTP request headers
    pub headers: Vec<(String, String)>,
    pub prebuilt_base_url: String,
    pub source_base_url: String,
    /// Explicit stack executable; searched on `PATH` when unset
    pub build_tool: Option<PathBuf>,
    pub platform: Platform,
}

impl BuildOptions {
    pub fn builder() -> BuildOptionsBuilder {
        BuildOptionsBuilder::default()
    }

    /// Full path of the installed binary
    pub fn target_path(&self) -> PathBuf {
        self.target_dir.join(&self.binary_name)
    }

    /// Cache identity: `<version>-<os>-<arch>`
    pub fn cache_id(&self) -> String {
        format!("{}-{}", self.version, self.platform)
    }

    /// URL of the prebuilt archive for this platform
    pub fn prebuilt_url(&self) -> InstallResult<String> {
        let label = self.platform.release_label()?;
        Ok(format!(
            "{}/v{}/{}.tar.gz",
            self.prebuilt_base_url.trim_end_matches('/'),
            self.version,
            label
        ))
    }

    /// URL of the source archive for the configured revision
    pub fn source_url(&self) -> String {
        format!(
            "{}/{}.tar.gz",
            self.source_base_url.trim_end_matches('/'),
            self.revision
        )
    }
}

/// Collects raw option values and validates them into [`BuildOptions`]
#[derive(Debug, Default, Clone)]
pub struct BuildOptionsBuilder {
    version: Option<String>,
    revision: Option<String>,
    binary_name: Option<String>,
    target_dir: Option<PathBuf>,
    cache_root: Option<PathBuf>,
    extra_args: Vec<String>,
    headers: Vec<(String, String)>,
    prebuilt_base_url: Option<String>,
    source_base_url: Option<String>,
    build_tool: Option<PathBuf>,
    platform: Option<Platform>,
}

impl BuildOptionsBuilder {
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    pub fn binary_name(mut self, name: impl Into<String>) -> Self {
        self.binary_name = Some(name.into());
        self
    }

    pub fn target_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.target_dir = Some(dir.into());
        self
    }

    pub fn cache_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_root = Some(dir.into());
        self
    }

    pub fn extra_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn prebuilt_base_url(mut self, url: impl Into<String>) -> Self {
        self.prebuilt_base_url = Some(url.into());
        self
    }

    pub fn source_base_url(mut self, url: impl Into<String>) -> Self {
        self.source_base_url = Some(url.into());
        self
    }

    pub fn build_tool(mut self, path: impl Into<PathBuf>) -> Self {
        self.build_tool = Some(path.into());
        self
    }

    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Validate and freeze the options
    pub fn build(self) -> InstallResult<BuildOptions> {
        let raw_version = self.version.as_deref().unwrap_or(DEFAULT_VERSION);
        let version = parse_version(raw_version)?;

        let revision = match self.revision {
            Some(rev) => {
                let rev = rev.trim().to_string();
                if rev.is_empty() || rev.chars().any(char::is_whitespace) || rev.contains("..") {
                    return Err(InstallError::InvalidOptions(format!(
                        "invalid revision {:?}",
                        rev
                    )));
                }
                rev
            }
            None => format!("v{}", version),
        };

        let platform = self.platform.unwrap_or_else(Platform::detect);

        let binary_name = match self.binary_name {
            Some(name) => validate_binary_name(name)?,
            None => platform.binary_file_name(),
        };

        let target_dir = match self.target_dir {
            Some(dir) => absolutize(dir)?,
            None => std::env::current_dir()
                .map_err(|e| InstallError::io("getting current directory", e))?,
        };

        let cache_root = match self.cache_root {
            Some(dir) => absolutize(dir)?,
            None => default_cache_root(),
        };

        for arg in &self.extra_args {
            if arg.is_empty() {
                return Err(InstallError::InvalidOptions(
                    "empty stack argument".to_string(),
                ));
            }
            if RESERVED_FLAGS.contains(&flag_name(arg)) {
                return Err(InstallError::InvalidOptions(format!(
                    "{} is set by the installer and cannot be overridden",
                    flag_name(arg)
                )));
            }
        }

        for (name, value) in &self.headers {
            HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                InstallError::InvalidOptions(format!("invalid header name {:?}", name))
            })?;
            HeaderValue::from_str(value).map_err(|_| {
                InstallError::InvalidOptions(format!("invalid value for header {}", name))
            })?;
        }

        let prebuilt_base_url = validate_url(
            self.prebuilt_base_url
                .unwrap_or_else(|| DEFAULT_PREBUILT_URL.to_string()),
        )?;
        let source_base_url = validate_url(
            self.source_base_url
                .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
        )?;

        Ok(BuildOptions {
            version,
            revision,
            binary_name,
            target_dir,
            cache_root,
            extra_args: ExtraArgs::partition(&self.extra_args),
            headers: self.headers,
            prebuilt_base_url,
            source_base_url,
            build_tool: self.build_tool,
            platform,
        })
    }
}

/// Default cache root: `<user cache dir>/purs-install`
pub fn default_cache_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("purs-install")
}

fn parse_version(raw: &str) -> InstallResult<semver::Version> {
    let trimmed = raw.trim().trim_start_matches('v');
    semver::Version::parse(trimmed).map_err(|e| {
        InstallError::InvalidOptions(format!("{:?} is not a valid version: {}", raw, e))
    })
}

fn validate_binary_name(name: String) -> InstallResult<String> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\');
    if invalid {
        return Err(InstallError::InvalidOptions(format!(
            "{:?} is not a valid binary name",
            name
        )));
    }
    Ok(name)
}

fn validate_url(url: String) -> InstallResult<String> {
    let parsed = Url::parse(&url)
        .map_err(|e| InstallError::InvalidOptions(format!("invalid URL {:?}: {}", url, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(url),
        other => Err(InstallError::InvalidOptions(format!(
            "unsupported URL scheme {:?} in {}",
            other, url
        ))),
    }
}

fn absolutize(path: PathBuf) -> InstallResult<PathBuf> {
    if path.is_absolute() {
        return Ok(path);
    }
    let cwd = std::env::current_dir().map_err(|e| InstallError::io("getting current directory", e))?;
    Ok(cwd.join(path))
}

/// Whether `path` names the binary inside a release archive,
/// ignoring an executable suffix.
pub fn is_binary_entry(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    path.components().count() == 1
        && name.strip_suffix(".exe").unwrap_or(name) == crate::install::platform::BINARY_BASE_NAME
}
