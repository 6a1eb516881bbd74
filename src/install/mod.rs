//! Install workflow
//!
//! search-cache → restore-cache → check-binary on a cache hit, otherwise
//! the acquisition strategy followed by write-cache. A cached binary that
//! fails to restore or run is purged and acquisition runs once more.

pub mod acquire;
pub mod build;
pub mod cancel;
pub mod event;
pub mod fetch;
pub mod options;
pub mod platform;
pub mod process;
pub mod verify;

pub use acquire::Route;
pub use cancel::{cancellation, CancelHandle, CancellationToken};
pub use event::{Completion, Event, EventSink, Progress, Stage, Status};
pub use fetch::{ArchiveSource, FetchRequest, FetchSummary, HttpArchiveSource};
pub use options::{BuildOptions, BuildOptionsBuilder};
pub use platform::Platform;

use crate::cache::{CacheStore, EntryMetadata, FsCacheStore, IndexEntry, CACHE_KEY};
use crate::error::{InstallError, InstallResult};
use event::Reporter;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Borrowed state shared by every stage of one run
pub(crate) struct Context<'a> {
    pub options: &'a BuildOptions,
    pub source: &'a dyn ArchiveSource,
    pub reporter: &'a Reporter,
    pub cancel: &'a CancellationToken,
}

/// Make `path` writable for a fresh binary: fail if a directory is in the
/// way, remove an existing file.
pub(crate) async fn prepare_target(path: &Path) -> InstallResult<()> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => Err(InstallError::PathCollision(path.to_path_buf())),
        Ok(_) => tokio::fs::remove_file(path)
            .await
            .map_err(|e| InstallError::io(format!("removing {}", path.display()), e)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(InstallError::io(format!("inspecting {}", path.display()), e)),
    }
}

/// Where the installed binary came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Cache,
    Prebuilt,
    Source,
}

impl From<Route> for Origin {
    fn from(route: Route) -> Self {
        match route {
            Route::Prebuilt => Self::Prebuilt,
            Route::Source => Self::Source,
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cache => write!(f, "cache"),
            Self::Prebuilt => write!(f, "prebuilt release"),
            Self::Source => write!(f, "source build"),
        }
    }
}

/// Result of a successful installation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
    pub path: PathBuf,
    pub origin: Origin,
    /// Whether the cache now holds this binary
    pub cached: bool,
}

/// Orchestrates one installation
pub struct Installer {
    options: BuildOptions,
    cache: Arc<dyn CacheStore>,
    source: Arc<dyn ArchiveSource>,
    reporter: Reporter,
    cancel: CancellationToken,
}

impl Installer {
    /// Installer using HTTP downloads and the filesystem cache at
    /// `options.cache_root`
    pub fn new(options: BuildOptions) -> InstallResult<Self> {
        let source = HttpArchiveSource::new(&options.headers)?;
        let cache = FsCacheStore::new(&options.cache_root);
        Ok(Self {
            options,
            cache: Arc::new(cache),
            source: Arc::new(source),
            reporter: Reporter::new(event::discard()),
            cancel: CancellationToken::never(),
        })
    }

    pub fn with_source(mut self, source: Arc<dyn ArchiveSource>) -> Self {
        self.source = source;
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = cache;
        self
    }

    /// Subscribe to progress events
    pub fn on_event(mut self, sink: EventSink) -> Self {
        self.reporter = Reporter::new(sink);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// Run the whole workflow
    pub async fn install(&self) -> InstallResult<InstallOutcome> {
        let ctx = Context {
            options: &self.options,
            source: self.source.as_ref(),
            reporter: &self.reporter,
            cancel: &self.cancel,
        };
        let target = self.options.target_path();
        info!(
            "Installing purs {} for {} to {}",
            self.options.version,
            self.options.platform,
            target.display()
        );

        if let Some(entry) = self.search_cache().await? {
            match self.restore(&ctx, &entry).await {
                Ok(()) => {
                    return Ok(InstallOutcome {
                        path: target,
                        origin: Origin::Cache,
                        cached: true,
                    })
                }
                Err(e) if !e.is_recoverable() => return Err(e),
                Err(e) => {
                    warn!("Cached binary unusable, installing again: {}", e);
                    self.purge().await;
                }
            }
        }

        let acquired = acquire::acquire(&ctx).await?;
        let cached = self.write_cache().await;

        Ok(InstallOutcome {
            path: acquired.path,
            origin: acquired.route.into(),
            cached,
        })
    }

    async fn search_cache(&self) -> InstallResult<Option<IndexEntry>> {
        let reporter = &self.reporter;
        let id = self.options.cache_id();

        reporter.start(Stage::SearchCache);
        let found = match self.cache.lookup(CACHE_KEY).await {
            Ok(found) => found,
            Err(e) => {
                reporter.fail(Stage::SearchCache, &e);
                warn!("Cache lookup failed: {}", e);
                self.purge().await;
                self.cancel.check()?;
                return Ok(None);
            }
        };

        match found {
            Some(entry) if entry.metadata.id == id => {
                reporter.complete(Stage::SearchCache, Completion::Found(true));
                Ok(Some(entry))
            }
            Some(entry) => {
                debug!("Cached binary is {}, want {}", entry.metadata.id, id);
                reporter.complete(Stage::SearchCache, Completion::Found(false));
                self.purge().await;
                self.cancel.check()?;
                Ok(None)
            }
            None => {
                reporter.complete(Stage::SearchCache, Completion::Found(false));
                self.cancel.check()?;
                Ok(None)
            }
        }
    }

    async fn restore(&self, ctx: &Context<'_>, entry: &IndexEntry) -> InstallResult<()> {
        self.reporter.start(Stage::RestoreCache);
        match self.restore_bytes(entry).await {
            Ok(bytes) => self
                .reporter
                .complete(Stage::RestoreCache, Completion::Bytes(bytes)),
            Err(e) => {
                self.reporter.fail(Stage::RestoreCache, &e);
                return Err(e.in_stage(Stage::RestoreCache));
            }
        }

        acquire::check_binary(ctx).await.map(|_| ())
    }

    async fn restore_bytes(&self, entry: &IndexEntry) -> InstallResult<u64> {
        self.cancel.check()?;
        let data = self.cache.read(entry).await?;
        let target = self.options.target_path();

        prepare_target(&target).await?;
        tokio::fs::create_dir_all(&self.options.target_dir)
            .await
            .map_err(|e| InstallError::io(format!("creating {}", self.options.target_dir.display()), e))?;
        tokio::fs::write(&target, &data)
            .await
            .map_err(|e| InstallError::io(format!("writing {}", target.display()), e))?;
        set_mode(&target, entry.metadata.mode).await?;

        Ok(data.len() as u64)
    }

    /// Drop the cache entry and verify the store; both best-effort
    async fn purge(&self) {
        if let Err(e) = self.cache.remove(CACHE_KEY).await {
            debug!("Could not remove cache entry: {}", e);
        }
        match self.cache.verify().await {
            Ok(stats) => debug!("Cache verified: {:?}", stats),
            Err(e) => debug!("Cache verification failed: {}", e),
        }
    }

    /// Store the installed binary; failure is reported and swallowed
    async fn write_cache(&self) -> bool {
        self.reporter.start(Stage::WriteCache);
        match self.store_binary().await {
            Ok(entry) => {
                self.reporter
                    .complete(Stage::WriteCache, Completion::Bytes(entry.size));
                true
            }
            Err(e) => {
                warn!("Could not cache the installed binary: {}", e);
                self.reporter.fail(Stage::WriteCache, &e);
                false
            }
        }
    }

    async fn store_binary(&self) -> InstallResult<IndexEntry> {
        let target = self.options.target_path();
        let data = tokio::fs::read(&target)
            .await
            .map_err(|e| InstallError::io(format!("reading {}", target.display()), e))?;
        let meta = tokio::fs::metadata(&target)
            .await
            .map_err(|e| InstallError::io(format!("inspecting {}", target.display()), e))?;

        let metadata = EntryMetadata {
            id: self.options.cache_id(),
            mode: file_mode(&meta),
            size: data.len() as u64,
        };
        self.cache.write(CACHE_KEY, &data, metadata).await
    }
}

#[cfg(unix)]
fn file_mode(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(_meta: &std::fs::Metadata) -> u32 {
    0o755
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> InstallResult<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .await
        .map_err(|e| InstallError::io(format!("setting mode on {}", path.display()), e))
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> InstallResult<()> {
    Ok(())
}
