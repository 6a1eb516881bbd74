//! Binary acquisition strategy
//!
//! head → download-binary → check-binary, falling back to
//! check-stack → download-source → setup → build when the prebuilt path
//! fails for a recoverable reason. Locating stack starts speculatively
//! while the prebuilt archive downloads; its result is only reported if
//! the fallback is taken.

use crate::error::{InstallError, InstallResult};
use crate::install::build::build_from_source;
use crate::install::event::{Completion, Reporter, Stage};
use crate::install::fetch::{FetchRequest, ProgressFn};
use crate::install::options::{is_binary_entry, BuildOptions};
use crate::install::verify::{probe_version, PROBE_TIMEOUT};
use crate::install::{cancel::CancellationToken, prepare_target, Context};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Build tool looked up on `PATH`
pub const BUILD_TOOL: &str = "stack";

/// How the binary reached the target path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Prebuilt,
    Source,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prebuilt => write!(f, "prebuilt"),
            Self::Source => write!(f, "source"),
        }
    }
}

/// A binary placed at the target path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acquired {
    pub path: PathBuf,
    pub route: Route,
}

/// Why the prebuilt path was abandoned
#[derive(Debug)]
enum Fallback {
    /// No prebuilt exists for this platform or architecture
    Unsupported(InstallError),
    /// The prebuilt archive could not be downloaded or lacked the binary
    DownloadFailed(InstallError),
    /// The downloaded binary did not run
    VerifyFailed(InstallError),
}

impl fmt::Display for Fallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported(e) => write!(f, "no prebuilt binary: {}", e),
            Self::DownloadFailed(e) => write!(f, "prebuilt download failed: {}", e),
            Self::VerifyFailed(e) => write!(f, "prebuilt binary is unusable: {}", e),
        }
    }
}

enum Prebuilt {
    Installed,
    Fallback(Fallback),
}

/// Background lookup of the build tool, aborted if never consumed
struct ToolchainProbe {
    handle: Option<JoinHandle<InstallResult<(PathBuf, String)>>>,
}

impl ToolchainProbe {
    fn spawn(options: &BuildOptions, cancel: &CancellationToken) -> Self {
        let tool = options.build_tool.clone();
        let guidance = options.platform.stack_guidance_url();
        let cancel = cancel.clone();
        let handle = tokio::spawn(async move { locate_stack(tool, guidance, &cancel).await });
        Self {
            handle: Some(handle),
        }
    }

    async fn join(mut self) -> InstallResult<(PathBuf, String)> {
        match self.handle.take() {
            Some(handle) => handle
                .await
                .map_err(|e| InstallError::io("joining stack lookup", std::io::Error::other(e)))?,
            None => Err(InstallError::Canceled),
        }
    }
}

impl Drop for ToolchainProbe {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Find stack (explicit path or `PATH`) and query its version
pub(crate) async fn locate_stack(
    tool: Option<PathBuf>,
    guidance_url: &'static str,
    cancel: &CancellationToken,
) -> InstallResult<(PathBuf, String)> {
    let not_found = |reason: String| InstallError::ToolNotFound {
        tool: BUILD_TOOL.to_string(),
        reason,
        guidance_url,
    };

    let program = match tool {
        Some(path) => path,
        None => which::which(BUILD_TOOL).map_err(|e| not_found(e.to_string()))?,
    };

    match probe_version(&program, PROBE_TIMEOUT, cancel).await {
        Ok(version) => Ok((program, version)),
        Err(e) if e.is_canceled() => Err(e),
        Err(e) => Err(not_found(e.to_string())),
    }
}

/// Place a working binary at the target path, prebuilt first
pub(crate) async fn acquire(ctx: &Context<'_>) -> InstallResult<Acquired> {
    let mut probe = None;

    let fallback = match prebuilt(ctx, &mut probe).await? {
        Prebuilt::Installed => {
            return Ok(Acquired {
                path: ctx.options.target_path(),
                route: Route::Prebuilt,
            })
        }
        Prebuilt::Fallback(reason) => reason,
    };
    info!("Building from source ({})", fallback);

    ctx.reporter.start(Stage::CheckStack);
    let located = match probe {
        Some(probe) => probe.join().await,
        None => {
            locate_stack(
                ctx.options.build_tool.clone(),
                ctx.options.platform.stack_guidance_url(),
                ctx.cancel,
            )
            .await
        }
    };
    let stack = match located {
        Ok((path, version)) => {
            debug!("Using {} ({})", path.display(), version);
            ctx.reporter
                .complete(Stage::CheckStack, Completion::Version(version));
            path
        }
        Err(e) => {
            ctx.reporter.fail(Stage::CheckStack, &e);
            return Err(e.in_stage(Stage::CheckStack));
        }
    };

    let path = build_from_source(ctx, &stack).await?;
    Ok(Acquired {
        path,
        route: Route::Source,
    })
}

async fn prebuilt(ctx: &Context<'_>, probe: &mut Option<ToolchainProbe>) -> InstallResult<Prebuilt> {
    let reporter = ctx.reporter;

    reporter.start(Stage::Head);
    let url = match ctx.options.prebuilt_url() {
        Ok(url) => {
            reporter.complete(Stage::Head, Completion::None);
            url
        }
        Err(e) => {
            reporter.fail(Stage::Head, &e);
            return Ok(Prebuilt::Fallback(Fallback::Unsupported(e)));
        }
    };

    reporter.start(Stage::DownloadBinary);
    *probe = Some(ToolchainProbe::spawn(ctx.options, ctx.cancel));
    match download_binary(ctx, &url).await {
        Ok(()) => reporter.complete(Stage::DownloadBinary, Completion::None),
        Err(e) => {
            reporter.fail(Stage::DownloadBinary, &e);
            if !e.is_recoverable() {
                return Err(e.in_stage(Stage::DownloadBinary));
            }
            return Ok(Prebuilt::Fallback(Fallback::DownloadFailed(e)));
        }
    }

    match check_binary(ctx).await {
        Ok(_) => Ok(Prebuilt::Installed),
        Err(e) if !e.is_recoverable() => Err(e),
        Err(e) => Ok(Prebuilt::Fallback(Fallback::VerifyFailed(e))),
    }
}

async fn download_binary(ctx: &Context<'_>, url: &str) -> InstallResult<()> {
    let options = ctx.options;
    let target = options.target_path();
    prepare_target(&target).await?;

    let binary_name = options.binary_name.clone();
    let request = FetchRequest::new(url, &options.target_dir)
        .with_filter(is_binary_entry)
        .with_rename(move |_| PathBuf::from(&binary_name));

    let summary = ctx
        .source
        .fetch(&request, ctx.cancel, forward_progress(ctx.reporter, Stage::DownloadBinary))
        .await?;

    if summary.files.is_empty() {
        return Err(InstallError::ArchiveEntryMissing {
            url: url.to_string(),
            entry: options.platform.binary_file_name(),
        });
    }
    Ok(())
}

/// Run the installed binary; on failure remove it so nothing broken stays
/// at the target path.
pub(crate) async fn check_binary(ctx: &Context<'_>) -> InstallResult<String> {
    let target = ctx.options.target_path();
    ctx.reporter.start(Stage::CheckBinary);

    match probe_version(&target, PROBE_TIMEOUT, ctx.cancel).await {
        Ok(version) => {
            ctx.reporter
                .complete(Stage::CheckBinary, Completion::Version(version.clone()));
            Ok(version)
        }
        Err(e) => {
            ctx.reporter.fail(Stage::CheckBinary, &e);
            remove_quietly(&target).await;
            Err(e.in_stage(Stage::CheckBinary))
        }
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            debug!("Could not remove {}: {}", path.display(), e);
        }
    }
}

fn forward_progress(reporter: &Reporter, stage: Stage) -> ProgressFn {
    let reporter = reporter.clone();
    Arc::new(move |progress| reporter.progress(stage, progress))
}
