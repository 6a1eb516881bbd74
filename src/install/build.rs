//! Source build pipeline
//!
//! download-source → setup → build, each gated on the previous one. The
//! source tree lives in a private temporary directory that is removed on
//! every exit path. `stack setup` is started early, as soon as
//! `stack.yaml` has been fully written, and its output is replayed when the
//! setup stage is reported.

use crate::error::{InstallError, InstallResult};
use crate::install::event::{Completion, Progress, Stage};
use crate::install::fetch::{FetchRequest, ProgressFn};
use crate::install::options::BuildOptions;
use crate::install::process::{self, with_user_flag};
use crate::install::{prepare_target, Context};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Build manifest whose arrival allows `stack setup` to start
pub const MANIFEST: &str = "stack.yaml";

/// Cabal flag selecting the release build
pub const RELEASE_FLAG: &str = "--flag=purescript:RELEASE";

/// Prefix of per-run temporary build directories
pub const TEMP_DIR_PREFIX: &str = "purs-install-";

const BOILERPLATE: &[&str] = &["README", "CHANGELOG", "CONTRIBUTORS", "CONTRIBUTING", "LICENSE"];
const SKIPPED_DIRS: &[&str] = &["ci", "appveyor"];

/// Whether a source archive entry is needed to build.
///
/// Drops documentation, dotfiles, CI configuration and license/readme
/// boilerplate. The root `LICENSE` stays because the package description
/// names it.
pub fn is_build_input(path: &Path) -> bool {
    let parts: Vec<&str> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect();
    let Some((name, _)) = parts.split_last() else {
        return false;
    };

    if parts.iter().any(|p| p.starts_with('.')) {
        return false;
    }
    if SKIPPED_DIRS
        .iter()
        .any(|dir| parts[0] == *dir || parts[0].starts_with(&format!("{}.", dir)))
    {
        return false;
    }

    let lower = name.to_ascii_lowercase();
    if lower.ends_with(".md") || lower.ends_with(".markdown") {
        return false;
    }

    let upper = name.to_ascii_uppercase();
    let stem = upper.split('.').next().unwrap_or_default();
    if BOILERPLATE.contains(&stem) {
        return parts.len() == 1 && *name == "LICENSE";
    }

    true
}

/// Temporary build directory removed on drop
struct BuildDir {
    path: PathBuf,
    removed: bool,
}

impl BuildDir {
    async fn create() -> InstallResult<Self> {
        let path = std::env::temp_dir().join(format!("{}{}", TEMP_DIR_PREFIX, uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| InstallError::io(format!("creating {}", path.display()), e))?;
        debug!("Build directory: {}", path.display());
        Ok(Self {
            path,
            removed: false,
        })
    }

    async fn remove(mut self) {
        self.removed = true;
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", self.path.display(), e),
        }
    }
}

impl Drop for BuildDir {
    fn drop(&mut self) {
        if !self.removed {
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }
}

type SetupTask = JoinHandle<Option<InstallResult<String>>>;

/// Build the compiler from source with `stack` and place it at the target path
pub(crate) async fn build_from_source(ctx: &Context<'_>, stack: &Path) -> InstallResult<PathBuf> {
    check_build_output(ctx.options).await?;
    let dir = BuildDir::create().await?;
    let result = run_stages(ctx, stack, &dir.path).await;
    dir.remove().await;
    result
}

/// `stack install` writes `<target dir>/purs` whatever `--name` says, so a
/// differently named install must not clobber a `purs` already there.
async fn check_build_output(options: &BuildOptions) -> InstallResult<()> {
    let built = options.target_dir.join(options.platform.binary_file_name());
    if built == options.target_path() {
        return Ok(());
    }
    match tokio::fs::symlink_metadata(&built).await {
        Ok(_) => Err(InstallError::BuildOutputOccupied(built)),
        Err(_) => Ok(()),
    }
}

async fn run_stages(ctx: &Context<'_>, stack: &Path, dir: &Path) -> InstallResult<PathBuf> {
    let options = ctx.options;
    let reporter = ctx.reporter;

    // download-source, with setup kicked off once the manifest lands
    reporter.start(Stage::DownloadSource);

    let (manifest_tx, manifest_rx) = oneshot::channel::<()>();
    let (lines_tx, mut lines_rx) = mpsc::unbounded_channel::<String>();
    let setup_args = with_user_flag(setup_args(&options.extra_args.shared), &options.platform);
    let mut setup_task = spawn_early_setup(
        manifest_rx,
        stack.to_path_buf(),
        setup_args.clone(),
        dir.to_path_buf(),
        ctx.cancel.clone(),
        lines_tx,
    );

    let request = FetchRequest::new(options.source_url(), dir).with_filter(is_build_input);
    let on_progress = manifest_watcher(reporter.clone(), manifest_tx);

    if let Err(e) = ctx.source.fetch(&request, ctx.cancel, on_progress).await {
        setup_task.abort();
        let _ = (&mut setup_task).await;
        reporter.fail(Stage::DownloadSource, &e);
        return Err(e.in_stage(Stage::DownloadSource));
    }
    reporter.complete(Stage::DownloadSource, Completion::None);

    // setup
    reporter.start(Stage::Setup);
    let joined = loop {
        tokio::select! {
            Some(line) = lines_rx.recv() => reporter.output(Stage::Setup, line),
            joined = &mut setup_task => break joined,
        }
    };
    while let Ok(line) = lines_rx.try_recv() {
        reporter.output(Stage::Setup, line);
    }

    let setup = match joined {
        Ok(Some(result)) => result,
        Ok(None) => {
            debug!("{} not seen during download, running setup now", MANIFEST);
            let on_line = |line: String| reporter.output(Stage::Setup, line);
            process::run(stack, &setup_args, Some(dir), ctx.cancel, &on_line).await
        }
        Err(e) => Err(InstallError::io(
            "joining stack setup",
            std::io::Error::other(e),
        )),
    };
    if let Err(e) = setup {
        reporter.fail(Stage::Setup, &e);
        return Err(e.in_stage(Stage::Setup));
    }
    reporter.complete(Stage::Setup, Completion::None);

    // build
    reporter.start(Stage::Build);
    match compile(ctx, stack, dir).await {
        Ok(path) => {
            reporter.complete(Stage::Build, Completion::None);
            Ok(path)
        }
        Err(e) => {
            reporter.fail(Stage::Build, &e);
            Err(e.in_stage(Stage::Build))
        }
    }
}

fn setup_args(shared: &[String]) -> Vec<String> {
    let mut args = vec!["setup".to_string()];
    args.extend(shared.iter().cloned());
    args
}

/// Arguments for `stack install`
pub fn install_args(local_bin: &Path, shared: &[String], install_only: &[String]) -> Vec<String> {
    let mut args = vec![
        "install".to_string(),
        format!("--local-bin-path={}", local_bin.display()),
        RELEASE_FLAG.to_string(),
    ];
    args.extend(shared.iter().cloned());
    args.extend(install_only.iter().cloned());
    args
}

/// Forward entry progress and signal once the manifest is fully written
fn manifest_watcher(reporter: crate::install::event::Reporter, tx: oneshot::Sender<()>) -> ProgressFn {
    let tx = Mutex::new(Some(tx));
    Arc::new(move |progress: Progress| {
        if let Progress::Entry {
            path,
            written,
            size,
            ..
        } = &progress
        {
            if path == Path::new(MANIFEST) && written == size {
                let sender = match tx.lock() {
                    Ok(mut guard) => guard.take(),
                    Err(poisoned) => poisoned.into_inner().take(),
                };
                if let Some(sender) = sender {
                    debug!("{} received, starting setup early", MANIFEST);
                    let _ = sender.send(());
                }
            }
        }
        reporter.progress(Stage::DownloadSource, progress);
    })
}

fn spawn_early_setup(
    manifest: oneshot::Receiver<()>,
    stack: PathBuf,
    args: Vec<String>,
    dir: PathBuf,
    cancel: crate::install::cancel::CancellationToken,
    lines: mpsc::UnboundedSender<String>,
) -> SetupTask {
    tokio::spawn(async move {
        manifest.await.ok()?;
        let on_line = move |line: String| {
            let _ = lines.send(line);
        };
        Some(process::run(&stack, &args, Some(&dir), &cancel, &on_line).await)
    })
}

async fn compile(ctx: &Context<'_>, stack: &Path, dir: &Path) -> InstallResult<PathBuf> {
    let options = ctx.options;
    tokio::fs::create_dir_all(&options.target_dir)
        .await
        .map_err(|e| InstallError::io(format!("creating {}", options.target_dir.display()), e))?;

    let args = with_user_flag(
        install_args(
            &options.target_dir,
            &options.extra_args.shared,
            &options.extra_args.install_only,
        ),
        &options.platform,
    );
    let on_line = |line: String| ctx.reporter.output(Stage::Build, line);
    process::run(stack, &args, Some(dir), ctx.cancel, &on_line).await?;

    let built = options.target_dir.join(options.platform.binary_file_name());
    let target = options.target_path();
    if !built.is_file() {
        return Err(InstallError::io(
            format!("stack install did not produce {}", built.display()),
            std::io::Error::from(std::io::ErrorKind::NotFound),
        ));
    }
    if built != target {
        prepare_target(&target).await?;
        relocate(&built, &target).await?;
    }
    Ok(target)
}

/// Move `from` to `to`; a no-op when they are the same path
pub(crate) async fn relocate(from: &Path, to: &Path) -> InstallResult<()> {
    if from == to {
        return Ok(());
    }
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to)
        .await
        .map_err(|e| InstallError::io(format!("copying {} to {}", from.display(), to.display()), e))?;
    tokio::fs::remove_file(from)
        .await
        .map_err(|e| InstallError::io(format!("removing {}", from.display()), e))
}
