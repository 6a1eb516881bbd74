//! Install command - place a working purs binary

use crate::cli::args::InstallArgs;
use crate::config::schema::InstallConfig;
use crate::config::Config;
use crate::error::InstallResult;
use crate::install::{cancellation, BuildOptions, Event, EventSink, Installer};
use crate::ui::{self, StageProgress, UiContext};
use std::sync::Arc;
use tracing::{debug, trace};

/// Execute the install command
pub async fn execute(args: InstallArgs, config: &Config) -> InstallResult<()> {
    let ctx = UiContext::detect();
    let options = build_options(args, &config.install)?;
    let version = options.version.clone();

    ui::intro(&ctx, &format!("Installing purs {}", version));

    let (handle, token) = cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("Interrupt received, canceling");
            handle.cancel();
        }
    });

    let progress = Arc::new(StageProgress::new(&ctx));
    let sink: EventSink = {
        let progress = Arc::clone(&progress);
        Arc::new(move |event: Event| {
            trace!("{}", event);
            progress.handle(&event);
        })
    };

    let installer = Installer::new(options)?
        .on_event(sink)
        .with_cancellation(token);
    let result = installer.install().await;
    progress.finish();

    match result {
        Ok(outcome) => {
            if !outcome.cached {
                ui::remark(&ctx, "The binary could not be cached; the next install starts over");
            }
            ui::outro_success(
                &ctx,
                &format!(
                    "Installed purs {} from {} to {}",
                    version,
                    outcome.origin,
                    outcome.path.display()
                ),
            );
            Ok(())
        }
        Err(e) => {
            if e.is_canceled() {
                ui::outro_error(&ctx, "Installation canceled");
            } else {
                ui::outro_error(&ctx, "Installation failed");
            }
            Err(e)
        }
    }
}

/// Merge command line flags over config defaults and validate
pub fn build_options(args: InstallArgs, defaults: &InstallConfig) -> InstallResult<BuildOptions> {
    let mut builder = BuildOptions::builder();

    if let Some(version) = args.version.or_else(|| defaults.version.clone()) {
        builder = builder.version(version);
    }
    if let Some(revision) = args.revision.or_else(|| defaults.revision.clone()) {
        builder = builder.revision(revision);
    }
    if let Some(name) = args.name.or_else(|| defaults.name.clone()) {
        builder = builder.binary_name(name);
    }
    if let Some(dir) = args.dir.or_else(|| defaults.dir.clone()) {
        builder = builder.target_dir(dir);
    }
    if let Some(dir) = args.cache_dir.or_else(|| defaults.cache_dir.clone()) {
        builder = builder.cache_root(dir);
    }
    if let Some(url) = args.prebuilt_url.or_else(|| defaults.prebuilt_url.clone()) {
        builder = builder.prebuilt_base_url(url);
    }
    if let Some(url) = args.source_url.or_else(|| defaults.source_url.clone()) {
        builder = builder.source_base_url(url);
    }
    if let Some(stack) = args.stack.or_else(|| defaults.stack.clone()) {
        builder = builder.build_tool(stack);
    }

    // Config headers first so a flag with the same name wins
    for (name, value) in defaults.headers.iter() {
        builder = builder.header(name.clone(), value.clone());
    }
    for (name, value) in args.headers {
        builder = builder.header(name, value);
    }

    builder
        .extra_args(defaults.stack_args.iter().cloned())
        .extra_args(args.stack_args)
        .build()
}
