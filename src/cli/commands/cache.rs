//! Cache command - inspect and repair the install cache

use crate::cache::{format_bytes, CacheStore, FsCacheStore, IndexEntry};
use crate::cli::args::{CacheAction, CacheArgs, OutputFormat};
use crate::config::Config;
use crate::error::InstallResult;
use crate::install::options::default_cache_root;
use crate::ui::{self, TaskSpinner, UiContext};
use console::style;
use serde::Serialize;
use std::path::PathBuf;

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> InstallResult<()> {
    let root = resolve_root(args.cache_dir, config);
    let store = FsCacheStore::new(root);

    match args.action {
        CacheAction::Info { format } => show_info(&store, format).await,
        CacheAction::Verify => verify(&store).await,
        CacheAction::Clear { yes } => clear(&store, yes).await,
    }
}

/// `--cache-dir`, then config, then the platform default
pub fn resolve_root(flag: Option<PathBuf>, config: &Config) -> PathBuf {
    flag.or_else(|| config.install.cache_dir.clone())
        .unwrap_or_else(default_cache_root)
}

#[derive(Serialize)]
struct CacheInfo<'a> {
    root: String,
    disk_usage: u64,
    entries: &'a [IndexEntry],
}

async fn show_info(store: &FsCacheStore, format: OutputFormat) -> InstallResult<()> {
    let entries = store.entries().await?;
    let usage = store.disk_usage().await?;

    match format {
        OutputFormat::Json => {
            let info = CacheInfo {
                root: store.root().display().to_string(),
                disk_usage: usage,
                entries: &entries,
            };
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        OutputFormat::Table => print_table(&UiContext::detect(), store, &entries, usage),
    }
    Ok(())
}

fn print_table(ctx: &UiContext, store: &FsCacheStore, entries: &[IndexEntry], usage: u64) {
    ui::key_value(ctx, "Cache root", &store.root().display().to_string());
    if entries.is_empty() {
        println!("No cached binaries.");
        return;
    }

    ui::section(ctx, "Cached binaries");
    println!("{:<24} {:<28} {:>10} {:<6} {:<16}", "KEY", "ID", "SIZE", "MODE", "CACHED");
    println!("{}", "-".repeat(88));
    for entry in entries {
        println!(
            "{:<24} {:<28} {:>10} {:<6} {:<16}",
            entry.key,
            entry.metadata.id,
            format_bytes(entry.size),
            format!("{:o}", entry.metadata.mode),
            entry.time.format("%Y-%m-%d %H:%M")
        );
    }
    println!();
    println!("Total: {} entry(s), {}", entries.len(), format_bytes(usage));
}

async fn verify(store: &FsCacheStore) -> InstallResult<()> {
    let ctx = UiContext::detect();
    let mut spinner = TaskSpinner::new(&ctx);
    spinner.start("Verifying cache...");

    match store.verify().await {
        Ok(stats) => {
            spinner.stop(&format!("Verified {} blob(s)", stats.verified));
            if stats.removed_content + stats.removed_index > 0 {
                ui::step_warn(
                    &ctx,
                    &format!(
                        "Removed {} broken blob(s) and {} index entry(s), reclaimed {}",
                        stats.removed_content,
                        stats.removed_index,
                        format_bytes(stats.reclaimed)
                    ),
                );
            } else {
                ui::step_info(&ctx, "No problems found");
            }
            Ok(())
        }
        Err(e) => {
            spinner.stop_error("Verification failed");
            Err(e)
        }
    }
}

async fn clear(store: &FsCacheStore, yes: bool) -> InstallResult<()> {
    let ctx = UiContext::detect().with_auto_yes(yes);
    let entries = store.entries().await?;

    if entries.is_empty() && store.disk_usage().await? == 0 {
        println!("Cache is already empty.");
        return Ok(());
    }

    println!("This will remove {} cached binary(s):", entries.len());
    for entry in &entries {
        println!("  {} {}", style("•").red(), entry.metadata.id);
    }

    if !ui::confirm(&ctx, "Clear the cache?", false).await? {
        ui::remark(&ctx, "Aborted. Pass --yes to clear without asking.");
        return Ok(());
    }

    store.clear().await?;
    ui::step_ok(&ctx, "Cache cleared");
    Ok(())
}
