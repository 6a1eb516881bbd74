//! Progress indicators with CI fallback

use super::context::UiContext;
use super::output;
use crate::cache::format_bytes;
use crate::install::{Completion, Event, Progress, Stage, Status};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;
use std::time::Duration;

const TICK_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ";
const MESSAGE_WIDTH: usize = 60;

/// A task spinner with CI fallback
pub struct TaskSpinner {
    spinner: Option<cliclack::ProgressBar>,
    interactive: bool,
}

impl TaskSpinner {
    pub fn new(ctx: &UiContext) -> Self {
        Self {
            spinner: None,
            interactive: ctx.use_fancy_output(),
        }
    }

    pub fn start(&mut self, message: &str) {
        if self.interactive {
            let spinner = cliclack::spinner();
            spinner.start(message);
            self.spinner = Some(spinner);
        } else {
            println!("{} {}", style("...").dim(), message);
        }
    }

    /// Stop with success message
    pub fn stop(&mut self, message: &str) {
        match self.spinner.take() {
            Some(spinner) => spinner.stop(message),
            None => println!("{} {}", style("[OK]").green(), message),
        }
    }

    /// Stop with error message
    pub fn stop_error(&mut self, message: &str) {
        match self.spinner.take() {
            Some(spinner) => spinner.error(message),
            None => println!("{} {}", style("[FAIL]").red(), message),
        }
    }
}

/// Human label for a stage while it runs
fn stage_label(stage: Stage) -> &'static str {
    match stage {
        Stage::SearchCache => "Looking for a cached binary",
        Stage::RestoreCache => "Restoring cached binary",
        Stage::CheckBinary => "Checking binary",
        Stage::Head => "Looking for a prebuilt binary",
        Stage::DownloadBinary => "Downloading prebuilt binary",
        Stage::CheckStack => "Looking for stack",
        Stage::DownloadSource => "Downloading source",
        Stage::Setup => "Installing GHC and dependencies",
        Stage::Build => "Building purs",
        Stage::WriteCache => "Caching binary",
    }
}

/// Stages whose recoverable failure leads somewhere else
fn has_fallback(stage: Stage) -> bool {
    matches!(
        stage,
        Stage::SearchCache
            | Stage::RestoreCache
            | Stage::CheckBinary
            | Stage::Head
            | Stage::DownloadBinary
    )
}

fn completion_detail(stage: Stage, completion: &Completion) -> Option<String> {
    match completion {
        Completion::None => None,
        Completion::Found(true) => Some("found".to_string()),
        Completion::Found(false) => Some("none".to_string()),
        Completion::Version(v) if stage == Stage::CheckStack => Some(format!("stack {}", v)),
        Completion::Version(v) => Some(v.clone()),
        Completion::Bytes(n) => Some(format_bytes(*n)),
    }
}

fn truncate(line: &str) -> String {
    let trimmed = line.trim();
    if trimmed.chars().count() > MESSAGE_WIDTH {
        let head: String = trimmed.chars().take(MESSAGE_WIDTH - 3).collect();
        format!("{}...", head)
    } else {
        trimmed.to_string()
    }
}

/// Renders install events: one bar or spinner per stage in interactive
/// mode, one line per stage plus build output in plain mode.
///
/// Events may arrive from a blocking extraction thread, so the current bar
/// sits behind a mutex.
pub struct StageProgress {
    ctx: UiContext,
    bar: Mutex<Option<ProgressBar>>,
}

impl StageProgress {
    pub fn new(ctx: &UiContext) -> Self {
        Self {
            ctx: ctx.clone(),
            bar: Mutex::new(None),
        }
    }

    fn swap_bar(&self, bar: Option<ProgressBar>) -> Option<ProgressBar> {
        match self.bar.lock() {
            Ok(mut guard) => std::mem::replace(&mut *guard, bar),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), bar),
        }
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        let guard = match self.bar.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(bar) = guard.as_ref() {
            f(bar);
        }
    }

    /// Render one event
    pub fn handle(&self, event: &Event) {
        let stage = event.stage;
        match &event.status {
            Status::Start => self.start(stage),
            Status::Progress(Progress::Entry {
                path,
                received,
                total,
                ..
            }) => self.with_bar(|bar| {
                if let Some(total) = total {
                    bar.set_length(*total);
                }
                bar.set_position(*received);
                bar.set_message(truncate(&path.display().to_string()));
            }),
            Status::Progress(Progress::Output(line)) => {
                if self.ctx.use_fancy_output() {
                    self.with_bar(|bar| bar.set_message(truncate(line)));
                } else {
                    output::remark(&self.ctx, line);
                }
            }
            Status::Complete(completion) => {
                self.clear();
                let label = stage_label(stage);
                match completion_detail(stage, completion) {
                    Some(detail) => output::step_ok_detail(&self.ctx, label, &detail),
                    None => output::step_ok(&self.ctx, label),
                }
            }
            Status::Fail(err) => {
                self.clear();
                let label = stage_label(stage);
                let reason = err.root().to_string();
                if stage == Stage::WriteCache {
                    output::step_warn(&self.ctx, &format!("{}: {}", label, reason));
                } else if err.is_recoverable() && has_fallback(stage) {
                    output::step_warn_hint(
                        &self.ctx,
                        &format!("{}: {}", label, reason),
                        "trying another way",
                    );
                } else {
                    output::step_error_detail(&self.ctx, label, &reason);
                }
            }
        }
    }

    fn start(&self, stage: Stage) {
        let label = stage_label(stage);
        if !self.ctx.use_fancy_output() {
            println!("{} {}", style("...").dim(), label);
            return;
        }

        let is_download = matches!(stage, Stage::DownloadBinary | Stage::DownloadSource);
        let template = if is_download {
            "  {spinner:.cyan} {prefix}  {bar:20.cyan/dim} {bytes}/{total_bytes} {msg:.dim}"
        } else {
            "  {spinner:.cyan} {prefix}  {msg:.dim}  {elapsed:.dim}"
        };
        let bar = ProgressBar::new(0);
        if let Ok(bar_style) = ProgressStyle::default_bar().template(template) {
            bar.set_style(bar_style.tick_chars(TICK_CHARS).progress_chars("━╸─"));
        }
        bar.set_prefix(label);
        bar.enable_steady_tick(Duration::from_millis(120));

        if let Some(previous) = self.swap_bar(Some(bar)) {
            previous.finish_and_clear();
        }
    }

    fn clear(&self) {
        if let Some(bar) = self.swap_bar(None) {
            bar.disable_steady_tick();
            bar.finish_and_clear();
        }
    }

    /// Finish and clear any bar still shown
    pub fn finish(&self) {
        self.clear();
    }
}
