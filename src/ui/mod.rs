//! Terminal output for purs-install
//!
//! Uses `cliclack` for styled steps and spinners and `indicatif` for
//! download/build bars, with plain-text fallback in CI and when output is
//! not a terminal.
//!
//! # Example
//!
//! ```rust,ignore
//! use purs_install::ui::{self, StageProgress, UiContext};
//!
//! let ctx = UiContext::detect();
//! ui::intro(&ctx, "purs-install");
//!
//! let progress = StageProgress::new(&ctx);
//! // feed every install event into progress.handle(&event)
//! progress.finish();
//!
//! ui::outro_success(&ctx, "Installed purs 0.15.15");
//! ```

mod context;
mod output;
mod progress;
mod prompts;

pub use context::UiContext;
pub use output::{
    intro, key_value, outro_error, outro_success, remark, section, step_error,
    step_error_detail, step_info, step_ok, step_ok_detail, step_warn, step_warn_hint,
};
pub use progress::{StageProgress, TaskSpinner};
pub use prompts::confirm;
