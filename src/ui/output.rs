//! Output functions for consistent CLI formatting
//!
//! Fancy mode goes through `cliclack`; plain mode prints a bracketed tag
//! per line so CI logs stay greppable.

use super::context::UiContext;
use console::{style, StyledObject};

fn plain(tag: StyledObject<&str>, message: &str) {
    println!("  {} {}", tag, message);
}

/// Display intro banner
pub fn intro(ctx: &UiContext, title: &str) {
    if ctx.use_fancy_output() {
        cliclack::intro(style(title).cyan().bold()).ok();
    } else {
        println!("{}", style(title).cyan().bold());
    }
}

/// Display success outro
pub fn outro_success(ctx: &UiContext, message: &str) {
    if ctx.use_fancy_output() {
        cliclack::outro(style(message).green().bold()).ok();
    } else {
        println!("{} {}", style("[OK]").green(), message);
    }
}

/// Display error outro
pub fn outro_error(ctx: &UiContext, message: &str) {
    if ctx.use_fancy_output() {
        cliclack::outro(style(message).red().bold()).ok();
    } else {
        println!("{} {}", style("[ERROR]").red(), message);
    }
}

/// Display a section header
pub fn section(ctx: &UiContext, title: &str) {
    println!();
    if ctx.use_fancy_output() {
        cliclack::log::info(style(title).bold()).ok();
    } else {
        println!("{}", style(title).bold());
    }
}

pub fn step_ok(ctx: &UiContext, message: &str) {
    if ctx.use_fancy_output() {
        cliclack::log::success(message).ok();
    } else {
        plain(style("[OK]").green(), message);
    }
}

pub fn step_ok_detail(ctx: &UiContext, message: &str, detail: &str) {
    step_ok(
        ctx,
        &if ctx.use_fancy_output() {
            format!("{} ({})", message, style(detail).dim())
        } else {
            format!("{} ({})", message, detail)
        },
    );
}

pub fn step_warn(ctx: &UiContext, message: &str) {
    if ctx.use_fancy_output() {
        cliclack::log::warning(message).ok();
    } else {
        plain(style("[WARN]").yellow(), message);
    }
}

/// Warning followed by what happens next
pub fn step_warn_hint(ctx: &UiContext, message: &str, hint: &str) {
    step_warn(
        ctx,
        &if ctx.use_fancy_output() {
            format!("{} - {}", message, style(hint).dim())
        } else {
            format!("{} - {}", message, hint)
        },
    );
}

pub fn step_error(ctx: &UiContext, message: &str) {
    if ctx.use_fancy_output() {
        cliclack::log::error(message).ok();
    } else {
        plain(style("[FAIL]").red(), message);
    }
}

pub fn step_error_detail(ctx: &UiContext, message: &str, detail: &str) {
    step_error(
        ctx,
        &if ctx.use_fancy_output() {
            format!("{}: {}", message, style(detail).red())
        } else {
            format!("{}: {}", message, detail)
        },
    );
}

pub fn step_info(ctx: &UiContext, message: &str) {
    if ctx.use_fancy_output() {
        cliclack::log::info(message).ok();
    } else {
        plain(style("[INFO]").cyan(), message);
    }
}

/// Display a dimmed remark, e.g. a line of build tool output
pub fn remark(ctx: &UiContext, message: &str) {
    if ctx.use_fancy_output() {
        cliclack::log::remark(message).ok();
    } else {
        println!("    {}", style(message).dim());
    }
}

/// Print styled key-value pair
pub fn key_value(ctx: &UiContext, key: &str, value: &str) {
    if ctx.use_fancy_output() {
        println!("  {}: {}", style(key).dim(), value);
    } else {
        println!("  {}: {}", key, value);
    }
}
