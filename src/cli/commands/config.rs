//! Config command - show or edit configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager};
use crate::error::{InstallError, InstallResult};
use crate::ui::{self, UiContext};
use std::path::PathBuf;

const VALID_KEYS: &[&str] = &[
    "general.verbose",
    "general.log_format",
    "install.version",
    "install.revision",
    "install.name",
    "install.dir",
    "install.cache_dir",
    "install.prebuilt_url",
    "install.source_url",
    "install.stack",
    "install.stack_args",
    "install.headers.<NAME>",
];

/// Execute the config command
pub async fn execute(args: ConfigArgs, manager: &ConfigManager, config: &Config) -> InstallResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(config)?,
        Some(ConfigAction::Path) => println!("{}", manager.path().display()),
        Some(ConfigAction::Init { force }) => init_config(manager, force).await?,
        Some(ConfigAction::Set { key, value }) => {
            let ctx = UiContext::detect();
            let mut updated = config.clone();
            set_value(&mut updated, &key, &value)?;
            manager.save(&updated).await?;
            ui::step_ok(&ctx, &format!("Set {} = {}", key, value));
        }
    }

    Ok(())
}

fn show_config(config: &Config) -> InstallResult<()> {
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

async fn init_config(manager: &ConfigManager, force: bool) -> InstallResult<()> {
    let ctx = UiContext::detect();
    let path = manager.path();

    if path.exists() && !force {
        ui::step_warn_hint(
            &ctx,
            &format!("Config already exists at {}", path.display()),
            "Use --force to overwrite",
        );
        return Ok(());
    }

    manager.save(&Config::default()).await?;
    ui::step_ok_detail(&ctx, "Configuration initialized", &path.display().to_string());

    Ok(())
}

/// Apply one dot-separated `key = value` assignment
pub fn set_value(config: &mut Config, key: &str, value: &str) -> InstallResult<()> {
    let install = &mut config.install;
    let text = || Some(value.to_string());
    let path = || Some(PathBuf::from(value));

    match key.split('.').collect::<Vec<_>>().as_slice() {
        ["general", "verbose"] => config.general.verbose = parse_bool(value)?,
        ["general", "log_format"] => match value {
            "text" | "json" => config.general.log_format = value.to_string(),
            _ => {
                return Err(InstallError::InvalidOptions(format!(
                    "log_format must be text or json, got {:?}",
                    value
                )))
            }
        },

        ["install", "version"] => {
            semver::Version::parse(value.trim_start_matches('v')).map_err(|e| {
                InstallError::InvalidOptions(format!("{:?} is not a valid version: {}", value, e))
            })?;
            install.version = text();
        }
        ["install", "revision"] => install.revision = text(),
        ["install", "name"] => install.name = text(),
        ["install", "dir"] => install.dir = path(),
        ["install", "cache_dir"] => install.cache_dir = path(),
        ["install", "prebuilt_url"] => install.prebuilt_url = text(),
        ["install", "source_url"] => install.source_url = text(),
        ["install", "stack"] => install.stack = path(),
        ["install", "stack_args"] => {
            install.stack_args = value.split_whitespace().map(str::to_string).collect();
        }
        ["install", "headers", name] if !name.is_empty() => {
            if value.is_empty() {
                install.headers.remove(*name);
            } else {
                install.headers.insert(name.to_string(), value.to_string());
            }
        }

        _ => {
            return Err(InstallError::InvalidOptions(format!(
                "unknown config key {:?} (valid keys: {})",
                key,
                VALID_KEYS.join(", ")
            )))
        }
    }

    Ok(())
}

fn parse_bool(value: &str) -> InstallResult<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(InstallError::InvalidOptions(format!(
            "Invalid boolean value: {}. Use true/false",
            value
        ))),
    }
}
