//! Executable probes with a hard timeout
//!
//! Used both for the installed compiler (`purs --version`) and for the
//! build tool (`stack --version`).

use crate::error::{InstallError, InstallResult};
use crate::install::cancel::CancellationToken;
use crate::install::process::exit_kind;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// How long a `--version` probe may take
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(8);

/// Run `<program> --version` and return its trimmed stdout.
///
/// Fails on spawn error, non-zero exit, or when the probe runs longer
/// than `timeout`.
pub async fn probe_version(
    program: &Path,
    timeout: Duration,
    cancel: &CancellationToken,
) -> InstallResult<String> {
    let command = format!("{} --version", program.display());
    debug!("Probing: {}", command);
    cancel.check()?;

    let output = Command::new(program)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(InstallError::Canceled),
        result = tokio::time::timeout(timeout, output) => match result {
            Ok(output) => output.map_err(|e| InstallError::command_failed(&command, e))?,
            Err(_) => {
                return Err(InstallError::Timeout {
                    command,
                    secs: timeout.as_secs(),
                })
            }
        },
    };

    if !output.status.success() {
        return Err(InstallError::Process {
            command,
            status: exit_kind(output.status),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
