//! Build tool subprocess runner
//!
//! Runs one command to completion, buffering stdout and streaming stderr
//! line by line. Cancellation kills the child and wins over any exit
//! status that was already on its way.

use crate::error::{ExitKind, InstallError, InstallResult};
use crate::install::cancel::CancellationToken;
use crate::install::platform::Platform;
use std::collections::VecDeque;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{ChildStderr, ChildStdout, Command};
use tracing::debug;

/// Lets stack run in a directory owned by another user (containers, sudo)
pub const ALLOW_DIFFERENT_USER: &str = "--allow-different-user";
const DENY_DIFFERENT_USER: &str = "--no-allow-different-user";

/// Max number of stderr lines kept for error messages.
const ERROR_TAIL_LINES: usize = 50;

/// Prefixes of diagnostic lines stack prints that never indicate a problem.
const NOISE_PREFIXES: &[&str] = &[
    "WARNING: filepath wildcard",
    "Warning: filepath wildcard",
    "Warning: Installation path",
    "Installation path",
];

/// Fragments of pattern-match notices GHC emits for vendored dependencies.
const NOISE_FRAGMENTS: &[&str] = &[
    "Pattern match(es) are non-exhaustive",
    "Pattern match(es) are overlapped",
    "Pattern match is redundant",
    "does not match any files",
    "not found on the PATH environment variable",
];

/// Whether a line of build output is known-benign noise
pub fn is_build_noise(line: &str) -> bool {
    let trimmed = line.trim_start();
    NOISE_PREFIXES.iter().any(|p| trimmed.starts_with(p))
        || NOISE_FRAGMENTS.iter().any(|f| trimmed.contains(f))
}

/// Drop noise lines from a block of text
pub fn filter_noise(text: &str) -> String {
    text.lines()
        .filter(|line| !is_build_noise(line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Add `--allow-different-user` in front of `args` on non-Windows platforms,
/// unless either form of the flag is already present.
pub fn with_user_flag(args: Vec<String>, platform: &Platform) -> Vec<String> {
    if platform.is_windows()
        || args
            .iter()
            .any(|a| a == ALLOW_DIFFERENT_USER || a == DENY_DIFFERENT_USER)
    {
        return args;
    }
    let mut out = Vec::with_capacity(args.len() + 1);
    out.push(ALLOW_DIFFERENT_USER.to_string());
    out.extend(args);
    out
}

/// Render a command for logs and error messages
pub fn command_line(program: &Path, args: &[String]) -> String {
    let mut line = program.display().to_string();
    for arg in args {
        line.push(' ');
        if arg.contains(char::is_whitespace) {
            line.push_str(&format!("{:?}", arg));
        } else {
            line.push_str(arg);
        }
    }
    line
}

/// Run `program` and return its stdout.
///
/// Each non-noise stderr line is passed to `on_line` as it arrives.
pub async fn run(
    program: &Path,
    args: &[String],
    cwd: Option<&Path>,
    cancel: &CancellationToken,
    on_line: &(dyn Fn(String) + Send + Sync),
) -> InstallResult<String> {
    let command = command_line(program, args);
    cancel.check()?;
    debug!("Executing: {}", command);

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| InstallError::command_failed(&command, e))?;

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        let _ = child.kill().await;
        return Err(InstallError::command_failed(
            &command,
            std::io::Error::other("child pipes unavailable"),
        ));
    };

    let collected = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        collected = collect_output(stdout, stderr, on_line) => Some(collected),
    };
    let Some((stdout, tail)) = collected else {
        debug!("Killing {} after cancellation", command);
        let _ = child.kill().await;
        return Err(InstallError::Canceled);
    };

    let status = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        status = child.wait() => Some(status),
    };
    let status = match status {
        Some(status) => status.map_err(|e| InstallError::command_failed(&command, e))?,
        None => {
            let _ = child.kill().await;
            return Err(InstallError::Canceled);
        }
    };

    cancel.check()?;

    if status.success() {
        Ok(stdout)
    } else {
        Err(InstallError::Process {
            command,
            status: exit_kind(status),
            stderr: Vec::from(tail).join("\n"),
        })
    }
}

/// Drain both pipes concurrently. Returns stdout and the last
/// non-noise stderr lines.
async fn collect_output(
    mut stdout: ChildStdout,
    stderr: ChildStderr,
    on_line: &(dyn Fn(String) + Send + Sync),
) -> (String, VecDeque<String>) {
    let mut out = Vec::new();
    let read_stdout = stdout.read_to_end(&mut out);

    let read_stderr = async {
        let mut tail = VecDeque::with_capacity(ERROR_TAIL_LINES);
        let mut reader = BufReader::new(stderr);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!("reading stderr: {}", e);
                    break;
                }
            }
            let line = String::from_utf8_lossy(&buf)
                .trim_end_matches(['\n', '\r'])
                .to_string();
            if is_build_noise(&line) {
                continue;
            }
            if tail.len() == ERROR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line.clone());
            on_line(line);
        }
        tail
    };

    let (_, tail) = tokio::join!(read_stdout, read_stderr);
    (String::from_utf8_lossy(&out).into_owned(), tail)
}

pub(crate) fn exit_kind(status: ExitStatus) -> ExitKind {
    if let Some(code) = status.code() {
        return ExitKind::Code(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ExitKind::Signal(signal);
        }
    }
    ExitKind::Unknown
}
