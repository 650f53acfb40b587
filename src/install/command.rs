// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! External command execution.

use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
    process::Command,
};
use tracing::instrument;

/// Run command non-interactively inside working directory.
///
/// Arguments are handed to the program as is, never through a shell. Both
/// stdout and stderr are captured and folded into a single message with
/// trailing newlines chomped.
///
/// # Errors
///
/// - Return [`CommandError::Spawn`] if program could not be started.
/// - Return [`CommandError::Failed`] if program exits unsuccessfully.
#[instrument(skip(args), level = "debug")]
pub fn syscall_non_interactive(
    cmd: impl AsRef<OsStr> + std::fmt::Debug,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
    cwd: &Path,
) -> Result<String, CommandError> {
    let output = Command::new(cmd.as_ref())
        .args(args)
        .current_dir(cwd)
        .output()
        .map_err(|source| CommandError::Spawn {
            source,
            command: cmd.as_ref().to_string_lossy().into_owned(),
            cwd: cwd.to_path_buf(),
        })?;
    let stdout = String::from_utf8_lossy(output.stdout.as_slice()).into_owned();
    let stderr = String::from_utf8_lossy(output.stderr.as_slice()).into_owned();
    let mut message = String::new();

    if !stdout.is_empty() {
        message.push_str(format!("stdout: {stdout}").as_str());
    }

    if !stderr.is_empty() {
        if !message.is_empty() && !message.ends_with('\n') {
            message.push('\n');
        }
        message.push_str(format!("stderr: {stderr}").as_str());
    }

    // INVARIANT: Chomp trailing newlines.
    let message = message
        .strip_suffix("\r\n")
        .or(message.strip_suffix('\n'))
        .map(ToString::to_string)
        .unwrap_or(message);

    if !output.status.success() {
        return Err(CommandError::Failed {
            command: cmd.as_ref().to_string_lossy().into_owned(),
            status: output.status.code(),
            output: message,
        });
    }

    Ok(message)
}

/// External command error types.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("failed to start command {command:?} in {:?}", cwd.display())]
    Spawn {
        #[source]
        source: std::io::Error,
        command: String,
        cwd: PathBuf,
    },

    #[error(
        "command {command:?} failed with {}{}",
        status.map(|code| format!("exit code {code}")).unwrap_or_else(|| "no exit code".into()),
        if output.is_empty() { String::new() } else { format!(":\n{output}") }
    )]
    Failed {
        command: String,
        status: Option<i32>,
        output: String,
    },
}
