// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Command runner trait definitions.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors from running external commands.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CliError {
    /// Program was not found on the search path.
    #[error("Binary not found: {0}")]
    BinaryNotFound(String),

    /// Program did not finish in time and was killed.
    #[error("{program} timed out after {timeout:?}")]
    Timeout {
        /// Program that was killed.
        program: String,
        /// Applied timeout.
        timeout: Duration,
    },

    /// Program exited with a non-zero status.
    #[error("{program} exited with code {exit_code}: {stderr}")]
    ExitCode {
        /// Program that failed.
        program: String,
        /// Exit code, -1 when killed by a signal.
        exit_code: i32,
        /// Standard error output.
        stderr: String,
    },

    /// Program output was not what the caller expected.
    #[error("Unexpected output from {program}: {message}")]
    Output {
        /// Program whose output was rejected.
        program: String,
        /// What was wrong.
        message: String,
    },

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Captured result of one finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, -1 when killed by a signal.
    pub status: i32,
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given status and stderr.
    pub fn failed(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Whether the command exited with status 0.
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Turn a non-zero exit into `CliError::ExitCode`.
    pub fn check(self, program: &str) -> Result<Self, CliError> {
        if self.success() {
            Ok(self)
        } else {
            Err(CliError::ExitCode {
                program: program.to_string(),
                exit_code: self.status,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Runs an external program with discrete argument tokens.
///
/// Implementations never go through a shell.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runner name for logs.
    fn runner_type(&self) -> &'static str;

    /// Run `program` with `args` and capture its output.
    ///
    /// A non-zero exit is returned as output, not as an error.
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, CliError>;
}
