// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runner that spawns real processes.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, warn};

use super::traits::*;

/// Spawns programs with `tokio::process` and a per-command timeout.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    timeout: Duration,
}

impl ProcessRunner {
    /// Kill any command still running after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    fn runner_type(&self) -> &'static str {
        "process"
    }

    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, CliError> {
        let start = Instant::now();
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => CliError::BinaryNotFound(program.to_string()),
                _ => CliError::Io(e),
            })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                warn!(program = %program, timeout_secs = self.timeout.as_secs(), "Command timed out, killed");
                return Err(CliError::Timeout {
                    program: program.to_string(),
                    timeout: self.timeout,
                });
            }
        };

        let status = output.status.code().unwrap_or(-1);
        debug!(
            program = %program,
            subcommand = args.first().map(String::as_str).unwrap_or(""),
            exit_code = status,
            duration_ms = start.elapsed().as_millis() as u64,
            "Command finished"
        );

        Ok(CommandOutput {
            status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
