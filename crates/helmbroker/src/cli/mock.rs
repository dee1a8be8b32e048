// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock runner for testing.
//!
//! Records every invocation and answers with scripted outputs instead of
//! spawning helm or kubectl.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::traits::*;

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Program name as passed to the runner
    pub program: String,
    /// Argument tokens
    pub args: Vec<String>,
}

impl Invocation {
    /// First argument, usually the subcommand.
    pub fn subcommand(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }

    /// Value following `flag`, if present.
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }
}

/// Mock command runner.
///
/// Responses are matched on program and first argument; unmatched calls
/// succeed with empty output.
#[derive(Clone, Default)]
pub struct MockCommandRunner {
    invocations: Arc<Mutex<Vec<Invocation>>>,
    responses: Arc<Mutex<HashMap<(String, String), CommandOutput>>>,
}

impl MockCommandRunner {
    /// Create a mock where every command succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `program subcommand ...` with `output`.
    pub async fn respond(&self, program: &str, subcommand: &str, output: CommandOutput) {
        self.responses
            .lock()
            .await
            .insert((program.to_string(), subcommand.to_string()), output);
    }

    /// Answer `program subcommand ...` with a failure.
    pub async fn fail(&self, program: &str, subcommand: &str, stderr: &str) {
        self.respond(program, subcommand, CommandOutput::failed(1, stderr))
            .await;
    }

    /// All calls so far, in order.
    pub async fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().await.clone()
    }

    /// Calls of `program`, in order.
    pub async fn invocations_of(&self, program: &str) -> Vec<Invocation> {
        self.invocations
            .lock()
            .await
            .iter()
            .filter(|i| i.program == program)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl CommandRunner for MockCommandRunner {
    fn runner_type(&self) -> &'static str {
        "mock"
    }

    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, CliError> {
        self.invocations.lock().await.push(Invocation {
            program: program.to_string(),
            args: args.to_vec(),
        });

        let key = (
            program.to_string(),
            args.first().cloned().unwrap_or_default(),
        );
        Ok(self
            .responses
            .lock()
            .await
            .get(&key)
            .cloned()
            .unwrap_or_default())
    }
}
