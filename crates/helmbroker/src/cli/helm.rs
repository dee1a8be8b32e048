// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Package-manager invocations scoped to one instance.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use super::traits::*;

/// Registry config location under the instance directory.
pub const REGISTRY_CONFIG_SUFFIX: &str = ".config/helm/registry.json";
/// Repository cache location under the instance directory.
pub const REPOSITORY_CACHE_SUFFIX: &str = ".cache/helm/repository";
/// Repository config location under the instance directory.
pub const REPOSITORY_CONFIG_SUFFIX: &str = ".config/helm/repository";

/// Helm driven through a [`CommandRunner`].
///
/// Every call gets the three location overrides of the instance appended,
/// so instances sharing a host never share registry or repository state.
/// The release name is always the instance id.
#[derive(Clone)]
pub struct Helm {
    runner: Arc<dyn CommandRunner>,
    bin: String,
    instances_dir: PathBuf,
}

impl Helm {
    /// Run `bin` via `runner`; instance directories live under `instances_dir`.
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        bin: impl Into<String>,
        instances_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            bin: bin.into(),
            instances_dir: instances_dir.into(),
        }
    }

    /// The per-instance `--registry-config`, `--repository-cache` and
    /// `--repository-config` arguments.
    pub fn location_overrides(&self, instance_id: &str) -> Vec<String> {
        let base = self.instances_dir.join(instance_id);
        vec![
            "--registry-config".to_string(),
            path_arg(&base.join(REGISTRY_CONFIG_SUFFIX)),
            "--repository-cache".to_string(),
            path_arg(&base.join(REPOSITORY_CACHE_SUFFIX)),
            "--repository-config".to_string(),
            path_arg(&base.join(REPOSITORY_CONFIG_SUFFIX)),
        ]
    }

    /// Run helm with `args` plus the location overrides. Output is returned
    /// whatever the exit status.
    pub async fn run(&self, instance_id: &str, mut args: Vec<String>) -> Result<CommandOutput, CliError> {
        args.extend(self.location_overrides(instance_id));
        self.runner.run(&self.bin, &args).await
    }

    /// `helm install <id> <chart> --namespace <ns> --create-namespace <values_args>`
    pub async fn install(
        &self,
        instance_id: &str,
        namespace: &str,
        chart: &Path,
        values_args: Vec<String>,
    ) -> Result<CommandOutput, CliError> {
        let mut args = vec![
            "install".to_string(),
            instance_id.to_string(),
            path_arg(chart),
            "--namespace".to_string(),
            namespace.to_string(),
            "--create-namespace".to_string(),
        ];
        args.extend(values_args);
        let output = self.run(instance_id, args).await?.check(&self.bin)?;
        info!(instance_id = %instance_id, namespace = %namespace, "Release installed");
        Ok(output)
    }

    /// `helm upgrade <id> <chart> --namespace <ns> <values_args>`
    pub async fn upgrade(
        &self,
        instance_id: &str,
        namespace: &str,
        chart: &Path,
        values_args: Vec<String>,
    ) -> Result<CommandOutput, CliError> {
        let mut args = vec![
            "upgrade".to_string(),
            instance_id.to_string(),
            path_arg(chart),
            "--namespace".to_string(),
            namespace.to_string(),
        ];
        args.extend(values_args);
        let output = self.run(instance_id, args).await?.check(&self.bin)?;
        info!(instance_id = %instance_id, namespace = %namespace, "Release upgraded");
        Ok(output)
    }

    /// `helm uninstall <id> --namespace <ns>`
    pub async fn uninstall(&self, instance_id: &str, namespace: &str) -> Result<CommandOutput, CliError> {
        let args = vec![
            "uninstall".to_string(),
            instance_id.to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
        ];
        let output = self.run(instance_id, args).await?.check(&self.bin)?;
        info!(instance_id = %instance_id, namespace = %namespace, "Release uninstalled");
        Ok(output)
    }

    /// `helm status <id> --namespace <ns> -o json`, parsed.
    pub async fn status(&self, instance_id: &str, namespace: &str) -> Result<serde_json::Value, CliError> {
        let args = vec![
            "status".to_string(),
            instance_id.to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
            "-o".to_string(),
            "json".to_string(),
        ];
        let output = self.run(instance_id, args).await?.check(&self.bin)?;
        serde_json::from_str(&output.stdout).map_err(|e| CliError::Output {
            program: self.bin.clone(),
            message: e.to_string(),
        })
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::MockCommandRunner;
    use serde_json::json;

    fn helm(mock: &MockCommandRunner) -> Helm {
        Helm::new(Arc::new(mock.clone()), "helm", "/srv/instances")
    }

    #[tokio::test]
    async fn test_every_call_gets_location_overrides() {
        let mock = MockCommandRunner::new();
        helm(&mock)
            .uninstall("inst-1", "team-a")
            .await
            .unwrap();

        let calls = mock.invocations_of("helm").await;
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].args,
            vec![
                "uninstall",
                "inst-1",
                "--namespace",
                "team-a",
                "--registry-config",
                "/srv/instances/inst-1/.config/helm/registry.json",
                "--repository-cache",
                "/srv/instances/inst-1/.cache/helm/repository",
                "--repository-config",
                "/srv/instances/inst-1/.config/helm/repository",
            ]
        );
    }

    #[tokio::test]
    async fn test_install_failure_is_error() {
        let mock = MockCommandRunner::new();
        mock.fail("helm", "install", "chart not found").await;
        let err = helm(&mock)
            .install("inst-1", "default", Path::new("/charts/redis"), vec![])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("chart not found"));
    }

    #[tokio::test]
    async fn test_status_parses_json() {
        let mock = MockCommandRunner::new();
        mock.respond(
            "helm",
            "status",
            CommandOutput::ok(r#"{"name":"inst-1","info":{"status":"deployed"}}"#),
        )
        .await;
        let status = helm(&mock).status("inst-1", "default").await.unwrap();
        assert_eq!(status["info"], json!({"status": "deployed"}));
    }
}
