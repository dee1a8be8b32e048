// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Credential lookups against cluster objects.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use super::traits::*;
use crate::error::{Error, Result};

/// A named cluster object and the jsonpath expression to read from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectKeyRef {
    /// Object name
    pub name: String,
    /// Expression passed to `-o jsonpath=`
    pub jsonpath: String,
}

/// Where a credential value comes from. Exactly one reference is expected;
/// when several are set the first of service, config map, secret wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueFrom {
    /// Read from a Service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_ref: Option<ObjectKeyRef>,
    /// Read from a ConfigMap
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_ref: Option<ObjectKeyRef>,
    /// Read from a Secret, value is base64-decoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key_ref: Option<ObjectKeyRef>,
}

/// kubectl driven through a [`CommandRunner`].
#[derive(Clone)]
pub struct Kubectl {
    runner: Arc<dyn CommandRunner>,
    bin: String,
}

impl Kubectl {
    /// Run `bin` via `runner`.
    pub fn new(runner: Arc<dyn CommandRunner>, bin: impl Into<String>) -> Self {
        Self {
            runner,
            bin: bin.into(),
        }
    }

    /// Resolve one credential value in `namespace`.
    pub async fn credential_value(&self, namespace: &str, source: &ValueFrom) -> Result<String> {
        if let Some(svc) = &source.service_ref {
            return self.get("svc", namespace, svc).await;
        }
        if let Some(cm) = &source.config_map_ref {
            return self.get("cm", namespace, cm).await;
        }
        if let Some(secret) = &source.secret_key_ref {
            let encoded = self.get("secret", namespace, secret).await?;
            let decoded = STANDARD
                .decode(encoded.trim())
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
                .ok_or_else(|| {
                    Error::Cli(CliError::Output {
                        program: self.bin.clone(),
                        message: format!("secret {} value is not base64 text", secret.name),
                    })
                })?;
            return Ok(decoded);
        }
        Err(Error::InvalidRequest("invalid valueFrom".to_string()))
    }

    async fn get(&self, kind: &str, namespace: &str, target: &ObjectKeyRef) -> Result<String> {
        let args = vec![
            "get".to_string(),
            kind.to_string(),
            target.name.clone(),
            "-n".to_string(),
            namespace.to_string(),
            "-o".to_string(),
            format!("jsonpath={}", target.jsonpath),
        ];
        let output = self.runner.run(&self.bin, &args).await?.check(&self.bin)?;
        debug!(kind = %kind, name = %target.name, namespace = %namespace, "Resolved credential reference");
        Ok(output.stdout)
    }
}
