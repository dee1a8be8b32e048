// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Translation of verified parameters into helm arguments.
//!
//! Output is an ordered list of discrete tokens:
//!
//! 1. the caller's base arguments, unchanged;
//! 2. `-f <instance>/raw-values-<timestamp>.yaml` when raw values are set;
//! 3. one flag per remaining leaf value, sorted by dot-path key.
//!
//! | Leaf value | Flag |
//! |------------|------|
//! | number, bool, null | `--set key=value` |
//! | string | `--set-string key=value` (`\` and `,` escaped) |
//! | array | `--set-json key=<json>` |
//!
//! Nested mappings are flattened to dot-path keys first. A key containing
//! `--set` syntax (`=`, `,`, `[`, `]`, `\`) is refused outright.

use serde_json::Value;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::parameters::{ParameterSet, RAW_VALUES_KEY, decode_raw_values, is_settable_key};
use crate::store::{RAW_VALUES_PREFIX, validate_instance_id};

/// Builds helm arguments for one instance.
#[derive(Debug, Clone)]
pub struct CommandArgBuilder {
    instances_dir: PathBuf,
}

impl CommandArgBuilder {
    /// Raw-values files are written below `instances_dir/<instance_id>`.
    pub fn new(instances_dir: impl Into<PathBuf>) -> Self {
        Self {
            instances_dir: instances_dir.into(),
        }
    }

    /// Append value arguments for `params` to `base_args`.
    ///
    /// Writes exactly one new file when `params` carries non-empty raw
    /// values and nothing otherwise.
    pub async fn build(
        &self,
        instance_id: &str,
        params: &ParameterSet,
        base_args: Vec<String>,
    ) -> Result<Vec<String>> {
        validate_instance_id(instance_id)?;
        let mut args = base_args;

        let mut leaves = Vec::new();
        for (key, value) in params {
            if key != RAW_VALUES_KEY {
                collect_leaves(key.clone(), value, &mut leaves);
            }
        }
        if let Some((key, _)) = leaves.iter().find(|(key, _)| !is_settable_key(key)) {
            return Err(Error::InvalidRequest(format!(
                "parameter key {:?} cannot be passed to helm",
                key
            )));
        }
        leaves.sort_by(|a, b| a.0.cmp(&b.0));

        if let Some(raw) = params.get(RAW_VALUES_KEY)
            && let Some(text) = decode_raw_values(raw)?
        {
            let path = self.dump_raw_values(instance_id, &text).await?;
            args.push("-f".to_string());
            args.push(path.to_string_lossy().into_owned());
        }

        for (key, value) in leaves {
            args.extend(set_flag(&key, value));
        }
        Ok(args)
    }

    /// Write decoded raw values to a new, uniquely named file of the instance.
    pub async fn dump_raw_values(&self, instance_id: &str, text: &str) -> Result<PathBuf> {
        validate_instance_id(instance_id)?;
        let dir = self.instances_dir.join(instance_id);
        tokio::fs::create_dir_all(&dir).await?;

        let mut stamp = chrono::Utc::now().timestamp_micros();
        loop {
            let path = dir.join(format!("{}{}.yaml", RAW_VALUES_PREFIX, stamp));
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    file.write_all(text.as_bytes()).await?;
                    file.sync_all().await?;
                    info!(instance_id = %instance_id, path = %path.display(), "Dumped raw values");
                    return Ok(path);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => stamp += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Remove the instance's raw-values files not named in `keep`.
    ///
    /// Called once helm is done with an argument list, passing that list.
    pub async fn prune_raw_values(&self, instance_id: &str, keep: &[String]) -> Result<usize> {
        validate_instance_id(instance_id)?;
        let dir = self.instances_dir.join(instance_id);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with(RAW_VALUES_PREFIX) || !name.ends_with(".yaml") {
                continue;
            }
            let path = entry.path();
            if keep.iter().any(|arg| *arg == path.to_string_lossy()) {
                continue;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        if removed > 0 {
            debug!(instance_id = %instance_id, removed, "Pruned raw values");
        }
        Ok(removed)
    }
}

fn collect_leaves<'a>(path: String, value: &'a Value, leaves: &mut Vec<(String, &'a Value)>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, nested) in map {
                collect_leaves(format!("{}.{}", path, key), nested, leaves);
            }
        }
        Value::Object(_) => {}
        _ => leaves.push((path, value)),
    }
}

fn set_flag(key: &str, value: &Value) -> [String; 2] {
    match value {
        Value::String(s) => [
            "--set-string".to_string(),
            format!("{}={}", key, escape_set_value(s)),
        ],
        Value::Array(_) => ["--set-json".to_string(), format!("{}={}", key, value)],
        Value::Null => ["--set".to_string(), format!("{}=null", key)],
        other => ["--set".to_string(), format!("{}={}", key, other)],
    }
}

fn escape_set_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | ',') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
