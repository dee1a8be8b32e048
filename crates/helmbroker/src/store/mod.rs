// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Metadata store for instances, bindings and the addon catalog.
//!
//! Layout under the instances root:
//!
//! ```text
//! {instances_dir}/{instance_id}/
//!     instance.json               InstanceRecord
//!     binding.json                BindingRecord
//!     instance.lock               local lock backing file
//!     raw-values-{timestamp}.yaml decoded raw values handed to helm
//!     .config/helm, .cache/helm   per-instance helm state
//! {addons_dir}/addons.json        catalog
//! ```
//!
//! Records are schema-checked on every load and before every save. Writes
//! go to a temporary file in the same directory and are renamed into place,
//! so readers only ever observe a complete previous or next version.

mod catalog;
mod records;

pub use catalog::*;
pub use records::*;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::schema::{RecordKind, SchemaValidator};

/// Instance record file name.
pub const INSTANCE_FILE: &str = "instance.json";
/// Binding record file name.
pub const BINDING_FILE: &str = "binding.json";
/// Local lock file name.
pub const LOCK_FILE: &str = "instance.lock";
/// Catalog file name under the addons root.
pub const CATALOG_FILE: &str = "addons.json";
/// Prefix of raw-values dumps.
pub const RAW_VALUES_PREFIX: &str = "raw-values-";

/// Check that `instance_id` is usable as a single directory name.
pub fn validate_instance_id(instance_id: &str) -> Result<()> {
    let valid = !instance_id.is_empty()
        && instance_id.len() <= 255
        && !instance_id.starts_with('.')
        && instance_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidRequest(format!(
            "invalid instance id: {:?}",
            instance_id
        )))
    }
}

/// Current time as fractional epoch seconds, strictly after `previous`.
pub fn next_timestamp(previous: f64) -> f64 {
    let now = chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0;
    if now > previous {
        now
    } else {
        previous + 0.000_001
    }
}

/// Recursively sort object keys so output does not depend on input order.
pub fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, canonicalize(v)))
                    .collect::<Map<String, Value>>(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// File-backed metadata store.
#[derive(Clone)]
pub struct MetadataStore {
    instances_dir: PathBuf,
    addons_dir: PathBuf,
    schema: Arc<SchemaValidator>,
}

impl MetadataStore {
    /// Create a store rooted at the configured directories.
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            instances_dir: config.instances_dir.clone(),
            addons_dir: config.addons_dir.clone(),
            schema: Arc::new(SchemaValidator::new()?),
        })
    }

    /// Instances root.
    pub fn instances_dir(&self) -> &Path {
        &self.instances_dir
    }

    /// Addons root.
    pub fn addons_dir(&self) -> &Path {
        &self.addons_dir
    }

    /// Storage directory of one instance.
    pub fn instance_path(&self, instance_id: &str) -> Result<PathBuf> {
        validate_instance_id(instance_id)?;
        Ok(self.instances_dir.join(instance_id))
    }

    /// Whether an instance record exists.
    pub async fn instance_exists(&self, instance_id: &str) -> Result<bool> {
        let path = self.instance_path(instance_id)?.join(INSTANCE_FILE);
        Ok(tokio::fs::try_exists(&path).await?)
    }

    /// Load and validate an instance record.
    pub async fn load_instance(&self, instance_id: &str) -> Result<InstanceRecord> {
        let path = self.instance_path(instance_id)?.join(INSTANCE_FILE);
        self.read_record(&path, RecordKind::Instance)
            .await?
            .ok_or_else(|| Error::InstanceNotFound(instance_id.to_string()))
    }

    /// Stamp, validate and atomically persist an instance record.
    ///
    /// `record.last_modified_time` is only updated once the write succeeded.
    /// Changing `service_id` or `plan_id` of a persisted record is rejected.
    pub async fn save_instance(&self, instance_id: &str, record: &mut InstanceRecord) -> Result<()> {
        let dir = self.instance_path(instance_id)?;
        if record.id != instance_id {
            return Err(Error::InvalidRequest(format!(
                "record id {} does not match instance {}",
                record.id, instance_id
            )));
        }

        let path = dir.join(INSTANCE_FILE);
        let mut previous = record.last_modified_time;
        if let Some(existing) = self
            .read_record::<InstanceRecord>(&path, RecordKind::Instance)
            .await?
        {
            check_immutable("service_id", &existing.details.service_id, &record.details.service_id)?;
            check_immutable("plan_id", &existing.details.plan_id, &record.details.plan_id)?;
            previous = previous.max(existing.last_modified_time);
        }

        let timestamp = next_timestamp(previous);
        let mut value = serde_json::to_value(&*record)?;
        value["last_modified_time"] = Value::from(timestamp);
        self.write_record(&path, RecordKind::Instance, value).await?;
        record.last_modified_time = timestamp;

        debug!(instance_id = %instance_id, "Saved instance record");
        Ok(())
    }

    /// Remove an instance's records, raw-values dumps and helm state.
    ///
    /// The lock file stays so that waiters on the same instance keep
    /// contending for the same file.
    pub async fn delete_instance(&self, instance_id: &str) -> Result<()> {
        let dir = self.instance_path(instance_id)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::InstanceNotFound(instance_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name() == LOCK_FILE {
                continue;
            }
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(&path).await?;
            } else {
                tokio::fs::remove_file(&path).await?;
            }
        }

        info!(instance_id = %instance_id, "Deleted instance records");
        Ok(())
    }

    /// Ids of all instances that have a record.
    pub async fn list_instances(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.instances_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if validate_instance_id(&name).is_ok()
                && tokio::fs::try_exists(entry.path().join(INSTANCE_FILE)).await?
            {
                ids.push(name);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Load and validate the binding of an instance.
    pub async fn load_binding(&self, instance_id: &str) -> Result<BindingRecord> {
        let path = self.instance_path(instance_id)?.join(BINDING_FILE);
        self.read_record(&path, RecordKind::Binding)
            .await?
            .ok_or_else(|| Error::BindingNotFound {
                instance_id: instance_id.to_string(),
                binding_id: String::new(),
            })
    }

    /// Stamp, validate and atomically persist the binding of an instance.
    pub async fn save_binding(&self, instance_id: &str, record: &mut BindingRecord) -> Result<()> {
        let path = self.instance_path(instance_id)?.join(BINDING_FILE);
        if record.instance_id.is_empty() {
            record.instance_id = instance_id.to_string();
        }

        let timestamp = next_timestamp(record.last_modified_time);
        let mut value = serde_json::to_value(&*record)?;
        value["last_modified_time"] = Value::from(timestamp);
        self.write_record(&path, RecordKind::Binding, value).await?;
        record.last_modified_time = timestamp;

        debug!(instance_id = %instance_id, binding_id = %record.id, "Saved binding record");
        Ok(())
    }

    /// Remove the binding of an instance. Returns whether one existed.
    pub async fn delete_binding(&self, instance_id: &str) -> Result<bool> {
        let path = self.instance_path(instance_id)?.join(BINDING_FILE);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!(instance_id = %instance_id, "Deleted binding record");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Load the addon catalog. A missing or empty file is an empty catalog.
    pub async fn load_catalog(&self) -> Result<Catalog> {
        let path = self.addons_dir.join(CATALOG_FILE);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No addon catalog, using empty catalog");
                return Ok(Catalog::empty(&self.addons_dir));
            }
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(Catalog::empty(&self.addons_dir));
        }

        let document: Value = serde_json::from_str(&content)?;
        if document.is_null() {
            return Ok(Catalog::empty(&self.addons_dir));
        }
        self.schema.validate(RecordKind::Catalog, &document)?;
        Catalog::from_value(&self.addons_dir, document)
    }

    async fn read_record<T: DeserializeOwned>(
        &self,
        path: &Path,
        kind: RecordKind,
    ) -> Result<Option<T>> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let value: Value = serde_json::from_str(&content)?;
        self.schema.validate(kind, &value)?;
        Ok(Some(serde_json::from_value(value)?))
    }

    async fn write_record(&self, path: &Path, kind: RecordKind, value: Value) -> Result<()> {
        self.schema.validate(kind, &value)?;
        let content = serde_json::to_string_pretty(&canonicalize(value))?;
        write_atomic(path, content.as_bytes()).await
    }
}

fn check_immutable(field: &'static str, current: &str, requested: &str) -> Result<()> {
    if current == requested {
        Ok(())
    } else {
        Err(Error::ImmutableField {
            field,
            current: current.to_string(),
            requested: requested.to_string(),
        })
    }
}

/// Write `content` to a temporary sibling of `path`, then rename it over `path`.
pub async fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::InvalidRequest(format!("{} has no parent", path.display())))?;
    tokio::fs::create_dir_all(dir).await?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = dir.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4().simple()));

    if let Err(e) = write_and_sync(&temp_path, content).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e.into());
    }
    if let Err(e) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e.into());
    }
    Ok(())
}

async fn write_and_sync(path: &Path, content: &[u8]) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(content).await?;
    file.sync_all().await
}

/// Serialize any record the way the store writes it.
pub fn to_canonical_json<T: Serialize>(record: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(&canonicalize(
        serde_json::to_value(record)?,
    ))?)
}
