// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Addon catalog (`addons.json`).
//!
//! The catalog is published by an external process and only read here.
//! Lookups scan entries in file order and the first match wins, so a
//! catalog with duplicate service or plan ids resolves to whichever
//! appears first.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::parameters::AllowParameter;

/// One offerable plan of an addon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Plan id
    pub id: String,
    /// Plan name, also the directory under `plans/`
    pub name: String,
    /// Plan description
    pub description: String,
    /// Whether the plan is free of charge
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub free: Option<bool>,
    /// Plan-level override of the addon's bindable flag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bindable: Option<bool>,
    /// OSB parameter schemas
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schemas: Option<Value>,
    /// Plan-specific allow-list; overrides the addon's when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_parameters: Option<Vec<AllowParameter>>,
    /// Fields this core does not interpret
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One addon (service offering).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddonCatalogEntry {
    /// Service id
    pub id: String,
    /// Chart name
    pub name: String,
    /// Chart version
    pub version: String,
    /// Service description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether instances can be bound
    pub bindable: bool,
    /// Whether instances can be updated
    #[serde(default)]
    pub plan_updateable: bool,
    /// Whether the addon is archived (no new instances)
    #[serde(default)]
    pub archive: bool,
    /// Addon-wide allow-list
    #[serde(default)]
    pub allow_parameters: Vec<AllowParameter>,
    /// Plans in catalog order
    pub plans: Vec<Plan>,
    /// Fields this core does not interpret
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AddonCatalogEntry {
    /// `<name>-<version>`, the addon's directory under the addons root.
    pub fn directory_name(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }
}

/// The loaded catalog, in file order.
#[derive(Debug, Clone)]
pub struct Catalog {
    addons_dir: PathBuf,
    entries: Vec<(String, AddonCatalogEntry)>,
}

impl Catalog {
    /// Catalog with no entries.
    pub fn empty(addons_dir: impl Into<PathBuf>) -> Self {
        Self {
            addons_dir: addons_dir.into(),
            entries: Vec::new(),
        }
    }

    /// Build from an already schema-checked `addons.json` document.
    pub fn from_value(addons_dir: impl Into<PathBuf>, document: Value) -> Result<Self> {
        let mut catalog = Self::empty(addons_dir);
        let map = match document {
            Value::Object(map) => map,
            Value::Null => return Ok(catalog),
            _ => return Err(Error::InvalidRequest("catalog must be an object".into())),
        };
        for (key, entry) in map {
            let entry: AddonCatalogEntry = serde_json::from_value(entry)?;
            catalog.entries.push((key, entry));
        }
        Ok(catalog)
    }

    /// Addons root the catalog was loaded from.
    pub fn addons_dir(&self) -> &Path {
        &self.addons_dir
    }

    /// Number of addons.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the catalog has no addons.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries keyed by their internal catalog key, in file order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AddonCatalogEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Entry by internal catalog key.
    pub fn get(&self, key: &str) -> Option<&AddonCatalogEntry> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// First addon whose id is `service_id`.
    pub fn find_addon(&self, service_id: &str) -> Result<&AddonCatalogEntry> {
        self.entries
            .iter()
            .map(|(_, entry)| entry)
            .find(|entry| entry.id == service_id)
            .ok_or_else(|| Error::AddonNotFound(service_id.to_string()))
    }

    /// First plan with `plan_id` in the addon.
    pub fn find_plan(&self, service_id: &str, plan_id: &str) -> Result<&Plan> {
        self.find_addon(service_id)?
            .plans
            .iter()
            .find(|plan| plan.id == plan_id)
            .ok_or_else(|| Error::PlanNotFound {
                service_id: service_id.to_string(),
                plan_id: plan_id.to_string(),
            })
    }

    /// Chart name of the addon.
    pub fn addon_name(&self, service_id: &str) -> Result<&str> {
        Ok(self.find_addon(service_id)?.name.as_str())
    }

    /// Whether the addon supports bindings.
    pub fn addon_bindable(&self, service_id: &str) -> Result<bool> {
        Ok(self.find_addon(service_id)?.bindable)
    }

    /// Whether instances of the addon may be updated.
    pub fn addon_updateable(&self, service_id: &str) -> Result<bool> {
        Ok(self.find_addon(service_id)?.plan_updateable)
    }

    /// Whether the addon is archived.
    pub fn addon_archive(&self, service_id: &str) -> Result<bool> {
        Ok(self.find_addon(service_id)?.archive)
    }

    /// Allow-list for a plan: the plan's own list if it has one, else the addon's.
    pub fn addon_allowed_parameters(
        &self,
        service_id: &str,
        plan_id: &str,
    ) -> Result<Vec<AllowParameter>> {
        let addon = self.find_addon(service_id)?;
        let plan = self.find_plan(service_id, plan_id)?;
        Ok(plan
            .allow_parameters
            .clone()
            .unwrap_or_else(|| addon.allow_parameters.clone()))
    }

    /// Chart and plan directories for a service plan.
    ///
    /// Chart: `<addons>/<name>-<version>/chart/<name>`,
    /// plan: `<addons>/<name>-<version>/plans/<plan name>`.
    pub fn addon_paths(&self, service_id: &str, plan_id: &str) -> Result<(PathBuf, PathBuf)> {
        let addon = self.find_addon(service_id)?;
        let plan = self.find_plan(service_id, plan_id)?;
        let base = self.addons_dir.join(addon.directory_name());
        Ok((
            base.join("chart").join(&addon.name),
            base.join("plans").join(&plan.name),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn catalog() -> Catalog {
        Catalog::from_value(
            "/addons",
            json!({
                "redis-7": {
                    "id": "svc-redis",
                    "name": "redis",
                    "version": "7.0",
                    "bindable": true,
                    "plan_updateable": true,
                    "allow_parameters": [{"name": "replicas"}],
                    "plans": [
                        {"id": "p-small", "name": "small", "description": "1Gi"},
                        {
                            "id": "p-large",
                            "name": "large",
                            "description": "8Gi",
                            "allow_parameters": [{"name": "persistence", "required": true}]
                        }
                    ]
                },
                "redis-6": {
                    "id": "svc-redis",
                    "name": "redis",
                    "version": "6.2",
                    "bindable": false,
                    "plans": []
                }
            }),
        )
        .unwrap()
    }

    #[test]
    fn test_first_match_wins() {
        let catalog = catalog();
        assert_eq!(catalog.len(), 2);
        let addon = catalog.find_addon("svc-redis").unwrap();
        assert_eq!(addon.version, "7.0");
        assert!(catalog.addon_bindable("svc-redis").unwrap());
    }

    #[test]
    fn test_missing_ids() {
        let catalog = catalog();
        let err = catalog.find_addon("svc-missing").unwrap_err();
        assert!(err.is_not_found());
        let err = catalog.find_plan("svc-redis", "p-missing").unwrap_err();
        assert!(matches!(err, Error::PlanNotFound { .. }));
    }

    #[test]
    fn test_allowed_parameters_plan_override() {
        let catalog = catalog();
        let small = catalog
            .addon_allowed_parameters("svc-redis", "p-small")
            .unwrap();
        assert_eq!(small, vec![AllowParameter::optional("replicas")]);

        let large = catalog
            .addon_allowed_parameters("svc-redis", "p-large")
            .unwrap();
        assert_eq!(large, vec![AllowParameter::required("persistence")]);
    }

    #[test]
    fn test_addon_paths() {
        let (chart, plan) = catalog().addon_paths("svc-redis", "p-large").unwrap();
        assert_eq!(chart, PathBuf::from("/addons/redis-7.0/chart/redis"));
        assert_eq!(plan, PathBuf::from("/addons/redis-7.0/plans/large"));
    }

    #[test]
    fn test_null_catalog_is_empty() {
        let catalog = Catalog::from_value("/addons", Value::Null).unwrap();
        assert!(catalog.is_empty());
    }
}
