// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persisted instance and binding records.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::parameters::ParameterSet;

/// State of the last operation, as reported to OSB clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationState {
    /// Operation accepted and still running.
    #[serde(rename = "in progress")]
    InProgress,
    /// Operation finished successfully.
    #[serde(rename = "succeeded")]
    Succeeded,
    /// Operation finished with an error.
    #[serde(rename = "failed")]
    Failed,
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationState::InProgress => write!(f, "in progress"),
            OperationState::Succeeded => write!(f, "succeeded"),
            OperationState::Failed => write!(f, "failed"),
        }
    }
}

/// Broker operation that last touched a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Instance creation
    Provision,
    /// Parameter or context update
    Update,
    /// Instance removal
    Deprovision,
    /// Credential creation
    Bind,
    /// Credential removal
    Unbind,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Provision => "provision",
            OperationKind::Update => "update",
            OperationKind::Deprovision => "deprovision",
            OperationKind::Bind => "bind",
            OperationKind::Unbind => "unbind",
        };
        write!(f, "{}", name)
    }
}

/// Last operation recorded on an instance or binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastOperation {
    /// Current state
    pub state: OperationState,
    /// Operation kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<OperationKind>,
    /// Free-form description, e.g. the failing command output
    #[serde(default)]
    pub description: String,
}

impl LastOperation {
    /// An operation that has started.
    pub fn in_progress(operation: OperationKind, description: impl Into<String>) -> Self {
        Self {
            state: OperationState::InProgress,
            operation: Some(operation),
            description: description.into(),
        }
    }

    /// An operation that finished successfully.
    pub fn succeeded(operation: OperationKind, description: impl Into<String>) -> Self {
        Self {
            state: OperationState::Succeeded,
            operation: Some(operation),
            description: description.into(),
        }
    }

    /// An operation that failed.
    pub fn failed(operation: OperationKind, description: impl Into<String>) -> Self {
        Self {
            state: OperationState::Failed,
            operation: Some(operation),
            description: description.into(),
        }
    }
}

/// What was provisioned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceDetails {
    /// Catalog service id. Immutable once set.
    pub service_id: String,
    /// Catalog plan id. Immutable once set.
    pub plan_id: String,
    /// Platform context (namespace, platform, ...)
    pub context: Map<String, Value>,
    /// Caller parameters as last accepted
    #[serde(default)]
    pub parameters: Option<ParameterSet>,
}

impl InstanceDetails {
    /// Namespace the release lives in.
    pub fn namespace(&self) -> &str {
        self.context
            .get("namespace")
            .and_then(Value::as_str)
            .filter(|ns| !ns.is_empty())
            .unwrap_or("default")
    }
}

/// Persisted state of one provisioned instance (`instance.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    /// Stable identifier, also the release name.
    pub id: String,
    /// Service, plan, context and parameters
    pub details: InstanceDetails,
    /// Last operation, absent on records that were never operated on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_operation: Option<LastOperation>,
    /// Seconds since the epoch, stamped on every save
    #[serde(default)]
    pub last_modified_time: f64,
}

impl InstanceRecord {
    /// Create a record that has not been persisted yet.
    pub fn new(id: impl Into<String>, details: InstanceDetails) -> Self {
        Self {
            id: id.into(),
            details,
            last_operation: None,
            last_modified_time: 0.0,
        }
    }
}

/// Persisted credentials for one instance (`binding.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindingRecord {
    /// Binding identifier
    pub id: String,
    /// Owning instance
    #[serde(default)]
    pub instance_id: String,
    /// Opaque credentials handed to the application
    pub credentials: Map<String, Value>,
    /// Last bind operation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_operation: Option<LastOperation>,
    /// Seconds since the epoch, stamped on every save
    #[serde(default)]
    pub last_modified_time: f64,
}

impl BindingRecord {
    /// Create a binding that has not been persisted yet.
    pub fn new(
        id: impl Into<String>,
        instance_id: impl Into<String>,
        credentials: Map<String, Value>,
    ) -> Self {
        Self {
            id: id.into(),
            instance_id: instance_id.into(),
            credentials,
            last_operation: None,
            last_modified_time: 0.0,
        }
    }

    /// Whether the credentials were resolved. A record without a last
    /// operation counts as resolved.
    pub fn succeeded(&self) -> bool {
        match &self.last_operation {
            Some(op) => op.state == OperationState::Succeeded,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operation_state_wire_format() {
        let op = LastOperation::in_progress(OperationKind::Provision, "installing");
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(
            json,
            json!({"state": "in progress", "operation": "provision", "description": "installing"})
        );
    }

    #[test]
    fn test_binding_operation_omits_kind() {
        let op = LastOperation {
            state: OperationState::Succeeded,
            operation: None,
            description: String::new(),
        };
        let json = serde_json::to_string(&op).unwrap();
        assert!(!json.contains("operation"));
    }

    #[test]
    fn test_namespace_defaults() {
        let mut details = InstanceDetails {
            service_id: "svc".into(),
            plan_id: "plan".into(),
            context: Map::new(),
            parameters: None,
        };
        assert_eq!(details.namespace(), "default");
        details
            .context
            .insert("namespace".into(), json!("team-a"));
        assert_eq!(details.namespace(), "team-a");
    }
}
