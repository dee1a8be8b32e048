// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Structural schemas for persisted records.
//!
//! Every record is checked against its schema before it is written and
//! after it is read. A record that fails on load is corrupt state and is
//! never handed to callers.

use serde_json::{Value, json};
use std::fmt;

/// Kind of persisted record, each with its own fixed schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// `instance.json`
    Instance,
    /// `binding.json`
    Binding,
    /// `addons.json`
    Catalog,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Instance => write!(f, "instance"),
            RecordKind::Binding => write!(f, "binding"),
            RecordKind::Catalog => write!(f, "catalog"),
        }
    }
}

/// A single violated constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    /// JSON pointer of the offending value (empty for the document root).
    pub path: String,
    /// What was violated.
    pub message: String,
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Structural validation failure.
#[derive(Debug, Clone)]
pub struct SchemaError {
    /// Which record kind failed.
    pub kind: RecordKind,
    /// All violated constraints, in validator order.
    pub violations: Vec<SchemaViolation>,
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} record failed schema validation: ", self.kind)?;
        let mut first = true;
        for violation in &self.violations {
            if !first {
                write!(f, "; ")?;
            }
            write!(f, "{}", violation)?;
            first = false;
        }
        Ok(())
    }
}

impl std::error::Error for SchemaError {}

/// Schema for `instance.json`.
pub fn instance_schema() -> Value {
    json!({
        "type": "object",
        "required": ["id", "details"],
        "properties": {
            "id": {"type": "string", "minLength": 1},
            "details": {
                "type": "object",
                "required": ["service_id", "plan_id", "context"],
                "properties": {
                    "service_id": {"type": "string"},
                    "plan_id": {"type": "string"},
                    "context": {"type": "object"},
                    "parameters": {"oneOf": [{"type": "object"}, {"type": "null"}]}
                }
            },
            "last_operation": {
                "type": "object",
                "properties": {
                    "state": {"type": "string"},
                    "operation": {"type": "string"},
                    "description": {"type": "string"}
                }
            },
            "last_modified_time": {"type": "number"}
        }
    })
}

/// Schema for `binding.json`.
pub fn binding_schema() -> Value {
    json!({
        "type": "object",
        "required": ["id", "credentials"],
        "properties": {
            "id": {"type": "string", "minLength": 1},
            "instance_id": {"type": "string"},
            "credentials": {"type": "object"},
            "last_operation": {
                "type": "object",
                "properties": {
                    "state": {"type": "string"},
                    "description": {"type": "string"}
                }
            },
            "last_modified_time": {"type": "number"}
        }
    })
}

/// Schema for `addons.json`: a mapping of internal key to catalog entry.
pub fn catalog_schema() -> Value {
    let allow_parameters = json!({
        "type": "array",
        "items": {
            "type": "object",
            "required": ["name"],
            "properties": {
                "name": {"type": "string", "minLength": 1},
                "required": {"type": "boolean"},
                "description": {"type": "string"}
            }
        }
    });
    json!({
        "type": "object",
        "additionalProperties": {
            "type": "object",
            "required": ["id", "name", "version", "bindable", "plans"],
            "properties": {
                "id": {"type": "string"},
                "name": {"type": "string"},
                "version": {"type": "string"},
                "description": {"type": "string"},
                "bindable": {"type": "boolean"},
                "plan_updateable": {"type": "boolean"},
                "instances_retrievable": {"type": "boolean"},
                "bindings_retrievable": {"type": "boolean"},
                "allow_context_updates": {"type": "boolean"},
                "archive": {"type": "boolean"},
                "tags": {"type": ["string", "array"]},
                "requires": {"type": "array"},
                "metadata": {"type": "object"},
                "dashboard_client": {"type": "object"},
                "allow_parameters": allow_parameters.clone(),
                "plans": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["id", "name", "description"],
                        "properties": {
                            "id": {"type": "string"},
                            "name": {"type": "string"},
                            "description": {"type": "string"},
                            "metadata": {"type": "object"},
                            "free": {"type": "boolean"},
                            "bindable": {"type": "boolean"},
                            "binding_rotatable": {"type": "boolean"},
                            "plan_updateable": {"type": "boolean"},
                            "schemas": {"type": "object"},
                            "maximum_polling_duration": {"type": "integer"},
                            "maintenance_info": {"type": "object"},
                            "allow_parameters": allow_parameters
                        }
                    }
                }
            }
        }
    })
}

/// Compiled validators for every record kind.
pub struct SchemaValidator {
    instance: jsonschema::Validator,
    binding: jsonschema::Validator,
    catalog: jsonschema::Validator,
}

impl SchemaValidator {
    /// Compile the record schemas.
    pub fn new() -> Result<Self, SchemaError> {
        Ok(Self {
            instance: compile(RecordKind::Instance, &instance_schema())?,
            binding: compile(RecordKind::Binding, &binding_schema())?,
            catalog: compile(RecordKind::Catalog, &catalog_schema())?,
        })
    }

    /// Check `record` against the schema for `kind`.
    pub fn validate(&self, kind: RecordKind, record: &Value) -> Result<(), SchemaError> {
        let validator = match kind {
            RecordKind::Instance => &self.instance,
            RecordKind::Binding => &self.binding,
            RecordKind::Catalog => &self.catalog,
        };

        let violations: Vec<SchemaViolation> = validator
            .iter_errors(record)
            .map(|e| SchemaViolation {
                path: e.instance_path.to_string(),
                message: e.to_string(),
            })
            .collect();

        if violations.is_empty() {
            Ok(())
        } else {
            Err(SchemaError { kind, violations })
        }
    }
}

fn compile(kind: RecordKind, schema: &Value) -> Result<jsonschema::Validator, SchemaError> {
    jsonschema::validator_for(schema).map_err(|e| SchemaError {
        kind,
        violations: vec![SchemaViolation {
            path: String::new(),
            message: format!("invalid schema: {}", e),
        }],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> SchemaValidator {
        SchemaValidator::new().expect("schemas compile")
    }

    fn instance() -> Value {
        json!({
            "id": "inst-1",
            "details": {
                "service_id": "svc-1",
                "plan_id": "plan-1",
                "context": {"namespace": "default"},
                "parameters": null
            },
            "last_operation": {"state": "succeeded", "operation": "provision", "description": ""},
            "last_modified_time": 1700000000.5
        })
    }

    #[test]
    fn test_valid_instance() {
        assert!(validator().validate(RecordKind::Instance, &instance()).is_ok());
    }

    #[test]
    fn test_instance_missing_service_id() {
        let mut record = instance();
        record["details"]
            .as_object_mut()
            .unwrap()
            .remove("service_id");

        let err = validator()
            .validate(RecordKind::Instance, &record)
            .unwrap_err();
        assert_eq!(err.kind, RecordKind::Instance);
        assert!(err.to_string().contains("service_id"));
        assert_eq!(err.violations[0].path, "/details");
    }

    #[test]
    fn test_instance_wrong_types() {
        let mut record = instance();
        record["details"]["parameters"] = json!("a=b");
        record["last_modified_time"] = json!("yesterday");

        let err = validator()
            .validate(RecordKind::Instance, &record)
            .unwrap_err();
        assert_eq!(err.violations.len(), 2);
    }

    #[test]
    fn test_binding_requires_credentials() {
        let v = validator();
        assert!(
            v.validate(RecordKind::Binding, &json!({"id": "b-1", "credentials": {}}))
                .is_ok()
        );
        let err = v
            .validate(RecordKind::Binding, &json!({"id": "b-1"}))
            .unwrap_err();
        assert!(err.to_string().contains("credentials"));
    }

    #[test]
    fn test_catalog_plan_requires_description() {
        let catalog = json!({
            "redis": {
                "id": "svc-redis",
                "name": "redis",
                "version": "7.0",
                "bindable": true,
                "plans": [{"id": "p-1", "name": "standard"}]
            }
        });
        let err = validator()
            .validate(RecordKind::Catalog, &catalog)
            .unwrap_err();
        assert_eq!(err.kind, RecordKind::Catalog);
        assert!(err.violations[0].path.starts_with("/redis/plans/0"));
    }

    #[test]
    fn test_empty_catalog_is_valid() {
        assert!(validator().validate(RecordKind::Catalog, &json!({})).is_ok());
    }
}
