// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for helmbroker.

use thiserror::Error;

use crate::parameters::ParameterReport;

/// Broker errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// I/O operation on the metadata store failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing failed.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A record violated its schema.
    #[error(transparent)]
    Schema(#[from] crate::schema::SchemaError),

    /// Instance lock could not be acquired.
    #[error("Lock error: {0}")]
    Lock(#[from] crate::lock::LockError),

    /// Instance lock could not be released after the critical section.
    #[error("Failed to release lock for instance {instance_id}: {source}")]
    LockRelease {
        /// Instance whose lock is in doubt.
        instance_id: String,
        /// Underlying release failure.
        #[source]
        source: crate::lock::LockError,
        /// Error returned by the critical section itself, if it also failed.
        operation_error: Option<String>,
    },

    /// External command failed to run.
    #[error("Command error: {0}")]
    Cli(#[from] crate::cli::CliError),

    /// Instance record was not found.
    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    /// Binding record was not found.
    #[error("Binding not found: {binding_id} (instance {instance_id})")]
    BindingNotFound {
        /// Owning instance.
        instance_id: String,
        /// Requested binding.
        binding_id: String,
    },

    /// Addon (service) was not found in the catalog.
    #[error("Addon not found: {0}")]
    AddonNotFound(String),

    /// Plan was not found for the addon.
    #[error("Plan not found: {plan_id} (service {service_id})")]
    PlanNotFound {
        /// Service the plan was looked up in.
        service_id: String,
        /// Missing plan.
        plan_id: String,
    },

    /// An immutable record field would change.
    #[error("Field {field} is immutable: {current} -> {requested}")]
    ImmutableField {
        /// Field name.
        field: &'static str,
        /// Persisted value.
        current: String,
        /// Attempted value.
        requested: String,
    },

    /// Raw values could not be decoded.
    #[error("Invalid raw values: {0}")]
    RawValues(String),

    /// Caller parameters were rejected by the plan allow-list.
    #[error("Invalid parameters: {0}")]
    InvalidParameters(ParameterReport),

    /// Request validation failed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    /// Whether this error means the requested entity does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::InstanceNotFound(_)
                | Error::BindingNotFound { .. }
                | Error::AddonNotFound(_)
                | Error::PlanNotFound { .. }
        )
    }
}

/// Result type using helmbroker Error.
pub type Result<T> = std::result::Result<T, Error>;
