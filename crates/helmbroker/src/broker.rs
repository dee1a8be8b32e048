// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Broker operations.
//!
//! Every operation that changes an instance runs inside the instance lock:
//!
//! ```text
//! acquire lock
//!   -> load or create the instance record
//!   -> verify parameters against the plan allow-list
//!   -> build helm arguments
//!   -> run helm
//!   -> persist the record with the outcome
//! release lock
//! ```
//!
//! Rejected parameters come back as [`OperationOutcome::InvalidParameters`]
//! so the API layer can list the offending keys. A failing helm or kubectl
//! call is recorded as a `failed` last operation on the record and the
//! record is returned; only store, lock and catalog problems are errors.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cli::{CommandRunner, Helm, Kubectl, ProcessRunner, ValueFrom};
use crate::command::CommandArgBuilder;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::lock::{self, InstanceLock, with_instance_lock};
use crate::parameters::{self, ParameterReport, ParameterSet};
use crate::store::{
    BindingRecord, Catalog, InstanceDetails, InstanceRecord, LastOperation, MetadataStore,
    OperationKind,
};

/// Credential template of a plan.
pub const BIND_TEMPLATE: &str = "bind.yaml";
/// Plan-level values file passed to every install and upgrade.
pub const PLAN_VALUES: &str = "values.yaml";

/// Provision request body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProvisionRequest {
    /// Catalog service id
    pub service_id: String,
    /// Catalog plan id
    pub plan_id: String,
    /// Platform context
    #[serde(default)]
    pub context: Map<String, Value>,
    /// Caller parameters
    #[serde(default)]
    pub parameters: Option<ParameterSet>,
}

/// Update request body. Absent fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateRequest {
    /// Must match the instance's service id
    pub service_id: String,
    /// Must match the instance's plan id when given
    #[serde(default)]
    pub plan_id: Option<String>,
    /// Replacement context
    #[serde(default)]
    pub context: Option<Map<String, Value>>,
    /// Replacement parameters
    #[serde(default)]
    pub parameters: Option<ParameterSet>,
}

/// Bind request body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BindRequest {
    /// Must match the instance's service id
    pub service_id: String,
    /// Must match the instance's plan id
    pub plan_id: String,
}

/// Result of an operation that validates parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutcome<T> {
    /// The operation ran; check the record's last operation for its state.
    Completed(T),
    /// Parameters were rejected and nothing was changed.
    InvalidParameters(ParameterReport),
}

impl<T> OperationOutcome<T> {
    /// The record, if the operation ran.
    pub fn completed(self) -> Option<T> {
        match self {
            OperationOutcome::Completed(record) => Some(record),
            OperationOutcome::InvalidParameters(_) => None,
        }
    }

    /// The rejection report, if parameters were rejected.
    pub fn report(&self) -> Option<&ParameterReport> {
        match self {
            OperationOutcome::Completed(_) => None,
            OperationOutcome::InvalidParameters(report) => Some(report),
        }
    }
}

#[derive(Debug, Deserialize)]
struct BindTemplate {
    #[serde(default)]
    credentials: Vec<CredentialTemplate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialTemplate {
    name: String,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    value_from: Option<ValueFrom>,
}

/// Builder for [`Broker`].
pub struct BrokerBuilder {
    config: Config,
    runner: Option<Arc<dyn CommandRunner>>,
    lock: Option<Arc<dyn InstanceLock>>,
}

impl BrokerBuilder {
    /// Start from `config`.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            runner: None,
            lock: None,
        }
    }

    /// Set the command runner.
    ///
    /// Default: [`ProcessRunner`] with the configured command timeout
    pub fn runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Set the lock backend.
    ///
    /// Default: the backend selected by [`Config::lock_backend`]
    pub fn lock(mut self, lock: Arc<dyn InstanceLock>) -> Self {
        self.lock = Some(lock);
        self
    }

    /// Build the broker, connecting to the lock service if needed.
    pub async fn build(self) -> Result<Broker> {
        let config = self.config;
        let runner = self
            .runner
            .unwrap_or_else(|| Arc::new(ProcessRunner::new(config.command_timeout)));
        let lock = match self.lock {
            Some(lock) => lock,
            None => lock::from_config(&config).await?,
        };

        info!(
            instances_dir = %config.instances_dir.display(),
            addons_dir = %config.addons_dir.display(),
            lock_backend = lock.backend_type(),
            runner = runner.runner_type(),
            "Broker initialized"
        );

        Ok(Broker {
            store: MetadataStore::new(&config)?,
            args: CommandArgBuilder::new(&config.instances_dir),
            helm: Helm::new(runner.clone(), &config.helm_bin, &config.instances_dir),
            kubectl: Kubectl::new(runner, &config.kubectl_bin),
            lock,
            config,
        })
    }
}

/// Instance state core wired to helm and kubectl.
pub struct Broker {
    config: Config,
    store: MetadataStore,
    lock: Arc<dyn InstanceLock>,
    args: CommandArgBuilder,
    helm: Helm,
    kubectl: Kubectl,
}

impl Broker {
    /// Create a builder.
    pub fn builder(config: Config) -> BrokerBuilder {
        BrokerBuilder::new(config)
    }

    /// Configuration the broker was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Underlying metadata store.
    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    /// Current catalog.
    pub async fn catalog(&self) -> Result<Catalog> {
        self.store.load_catalog().await
    }

    /// Persisted instance record.
    pub async fn fetch_instance(&self, instance_id: &str) -> Result<InstanceRecord> {
        self.store.load_instance(instance_id).await
    }

    /// Check `params` against the plan's allow-list without touching any instance.
    pub async fn verify_parameters(
        &self,
        service_id: &str,
        plan_id: &str,
        params: &ParameterSet,
    ) -> Result<ParameterReport> {
        let catalog = self.store.load_catalog().await?;
        let allow_list = catalog.addon_allowed_parameters(service_id, plan_id)?;
        parameters::verify(&allow_list, params)
    }

    /// Create an instance and install its release.
    pub async fn provision(
        &self,
        instance_id: &str,
        request: ProvisionRequest,
    ) -> Result<OperationOutcome<InstanceRecord>> {
        with_instance_lock(self.lock.as_ref(), instance_id, || {
            self.provision_locked(instance_id, request)
        })
        .await
    }

    async fn provision_locked(
        &self,
        instance_id: &str,
        request: ProvisionRequest,
    ) -> Result<OperationOutcome<InstanceRecord>> {
        if self.store.instance_exists(instance_id).await? {
            return Err(Error::InvalidRequest(format!(
                "instance {} already exists",
                instance_id
            )));
        }

        let catalog = self.store.load_catalog().await?;
        if catalog.addon_archive(&request.service_id)? {
            return Err(Error::InvalidRequest(format!(
                "service {} is archived",
                request.service_id
            )));
        }
        let params = request.parameters.clone().unwrap_or_default();
        let allow_list = catalog.addon_allowed_parameters(&request.service_id, &request.plan_id)?;
        let report = parameters::verify(&allow_list, &params)?;
        if !report.is_valid() {
            warn!(instance_id = %instance_id, %report, "Provision rejected");
            return Ok(OperationOutcome::InvalidParameters(report));
        }

        let (chart, plan) = catalog.addon_paths(&request.service_id, &request.plan_id)?;
        let args = self
            .args
            .build(instance_id, &params, plan_values_args(&plan).await?)
            .await?;

        let details = InstanceDetails {
            service_id: request.service_id,
            plan_id: request.plan_id,
            context: request.context,
            parameters: request.parameters,
        };
        let mut record = InstanceRecord::new(instance_id, details);
        record.last_operation = Some(LastOperation::in_progress(
            OperationKind::Provision,
            "provisioning",
        ));
        self.store.save_instance(instance_id, &mut record).await?;

        let result = self
            .helm
            .install(instance_id, record.details.namespace(), &chart, args.clone())
            .await;
        self.prune_raw_values(instance_id, &args).await;

        record.last_operation = Some(match result {
            Ok(_) => LastOperation::succeeded(OperationKind::Provision, "provisioned"),
            Err(e) => {
                warn!(instance_id = %instance_id, error = %e, "Provision failed");
                LastOperation::failed(OperationKind::Provision, e.to_string())
            }
        });
        self.store.save_instance(instance_id, &mut record).await?;
        Ok(OperationOutcome::Completed(record))
    }

    /// Change parameters or context of an instance and upgrade its release.
    pub async fn update(
        &self,
        instance_id: &str,
        request: UpdateRequest,
    ) -> Result<OperationOutcome<InstanceRecord>> {
        with_instance_lock(self.lock.as_ref(), instance_id, || {
            self.update_locked(instance_id, request)
        })
        .await
    }

    async fn update_locked(
        &self,
        instance_id: &str,
        request: UpdateRequest,
    ) -> Result<OperationOutcome<InstanceRecord>> {
        let mut record = self.store.load_instance(instance_id).await?;
        check_unchanged("service_id", &record.details.service_id, &request.service_id)?;
        if let Some(plan_id) = &request.plan_id {
            check_unchanged("plan_id", &record.details.plan_id, plan_id)?;
        }

        let service_id = record.details.service_id.clone();
        let plan_id = record.details.plan_id.clone();
        let catalog = self.store.load_catalog().await?;
        if !catalog.addon_updateable(&service_id)? {
            return Err(Error::InvalidRequest(format!(
                "service {} is not updateable",
                service_id
            )));
        }

        let params = request
            .parameters
            .clone()
            .or_else(|| record.details.parameters.clone())
            .unwrap_or_default();
        let allow_list = catalog.addon_allowed_parameters(&service_id, &plan_id)?;
        let report = parameters::verify(&allow_list, &params)?;
        if !report.is_valid() {
            warn!(instance_id = %instance_id, %report, "Update rejected");
            return Ok(OperationOutcome::InvalidParameters(report));
        }

        let (chart, plan) = catalog.addon_paths(&service_id, &plan_id)?;
        let args = self
            .args
            .build(instance_id, &params, plan_values_args(&plan).await?)
            .await?;

        if let Some(context) = request.context {
            record.details.context = context;
        }
        if request.parameters.is_some() {
            record.details.parameters = request.parameters;
        }
        record.last_operation = Some(LastOperation::in_progress(OperationKind::Update, "updating"));
        self.store.save_instance(instance_id, &mut record).await?;

        let result = self
            .helm
            .upgrade(instance_id, record.details.namespace(), &chart, args.clone())
            .await;
        self.prune_raw_values(instance_id, &args).await;

        record.last_operation = Some(match result {
            Ok(_) => LastOperation::succeeded(OperationKind::Update, "updated"),
            Err(e) => {
                warn!(instance_id = %instance_id, error = %e, "Update failed");
                LastOperation::failed(OperationKind::Update, e.to_string())
            }
        });
        self.store.save_instance(instance_id, &mut record).await?;
        Ok(OperationOutcome::Completed(record))
    }

    async fn prune_raw_values(&self, instance_id: &str, args: &[String]) {
        if let Err(e) = self.args.prune_raw_values(instance_id, args).await {
            warn!(instance_id = %instance_id, error = %e, "Failed to prune raw values");
        }
    }

    /// Uninstall the release and delete the instance's records.
    ///
    /// On success the returned record is the final state; it is no longer
    /// persisted. On failure the record stays with a `failed` state.
    pub async fn deprovision(&self, instance_id: &str) -> Result<InstanceRecord> {
        with_instance_lock(self.lock.as_ref(), instance_id, || {
            self.deprovision_locked(instance_id)
        })
        .await
    }

    async fn deprovision_locked(&self, instance_id: &str) -> Result<InstanceRecord> {
        let mut record = self.store.load_instance(instance_id).await?;
        record.last_operation = Some(LastOperation::in_progress(
            OperationKind::Deprovision,
            "deprovisioning",
        ));
        self.store.save_instance(instance_id, &mut record).await?;

        match self
            .helm
            .uninstall(instance_id, record.details.namespace())
            .await
        {
            Ok(_) => {
                self.store.delete_instance(instance_id).await?;
                record.last_operation = Some(LastOperation::succeeded(
                    OperationKind::Deprovision,
                    "deprovisioned",
                ));
                Ok(record)
            }
            Err(e) => {
                warn!(instance_id = %instance_id, error = %e, "Deprovision failed");
                record.last_operation =
                    Some(LastOperation::failed(OperationKind::Deprovision, e.to_string()));
                self.store.save_instance(instance_id, &mut record).await?;
                Ok(record)
            }
        }
    }

    /// Resolve the plan's credentials and persist them as the instance binding.
    ///
    /// A resolved binding with the same id is returned as is; a failed one
    /// is resolved again and replaced.
    pub async fn bind(
        &self,
        instance_id: &str,
        binding_id: &str,
        request: BindRequest,
    ) -> Result<BindingRecord> {
        with_instance_lock(self.lock.as_ref(), instance_id, || {
            self.bind_locked(instance_id, binding_id, request)
        })
        .await
    }

    async fn bind_locked(
        &self,
        instance_id: &str,
        binding_id: &str,
        request: BindRequest,
    ) -> Result<BindingRecord> {
        let record = self.store.load_instance(instance_id).await?;
        check_unchanged("service_id", &record.details.service_id, &request.service_id)?;
        check_unchanged("plan_id", &record.details.plan_id, &request.plan_id)?;

        match self.store.load_binding(instance_id).await {
            Ok(existing) if !existing.succeeded() => {}
            Ok(existing) if existing.id == binding_id => return Ok(existing),
            Ok(existing) => {
                return Err(Error::InvalidRequest(format!(
                    "instance {} is already bound as {}",
                    instance_id, existing.id
                )));
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let catalog = self.store.load_catalog().await?;
        let plan = catalog.find_plan(&request.service_id, &request.plan_id)?;
        let bindable = plan
            .bindable
            .unwrap_or(catalog.addon_bindable(&request.service_id)?);
        if !bindable {
            return Err(Error::InvalidRequest(format!(
                "plan {} is not bindable",
                request.plan_id
            )));
        }

        let (_, plan_path) = catalog.addon_paths(&request.service_id, &request.plan_id)?;
        let template = load_bind_template(&plan_path).await?;
        let namespace = record.details.namespace();

        let mut binding = BindingRecord::new(binding_id, instance_id, Map::new());
        match self.resolve_credentials(namespace, &template).await {
            Ok(credentials) => {
                binding.credentials = credentials;
                binding.last_operation =
                    Some(LastOperation::succeeded(OperationKind::Bind, "bound"));
            }
            Err(e) => {
                warn!(instance_id = %instance_id, binding_id = %binding_id, error = %e, "Bind failed");
                binding.last_operation =
                    Some(LastOperation::failed(OperationKind::Bind, e.to_string()));
            }
        }
        self.store.save_binding(instance_id, &mut binding).await?;
        info!(instance_id = %instance_id, binding_id = %binding_id, "Binding saved");
        Ok(binding)
    }

    async fn resolve_credentials(
        &self,
        namespace: &str,
        template: &BindTemplate,
    ) -> Result<Map<String, Value>> {
        let mut credentials = Map::new();
        for item in &template.credentials {
            let value = match (&item.value, &item.value_from) {
                (Some(value), _) => value.clone(),
                (None, Some(source)) => {
                    Value::String(self.kubectl.credential_value(namespace, source).await?)
                }
                (None, None) => {
                    return Err(Error::InvalidRequest(format!(
                        "credential {} has neither value nor valueFrom",
                        item.name
                    )));
                }
            };
            credentials.insert(item.name.clone(), value);
        }
        Ok(credentials)
    }

    /// Delete the binding of an instance.
    pub async fn unbind(&self, instance_id: &str, binding_id: &str) -> Result<BindingRecord> {
        with_instance_lock(self.lock.as_ref(), instance_id, || async move {
            let binding = self.fetch_binding(instance_id, binding_id).await?;
            self.store.delete_binding(instance_id).await?;
            Ok(binding)
        })
        .await
    }

    /// Last operation of an instance, `None` for a record never operated on.
    pub async fn last_operation(&self, instance_id: &str) -> Result<Option<LastOperation>> {
        Ok(self.store.load_instance(instance_id).await?.last_operation)
    }

    /// Binding `binding_id` of an instance.
    pub async fn fetch_binding(&self, instance_id: &str, binding_id: &str) -> Result<BindingRecord> {
        let not_found = || Error::BindingNotFound {
            instance_id: instance_id.to_string(),
            binding_id: binding_id.to_string(),
        };
        match self.store.load_binding(instance_id).await {
            Ok(binding) if binding.id == binding_id => Ok(binding),
            Ok(_) => Err(not_found()),
            Err(e) if e.is_not_found() => Err(not_found()),
            Err(e) => Err(e),
        }
    }

    /// Arguments an upgrade of the instance would pass to helm with `params`.
    ///
    /// Raw values are still written to the instance directory; nothing is run.
    pub async fn preview_args(&self, instance_id: &str, params: &ParameterSet) -> Result<Vec<String>> {
        let record = self.store.load_instance(instance_id).await?;
        let catalog = self.store.load_catalog().await?;
        let (chart, plan) =
            catalog.addon_paths(&record.details.service_id, &record.details.plan_id)?;

        let mut base = vec![
            "upgrade".to_string(),
            instance_id.to_string(),
            chart.to_string_lossy().into_owned(),
            "--namespace".to_string(),
            record.details.namespace().to_string(),
        ];
        base.extend(plan_values_args(&plan).await?);
        let mut args = self.args.build(instance_id, params, base).await?;
        args.extend(self.helm.location_overrides(instance_id));
        Ok(args)
    }
}

fn check_unchanged(field: &'static str, current: &str, requested: &str) -> Result<()> {
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

async fn plan_values_args(plan_path: &Path) -> Result<Vec<String>> {
    let values = plan_path.join(PLAN_VALUES);
    if tokio::fs::try_exists(&values).await? {
        Ok(vec!["-f".to_string(), values.to_string_lossy().into_owned()])
    } else {
        Ok(Vec::new())
    }
}

async fn load_bind_template(plan_path: &Path) -> Result<BindTemplate> {
    let path = plan_path.join(BIND_TEMPLATE);
    let content = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::InvalidRequest(format!(
                "plan has no {} at {}",
                BIND_TEMPLATE,
                path.display()
            )));
        }
        Err(e) => return Err(e.into()),
    };
    if content.trim().is_empty() {
        return Ok(BindTemplate {
            credentials: Vec::new(),
        });
    }
    Ok(serde_yaml::from_str(&content)?)
}
