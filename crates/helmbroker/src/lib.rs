// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Helmbroker - Instance State Core
//!
//! This crate holds the state management core of a service broker that
//! provisions resources by driving helm against a cluster: persisted and
//! schema-checked instance and binding records, per-instance mutual
//! exclusion, and the parameter allow-list validator that turns free-form
//! caller input into verified helm arguments.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                 OSB API layer / helmbroker-ctl               │
//! └──────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Broker                             │
//! │  ┌────────────┐ ┌────────────┐ ┌────────────┐ ┌───────────┐  │
//! │  │  Instance  │ │ Parameter  │ │ CommandArg │ │ Metadata  │  │
//! │  │    Lock    │ │ Validator  │ │  Builder   │ │   Store   │  │
//! │  └────────────┘ └────────────┘ └────────────┘ └───────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//!        │                               │              │
//!        ▼                               ▼              ▼
//! ┌──────────────┐             ┌──────────────┐  ┌──────────────┐
//! │ instance.lock│             │ helm/kubectl │  │ instance.json│
//! │   or Redis   │             │  (external)  │  │ addons.json  │
//! └──────────────┘             └──────────────┘  └──────────────┘
//! ```
//!
//! # Operations
//!
//! | Operation | Locked | Description |
//! |-----------|--------|-------------|
//! | `provision` | Yes | Create the instance record and install the release |
//! | `update` | Yes | Replace parameters or context and upgrade the release |
//! | `deprovision` | Yes | Uninstall the release and delete the records |
//! | `bind` | Yes | Resolve plan credentials into `binding.json` |
//! | `unbind` | Yes | Delete `binding.json` |
//! | `last_operation` | No | Read the instance's last operation |
//! | `fetch_binding` | No | Read the instance's binding |
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `HELMBROKER_ROOT` | No | `/etc/helmbroker` | Base directory |
//! | `HELMBROKER_INSTANCES_DIR` | No | `$ROOT/instances` | Instance storage root |
//! | `HELMBROKER_ADDONS_DIR` | No | `$ROOT/addons` | Addon catalog root |
//! | `HELMBROKER_LOCK_BACKEND` | No | `file` | `file` or `redis` |
//! | `HELMBROKER_REDIS_URL` | With `redis` | - | Shared lock service |
//! | `HELMBROKER_LOCK_TTL_SECS` | No | `600` | Distributed lock expiry |
//! | `HELMBROKER_LOCK_TIMEOUT_SECS` | No | `60` | Distributed acquire timeout |
//! | `HELMBROKER_LOCK_RETRY_MS` | No | `100` | Distributed acquire retry interval |
//! | `HELMBROKER_HELM_BIN` | No | `helm` | Package-manager binary |
//! | `HELMBROKER_KUBECTL_BIN` | No | `kubectl` | Cluster CLI binary |
//! | `HELMBROKER_COMMAND_TIMEOUT_SECS` | No | `300` | Per-command timeout |
//!
//! # Modules
//!
//! - [`broker`]: Operation orchestration under the instance lock
//! - [`cli`]: helm and kubectl collaborators
//! - [`command`]: Parameter to helm argument translation
//! - [`config`]: Configuration from environment variables
//! - [`error`]: Error types
//! - [`lock`]: Per-instance lock backends
//! - [`parameters`]: Allow-list validation
//! - [`schema`]: Record schemas
//! - [`store`]: Instance, binding and catalog persistence

#![deny(missing_docs)]

/// Operation orchestration under the instance lock.
pub mod broker;

/// External CLI collaborators (helm, kubectl).
pub mod cli;

/// Parameter to helm argument translation.
pub mod command;

/// Configuration loaded from environment variables.
pub mod config;

/// Error types for broker operations.
pub mod error;

/// Per-instance lock backends.
pub mod lock;

/// Parameter allow-list validation.
pub mod parameters;

/// Structural schemas for persisted records.
pub mod schema;

/// Instance, binding and catalog persistence.
pub mod store;

pub use broker::{Broker, BrokerBuilder, OperationOutcome};
pub use config::Config;
pub use error::{Error, Result};
