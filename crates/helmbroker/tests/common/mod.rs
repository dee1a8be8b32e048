// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for helmbroker integration tests.
//!
//! Provides TestContext with a temporary root, a catalog fixture and a
//! broker wired to a mock command runner.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use helmbroker::cli::MockCommandRunner;
use helmbroker::{Broker, Config};
use serde_json::{Map, Value, json};
use tempfile::TempDir;

pub const BIND_YAML: &str = r#"credentials:
  - name: host
    valueFrom:
      serviceRef:
        name: redis-master
        jsonpath: "{.spec.clusterIP}"
  - name: password
    valueFrom:
      secretKeyRef:
        name: redis
        jsonpath: "{.data.redis-password}"
  - name: port
    value: 6379
"#;

pub fn catalog() -> Value {
    json!({
        "redis-7.0": {
            "id": "svc-redis",
            "name": "redis",
            "version": "7.0",
            "description": "Redis key-value store",
            "bindable": true,
            "plan_updateable": true,
            "allow_parameters": [
                {"name": "replicas"},
                {"name": "auth"},
                {"name": "persistence.size"}
            ],
            "plans": [
                {"id": "p-small", "name": "small", "description": "Single node"},
                {
                    "id": "p-ha",
                    "name": "ha",
                    "description": "Replicated",
                    "allow_parameters": [
                        {"name": "replicas", "required": true},
                        {"name": "sentinel"}
                    ]
                }
            ]
        },
        "memcached-1.6": {
            "id": "svc-memcached",
            "name": "memcached",
            "version": "1.6",
            "bindable": false,
            "plans": [
                {"id": "p-basic", "name": "basic", "description": "Basic"}
            ]
        },
        "legacy-1.0": {
            "id": "svc-legacy",
            "name": "legacy",
            "version": "1.0",
            "bindable": false,
            "archive": true,
            "plans": [
                {"id": "p-old", "name": "old", "description": "Old"}
            ]
        }
    })
}

/// Broker over a temporary root with the catalog fixture installed.
pub struct TestContext {
    pub dir: TempDir,
    pub config: Config,
    pub runner: MockCommandRunner,
    pub broker: Broker,
}

impl TestContext {
    pub async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let config = Config::with_root(dir.path());

        std::fs::create_dir_all(&config.addons_dir).unwrap();
        std::fs::write(
            config.addons_dir.join("addons.json"),
            serde_json::to_string_pretty(&catalog()).unwrap(),
        )
        .unwrap();

        let small = config.addons_dir.join("redis-7.0/plans/small");
        std::fs::create_dir_all(&small).unwrap();
        std::fs::write(small.join("bind.yaml"), BIND_YAML).unwrap();
        std::fs::write(small.join("values.yaml"), "architecture: standalone\n").unwrap();
        std::fs::create_dir_all(config.addons_dir.join("redis-7.0/chart/redis")).unwrap();

        let runner = MockCommandRunner::new();
        let broker = Broker::builder(config.clone())
            .runner(Arc::new(runner.clone()))
            .build()
            .await
            .unwrap();

        Self {
            dir,
            config,
            runner,
            broker,
        }
    }

    pub fn instance_dir(&self, instance_id: &str) -> PathBuf {
        self.config.instances_dir.join(instance_id)
    }

    pub fn chart_path(&self) -> String {
        self.config
            .addons_dir
            .join("redis-7.0/chart/redis")
            .to_string_lossy()
            .into_owned()
    }
}

pub fn params(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("params must be an object"),
    }
}

pub fn context(namespace: &str) -> Map<String, Value> {
    params(json!({"namespace": namespace, "platform": "kubernetes"}))
}
