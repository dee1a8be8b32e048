// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for helmbroker.

use std::path::PathBuf;
use std::time::Duration;

/// Default base directory when `HELMBROKER_ROOT` is not set.
pub const DEFAULT_ROOT: &str = "/etc/helmbroker";

/// Which backing mechanism serializes operations on one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockBackend {
    /// One advisory lock file per instance (`instance.lock`).
    File,
    /// Shared Redis lock token with expiry.
    Redis {
        /// Connection URL of the shared lock service.
        url: String,
    },
}

impl LockBackend {
    /// Backend identifier used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            LockBackend::File => "file",
            LockBackend::Redis { .. } => "redis",
        }
    }

    fn parse(kind: &str, redis_url: Option<String>) -> Result<Self, ConfigError> {
        match kind.to_ascii_lowercase().as_str() {
            "file" | "local" => Ok(LockBackend::File),
            "redis" => redis_url
                .map(|url| LockBackend::Redis { url })
                .ok_or(ConfigError::MissingEnvVar("HELMBROKER_REDIS_URL")),
            _ => Err(ConfigError::InvalidLockBackend(kind.to_string())),
        }
    }
}

/// Tuning for the distributed lock backend.
#[derive(Debug, Clone)]
pub struct LockTiming {
    /// Expiry of a held lock token.
    pub ttl: Duration,
    /// How long `acquire` keeps retrying before giving up.
    pub acquire_timeout: Duration,
    /// Pause between acquisition attempts.
    pub retry_interval: Duration,
}

impl Default for LockTiming {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(600),
            acquire_timeout: Duration::from_secs(60),
            retry_interval: Duration::from_millis(100),
        }
    }
}

/// Broker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory holding one subdirectory per instance
    pub instances_dir: PathBuf,
    /// Root directory holding `addons.json` and addon charts
    pub addons_dir: PathBuf,
    /// Instance lock backend
    pub lock_backend: LockBackend,
    /// Distributed lock timing
    pub lock_timing: LockTiming,
    /// Package-manager binary
    pub helm_bin: String,
    /// Cluster CLI binary
    pub kubectl_bin: String,
    /// Timeout applied to every external command
    pub command_timeout: Duration,
}

impl Config {
    /// Build a configuration rooted at `root` with default settings.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            instances_dir: root.join("instances"),
            addons_dir: root.join("addons"),
            lock_backend: LockBackend::File,
            lock_timing: LockTiming::default(),
            helm_bin: "helm".to_string(),
            kubectl_bin: "kubectl".to_string(),
            command_timeout: Duration::from_secs(300),
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let root = PathBuf::from(
            std::env::var("HELMBROKER_ROOT").unwrap_or_else(|_| DEFAULT_ROOT.to_string()),
        );
        let mut config = Self::with_root(&root);

        if let Ok(dir) = std::env::var("HELMBROKER_INSTANCES_DIR") {
            config.instances_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("HELMBROKER_ADDONS_DIR") {
            config.addons_dir = PathBuf::from(dir);
        }

        let backend = std::env::var("HELMBROKER_LOCK_BACKEND").unwrap_or_else(|_| "file".into());
        config.lock_backend =
            LockBackend::parse(&backend, std::env::var("HELMBROKER_REDIS_URL").ok())?;

        config.lock_timing = LockTiming {
            ttl: Duration::from_secs(env_u64("HELMBROKER_LOCK_TTL_SECS", 600)?),
            acquire_timeout: Duration::from_secs(env_u64("HELMBROKER_LOCK_TIMEOUT_SECS", 60)?),
            retry_interval: Duration::from_millis(env_u64("HELMBROKER_LOCK_RETRY_MS", 100)?),
        };

        if let Ok(bin) = std::env::var("HELMBROKER_HELM_BIN") {
            config.helm_bin = bin;
        }
        if let Ok(bin) = std::env::var("HELMBROKER_KUBECTL_BIN") {
            config.kubectl_bin = bin;
        }
        config.command_timeout =
            Duration::from_secs(env_u64("HELMBROKER_COMMAND_TIMEOUT_SECS", 300)?);

        Ok(config)
    }
}

fn env_u64(var: &'static str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => parse_u64(var, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_u64(var: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidNumber(var, raw.to_string()))
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// The lock backend name is not recognised.
    #[error("Invalid lock backend: {0} (expected 'file' or 'redis')")]
    InvalidLockBackend(String),
    /// A numeric setting could not be parsed.
    #[error("Invalid value for {0}: {1}")]
    InvalidNumber(&'static str, String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_root_layout() {
        let config = Config::with_root("/srv/broker");
        assert_eq!(config.instances_dir, PathBuf::from("/srv/broker/instances"));
        assert_eq!(config.addons_dir, PathBuf::from("/srv/broker/addons"));
        assert_eq!(config.lock_backend, LockBackend::File);
        assert_eq!(config.helm_bin, "helm");
    }

    #[test]
    fn test_parse_lock_backend() {
        assert_eq!(LockBackend::parse("FILE", None).unwrap(), LockBackend::File);
        assert_eq!(
            LockBackend::parse("redis", Some("redis://cache:6379".into())).unwrap(),
            LockBackend::Redis {
                url: "redis://cache:6379".into()
            }
        );
        assert!(matches!(
            LockBackend::parse("redis", None),
            Err(ConfigError::MissingEnvVar("HELMBROKER_REDIS_URL"))
        ));
        assert!(matches!(
            LockBackend::parse("etcd", None),
            Err(ConfigError::InvalidLockBackend(_))
        ));
    }

    #[test]
    fn test_parse_u64() {
        assert_eq!(parse_u64("X", " 42 ").unwrap(), 42);
        let err = parse_u64("HELMBROKER_LOCK_TTL_SECS", "soon").unwrap_err();
        assert!(err.to_string().contains("HELMBROKER_LOCK_TTL_SECS"));
    }
}
