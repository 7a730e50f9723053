//! Service configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use walletledger_common::constants::default_drain_timeout;
use walletledger_common::{LedgerError, Result};
use walletledger_ledger::EngineConfig;

/// Storage backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process multi-version store.
    Memory,
    /// PostgreSQL via `DATABASE_URL`.
    Postgres,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Memory => f.write_str("memory"),
            BackendKind::Postgres => f.write_str("postgres"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" | "mem" => Ok(BackendKind::Memory),
            "postgres" | "postgresql" | "pg" => Ok(BackendKind::Postgres),
            other => Err(LedgerError::ConfigurationError(format!(
                "unknown backend: {}",
                other
            ))),
        }
    }
}

/// Main service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Node ID (generated if not provided).
    pub node_id: Option<String>,
    /// Storage backend.
    pub backend: BackendKind,
    /// Database URL, used by the Postgres backend.
    pub database_url: String,
    /// Maximum pooled database connections.
    pub max_connections: u32,
    /// Pool acquire timeout.
    pub acquire_timeout: Duration,
    /// Maximum time `stop` waits for in-flight operations.
    pub drain_timeout: Duration,
    /// Engine timeouts and retry policy.
    pub engine: EngineConfig,
    /// Log level.
    pub log_level: String,
    /// Emit JSON logs.
    pub log_json: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            backend: BackendKind::Memory,
            database_url: "postgres://localhost/walletledger".to_string(),
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
            drain_timeout: default_drain_timeout(),
            engine: EngineConfig::default(),
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    ///
    /// Unset or unparsable values keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let millis = |key: &str| {
            lookup(key)
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis)
        };

        if let Some(node_id) = lookup("WALLET_NODE_ID") {
            config.node_id = Some(node_id);
        }

        if let Some(backend) = lookup("WALLET_BACKEND").and_then(|v| v.parse().ok()) {
            config.backend = backend;
        }

        if let Some(url) = lookup("DATABASE_URL") {
            config.database_url = url;
        }

        if let Some(max) = lookup("WALLET_MAX_CONNECTIONS").and_then(|v| v.parse().ok()) {
            config.max_connections = max;
        }

        if let Some(timeout) = millis("WALLET_UNIT_TIMEOUT_MS") {
            config.engine.unit_timeout = timeout;
        }

        if let Some(timeout) = millis("WALLET_OPERATION_TIMEOUT_MS") {
            config.engine.operation_timeout = timeout;
        }

        if let Some(attempts) = lookup("WALLET_RETRY_MAX_ATTEMPTS").and_then(|v| v.parse().ok()) {
            config.engine.retry.max_attempts = attempts;
        }

        if let Some(backoff) = millis("WALLET_RETRY_BASE_BACKOFF_MS") {
            config.engine.retry.base_backoff = backoff;
        }

        if let Some(backoff) = millis("WALLET_RETRY_MAX_BACKOFF_MS") {
            config.engine.retry.max_backoff = backoff;
        }

        if let Some(level) = lookup("LOG_LEVEL") {
            config.log_level = level;
        }

        if let Some(format) = lookup("LOG_FORMAT") {
            config.log_json = format.eq_ignore_ascii_case("json");
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.backend == BackendKind::Postgres && self.database_url.is_empty() {
            return Err(LedgerError::ConfigurationError(
                "Database URL cannot be empty".to_string(),
            ));
        }

        if self.max_connections == 0 {
            return Err(LedgerError::ConfigurationError(
                "Max connections cannot be 0".to_string(),
            ));
        }

        self.engine.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ServiceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.backend, BackendKind::Memory);
    }

    #[test]
    fn test_lookup_overrides() {
        let config = ServiceConfig::from_lookup(lookup(&[
            ("WALLET_BACKEND", "postgres"),
            ("DATABASE_URL", "postgres://db/wallet"),
            ("WALLET_UNIT_TIMEOUT_MS", "250"),
            ("WALLET_RETRY_MAX_ATTEMPTS", "9"),
            ("WALLET_RETRY_MAX_BACKOFF_MS", "not-a-number"),
            ("LOG_FORMAT", "json"),
        ]));

        assert_eq!(config.backend, BackendKind::Postgres);
        assert_eq!(config.database_url, "postgres://db/wallet");
        assert_eq!(config.engine.unit_timeout, Duration::from_millis(250));
        assert_eq!(config.engine.retry.max_attempts, 9);
        assert_eq!(config.engine.retry.max_backoff, Duration::from_millis(50));
        assert!(config.log_json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_config() {
        let mut config = ServiceConfig::default();
        config.max_connections = 0;
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.engine.unit_timeout = Duration::from_secs(60);
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.backend = BackendKind::Postgres;
        config.database_url.clear();
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.engine.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    proptest::proptest! {
        #[test]
        fn prop_timeouts_are_read_as_millis(unit in 1u64..10_000, op in 1u64..100_000) {
            let config = ServiceConfig::from_lookup(lookup(&[
                ("WALLET_UNIT_TIMEOUT_MS", &unit.to_string()),
                ("WALLET_OPERATION_TIMEOUT_MS", &op.to_string()),
            ]));
            proptest::prop_assert_eq!(config.engine.unit_timeout, Duration::from_millis(unit));
            proptest::prop_assert_eq!(config.engine.operation_timeout, Duration::from_millis(op));
        }
    }

    #[test]
    fn test_backend_parse() {
        assert_eq!("PG".parse::<BackendKind>().unwrap(), BackendKind::Postgres);
        assert_eq!("memory".parse::<BackendKind>().unwrap(), BackendKind::Memory);
        assert!("redis".parse::<BackendKind>().is_err());
    }
}
