// Copyright 2025 ProximaDB
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Datanode configuration with smart defaults

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::error::{FlushError, FlushResult};
use super::types::UniqueId;

/// Top-level datanode configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataNodeConfig {
    pub node_id: String,
    /// Collection served by this node's data sync service
    pub collection_id: UniqueId,
    pub flush: FlushConfig,
    pub logging: LoggingConfig,
}

impl Default for DataNodeConfig {
    fn default() -> Self {
        Self {
            node_id: "datanode-1".to_string(),
            collection_id: 1,
            flush: FlushConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl DataNodeConfig {
    pub fn from_toml_str(raw: &str) -> FlushResult<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| FlushError::Config(format!("invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> FlushResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| FlushError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> FlushResult<()> {
        self.flush.validate()
    }
}

/// Flush path layout and notify policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlushConfig {
    pub insert_binlog_root_path: String,
    pub stats_binlog_root_path: String,
    pub delete_binlog_root_path: String,
    /// KV prefix for persisted segment checkpoints
    pub checkpoint_key_prefix: String,
    /// Retry policy for SaveBinlogPaths
    pub notify_retry: RetryConfig,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            insert_binlog_root_path: "files/insert_log".to_string(),
            stats_binlog_root_path: "files/stats_log".to_string(),
            delete_binlog_root_path: "files/delta_log".to_string(),
            checkpoint_key_prefix: "datanode/segment_checkpoint".to_string(),
            notify_retry: RetryConfig::default(),
        }
    }
}

impl FlushConfig {
    pub fn validate(&self) -> FlushResult<()> {
        let roots = [
            ("insert_binlog_root_path", &self.insert_binlog_root_path),
            ("stats_binlog_root_path", &self.stats_binlog_root_path),
            ("delete_binlog_root_path", &self.delete_binlog_root_path),
            ("checkpoint_key_prefix", &self.checkpoint_key_prefix),
        ];
        for (field, value) in roots {
            if value.trim().is_empty() {
                return Err(FlushError::Config(format!("{} must not be empty", field)));
            }
        }
        self.notify_retry.validate()
    }

    pub fn checkpoint_key(&self, segment_id: UniqueId) -> String {
        format!("{}/{}", self.checkpoint_key_prefix.trim_end_matches('/'), segment_id)
    }
}

/// Retry configuration for coordinator calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 3000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: usize, initial_delay_ms: u64, max_delay_ms: u64, backoff_multiplier: f64) -> Self {
        Self {
            max_attempts,
            initial_delay_ms,
            max_delay_ms,
            backoff_multiplier,
        }
    }

    /// Fixed attempt count with no sleep between attempts
    pub fn attempts(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            backoff_multiplier: 1.0,
        }
    }

    pub fn calculate_delay(&self, attempt: usize) -> Duration {
        let delay_ms = (self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32))
            .min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(delay_ms)
    }

    pub fn validate(&self) -> FlushResult<()> {
        if self.max_attempts == 0 {
            return Err(FlushError::Config("notify_retry.max_attempts must be at least 1".to_string()));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(FlushError::Config(format!(
                "notify_retry.backoff_multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        Ok(())
    }
}

/// Tracing subscriber settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub with_target: bool,
    pub with_line_number: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            with_target: true,
            with_line_number: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = DataNodeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.flush.notify_retry.max_attempts, 3);
        assert_eq!(config.flush.checkpoint_key(42), "datanode/segment_checkpoint/42");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = DataNodeConfig::from_toml_str(
            r#"
            collection_id = 9

            [flush]
            insert_binlog_root_path = "bucket/insert"

            [flush.notify_retry]
            max_attempts = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.collection_id, 9);
        assert_eq!(config.flush.insert_binlog_root_path, "bucket/insert");
        assert_eq!(config.flush.delete_binlog_root_path, "files/delta_log");
        assert_eq!(config.flush.notify_retry.max_attempts, 5);
        assert_eq!(config.flush.notify_retry.initial_delay_ms, 100);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let result = DataNodeConfig::from_toml_str("[flush.notify_retry]\nmax_attempts = 0\n");
        assert!(matches!(result, Err(FlushError::Config(_))));
    }

    #[test]
    fn test_empty_root_rejected() {
        let mut config = FlushConfig::default();
        config.stats_binlog_root_path = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_is_capped() {
        let retry = RetryConfig::new(5, 100, 300, 2.0);
        assert_eq!(retry.calculate_delay(0), Duration::from_millis(100));
        assert_eq!(retry.calculate_delay(1), Duration::from_millis(200));
        assert_eq!(retry.calculate_delay(4), Duration::from_millis(300));
        assert_eq!(RetryConfig::attempts(2).calculate_delay(3), Duration::ZERO);
    }
}
