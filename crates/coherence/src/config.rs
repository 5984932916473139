// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Notification layer configuration.
//!
//! Supports both programmatic and file-based (TOML) configuration.
//!
//! ```toml
//! flush_interval_ms = 100
//! subject_prefix = "P0-"
//!
//! [duplicate_window]
//! generations = 4
//! ops_per_generation = 4096
//!
//! [replication]
//! batch_size = 250
//! poll_interval_ms = 1000
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Periodic flush period for non-transactional events.
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 100;

/// Protocol prefix prepended to every subject handed to a transport.
pub const DEFAULT_SUBJECT_PREFIX: &str = "P0-";

/// Rows below this count are processed in one pass by the replication poller.
pub const DEFAULT_REPLICATION_BATCH_SIZE: usize = 250;

/// Upper bound on a decompressed batch body (64 MiB).
pub const DEFAULT_MAX_DECODED_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration of a notification manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Periodic flush period (milliseconds).
    #[serde(default = "default_flush_interval")]
    pub flush_interval_ms: u64,

    /// Prefix prepended to subjects on the wire.
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,

    /// Deflate level (0-9) applied to batch bodies.
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,

    /// Decompression limit for one inbound batch body.
    #[serde(default = "default_max_decoded_body")]
    pub max_decoded_body_bytes: usize,

    /// Duplicate suppression window of the dual adapter.
    #[serde(default)]
    pub duplicate_window: DuplicateWindowConfig,

    /// Replication poller settings.
    #[serde(default)]
    pub replication: ReplicationConfig,
}

fn default_flush_interval() -> u64 {
    DEFAULT_FLUSH_INTERVAL_MS
}

fn default_subject_prefix() -> String {
    DEFAULT_SUBJECT_PREFIX.to_string()
}

fn default_compression_level() -> u32 {
    6
}

fn default_max_decoded_body() -> usize {
    DEFAULT_MAX_DECODED_BODY_BYTES
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            subject_prefix: default_subject_prefix(),
            compression_level: default_compression_level(),
            max_decoded_body_bytes: DEFAULT_MAX_DECODED_BODY_BYTES,
            duplicate_window: DuplicateWindowConfig::default(),
            replication: ReplicationConfig::default(),
        }
    }
}

impl NotificationConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.flush_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "flush_interval_ms must be greater than zero".into(),
            ));
        }
        if self.compression_level > 9 {
            return Err(ConfigError::Invalid(format!(
                "compression_level {} out of range 0-9",
                self.compression_level
            )));
        }
        if self.max_decoded_body_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_decoded_body_bytes must be greater than zero".into(),
            ));
        }
        self.duplicate_window.validate()?;
        self.replication.validate()?;
        Ok(())
    }

    /// Set the flush interval.
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval_ms = interval.as_millis().max(1) as u64;
        self
    }

    /// Set the subject prefix.
    pub fn with_subject_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.subject_prefix = prefix.into();
        self
    }

    /// Set the replication settings.
    pub fn with_replication(mut self, replication: ReplicationConfig) -> Self {
        self.replication = replication;
        self
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

/// Duplicate window sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateWindowConfig {
    /// Number of generations retained before the oldest is dropped.
    #[serde(default = "default_generations")]
    pub generations: usize,

    /// Marks accepted into one generation before rotation.
    #[serde(default = "default_ops_per_generation")]
    pub ops_per_generation: usize,

    /// Age after which the current generation rotates regardless of traffic.
    #[serde(default = "default_generation_ttl")]
    pub generation_ttl_ms: u64,
}

fn default_generations() -> usize {
    4
}

fn default_ops_per_generation() -> usize {
    4096
}

fn default_generation_ttl() -> u64 {
    5000
}

impl Default for DuplicateWindowConfig {
    fn default() -> Self {
        Self {
            generations: default_generations(),
            ops_per_generation: default_ops_per_generation(),
            generation_ttl_ms: default_generation_ttl(),
        }
    }
}

impl DuplicateWindowConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.generations < 2 {
            return Err(ConfigError::Invalid(
                "duplicate_window.generations must be at least 2".into(),
            ));
        }
        if self.ops_per_generation == 0 {
            return Err(ConfigError::Invalid(
                "duplicate_window.ops_per_generation must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Replication poller settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Direct-processing threshold and flush threshold for accumulated runs.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Hard cap on rows buffered for one broadcast. `None` keeps runs whole
    /// regardless of size. `Some(n)` closes a group before it would exceed
    /// `n` rows and splits a longer run at event-id boundaries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_batch_rows: Option<usize>,

    /// Poll period per source (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_batch_size() -> usize {
    DEFAULT_REPLICATION_BATCH_SIZE
}

fn default_poll_interval() -> u64 {
    1000
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_REPLICATION_BATCH_SIZE,
            max_batch_rows: None,
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl ReplicationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "replication.batch_size must be greater than zero".into(),
            ));
        }
        if let Some(max) = self.max_batch_rows {
            if max < self.batch_size {
                return Err(ConfigError::Invalid(format!(
                    "replication.max_batch_rows ({}) is below batch_size ({})",
                    max, self.batch_size
                )));
            }
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "replication.poll_interval_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
