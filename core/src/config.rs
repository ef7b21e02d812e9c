//! Configuration for a [`Query`](crate::query::Query).
//!
//! Values are plain serde structs so callers can embed them in whatever
//! configuration file or environment layer they already load. Every field has
//! a default; `QueryConfig::default()` is fan-out mode with credential
//! priming and no timeout.
//!
//! # Example YAML
//!
//! ```yaml
//! request_timeout_ms: 10000
//! prime_credential: true
//! batch:
//!   base_url: https://graph.example.com/v1.0
//!   endpoint: /$batch
//!   max_group_size: 20
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default number of operations per batch envelope.
pub const DEFAULT_MAX_GROUP_SIZE: usize = 20;

/// Aggregator settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct QueryConfig {
    /// Uniform per-operation limit. `None` waits indefinitely.
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,

    /// Prime the transport credential once before the first dispatch.
    #[serde(default = "default_true")]
    pub prime_credential: bool,

    /// Combine operations into batch envelopes instead of fanning out.
    #[serde(default)]
    pub batch: Option<BatchConfig>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: None,
            prime_credential: true,
            batch: None,
        }
    }
}

impl QueryConfig {
    pub fn batched(batch: BatchConfig) -> Self {
        Self {
            batch: Some(batch),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_ms == Some(0) {
            return Err(ConfigError::ZeroTimeout);
        }
        if let Some(batch) = &self.batch {
            batch.validate()?;
        }
        Ok(())
    }
}

/// Batch envelope settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct BatchConfig {
    /// Base URL that sub-request URLs are made relative to.
    pub base_url: String,

    /// Path of the batch endpoint under `base_url`.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_max_group_size")]
    pub max_group_size: usize,
}

impl BatchConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            endpoint: default_endpoint(),
            max_group_size: default_max_group_size(),
        }
    }

    pub fn with_max_group_size(mut self, max_group_size: usize) -> Self {
        self.max_group_size = max_group_size;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_group_size == 0 {
            return Err(ConfigError::ZeroGroupSize);
        }
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::EmptyEndpoint);
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_endpoint() -> String {
    "/$batch".to_string()
}

fn default_max_group_size() -> usize {
    DEFAULT_MAX_GROUP_SIZE
}
