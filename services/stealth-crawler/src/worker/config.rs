//! Worker configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Worker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Maximum number of queued items before `submit` reports the queue full
    pub queue_capacity: usize,

    /// Number of items the engine processes at once
    pub max_concurrency: usize,

    /// How long shutdown waits for in-flight items before aborting them
    #[serde(with = "duration_secs")]
    pub shutdown_grace: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            max_concurrency: 10,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl WorkerConfig {
    /// Create a new config builder
    pub fn builder() -> WorkerConfigBuilder {
        WorkerConfigBuilder::default()
    }
}

/// Builder for WorkerConfig
#[derive(Default)]
pub struct WorkerConfigBuilder {
    config: WorkerConfig,
}

impl WorkerConfigBuilder {
    /// Set queue capacity (clamped to at least 1)
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity.max(1);
        self
    }

    /// Set the number of concurrently processed items (clamped to at least 1)
    pub fn max_concurrency(mut self, workers: usize) -> Self {
        self.config.max_concurrency = workers.max(1);
        self
    }

    /// Set shutdown grace period
    pub fn shutdown_grace(mut self, duration: Duration) -> Self {
        self.config.shutdown_grace = duration;
        self
    }

    /// Build the config
    pub fn build(self) -> WorkerConfig {
        self.config
    }
}

/// Serialize a `Duration` as fractional seconds
pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
