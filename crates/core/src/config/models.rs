//! Configuration models.
//!
//! # Example
//!
//! ```toml
//! # .agentflow/config.toml
//! [service]
//! base_url = "http://localhost:8000"
//! discovery_timeout_ms = 5000
//!
//! [pipeline]
//! history_capacity = 50
//! max_attempts = 3
//! progression_mode = "manual"
//!
//! [evaluator]
//! poll_interval_ms = 2000
//!
//! [registry]
//! sync = "mirror"
//! ```

use af_protocol::pipeline_models::ProgressionMode;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Unified application configuration.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceConfig,
    pub pipeline: PipelineConfig,
    pub evaluator: EvaluatorConfig,
    pub storage: StorageConfig,
    pub registry: RegistryConfig,
}

/// Remote agent service connection.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    pub base_url: String,
    /// Timeout for provider and custom-model listing calls.
    ///
    /// Stage calls have no client-side timeout; they end by response or
    /// cancellation.
    pub discovery_timeout_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            discovery_timeout_ms: 5_000,
        }
    }
}

impl ServiceConfig {
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of history items kept, newest first.
    pub history_capacity: usize,
    /// Highest attempt number regeneration may reach.
    pub max_attempts: u32,
    pub default_temperature: f64,
    pub progression_mode: ProgressionMode,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            history_capacity: 50,
            max_attempts: 3,
            default_temperature: 0.3,
            progression_mode: ProgressionMode::Manual,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct EvaluatorConfig {
    pub poll_interval_ms: u64,
    pub default_item_limit: u32,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            default_item_limit: 10,
        }
    }
}

impl EvaluatorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for persisted client state. Defaults to `.agentflow/state`.
    pub data_dir: Option<PathBuf>,
}

/// Whether registry changes are mirrored to the service.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    #[default]
    Mirror,
    LocalOnly,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct RegistryConfig {
    pub sync: SyncMode,
}
