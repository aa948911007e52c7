//! Model catalog, user-defined models and per-call model configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use ts_rs::TS;

/// Backend family of a user-defined model.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, TS)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Openai,
    OpenaiCompatible,
    Anthropic,
    Ollama,
    Vllm,
}

/// Connection details of a user-defined model.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TS)]
pub struct ModelConnection {
    pub provider_type: ProviderKind,
    pub base_url: String,
    pub model_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature_default: Option<f64>,
}

/// A user-defined registry entry, keyed by `id`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TS)]
pub struct CustomModel {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(flatten)]
    pub connection: ModelConnection,
    /// Last modification time; decides conflicts when merging stores.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// One built-in provider from the service catalog.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TS)]
pub struct ProviderInfo {
    pub name: String,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default = "default_true")]
    pub available: bool,
}

fn default_true() -> bool {
    true
}

/// Response to `GET /api/available-providers`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, TS)]
pub struct ProviderCatalog {
    #[serde(default)]
    pub providers: Vec<ProviderInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl ProviderCatalog {
    pub fn contains(&self, model: &str) -> bool {
        self.providers
            .iter()
            .any(|p| p.models.iter().any(|m| m == model))
    }
}

/// Effective model for one call.
///
/// `connection` is only set when `model` names a user-defined entry;
/// otherwise the service resolves the identifier against its own catalog.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TS)]
pub struct ModelConfig {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<ModelConnection>,
}

/// How the user picks models for the pipeline stages.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, TS)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    /// One model for every agent.
    #[default]
    Single,
    /// Explicit choices per agent, falling back to the default model.
    PerAgent,
}

/// The user's model choices for a pipeline invocation.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, TS)]
pub struct ModelSelections {
    #[serde(default)]
    pub mode: SelectionMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    /// Agent name to model identifier.
    #[serde(default)]
    pub per_agent: BTreeMap<String, String>,
}

impl ModelSelections {
    /// Use `model` for every agent.
    pub fn single(model: impl Into<String>) -> Self {
        Self {
            mode: SelectionMode::Single,
            default_model: Some(model.into()),
            per_agent: BTreeMap::new(),
        }
    }
}
