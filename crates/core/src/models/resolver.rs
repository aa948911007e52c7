//! Resolve the effective model for a logical agent.

use af_protocol::model_models::{ModelConfig, ModelSelections, SelectionMode};
use std::collections::BTreeMap;

use super::registry::ModelRegistry;

/// Pick the model for `agent_name`.
///
/// In per-agent mode an explicit choice for the agent wins; otherwise
/// `default_model` is used. If the identifier names a user-defined
/// registry entry its connection details are attached; otherwise the
/// service resolves the identifier against its own catalog.
///
/// Returns `None` when no identifier can be found, which callers treat as
/// "use the service default".
pub fn resolve(
    agent_name: &str,
    mode: SelectionMode,
    explicit: &BTreeMap<String, String>,
    default_model: Option<&str>,
    registry: &ModelRegistry,
) -> Option<ModelConfig> {
    let explicit_choice = match mode {
        SelectionMode::PerAgent => explicit
            .get(agent_name)
            .map(String::as_str)
            .filter(|m| !m.is_empty()),
        SelectionMode::Single => None,
    };

    let model = explicit_choice.or(default_model.filter(|m| !m.is_empty()))?;
    Some(registry.model_config(model))
}

/// [`resolve`] driven by a [`ModelSelections`] value.
///
/// When the selections carry no default, the catalog default is used.
pub fn resolve_for(agent_name: &str, selections: &ModelSelections, registry: &ModelRegistry) -> Option<ModelConfig> {
    let default_model = selections
        .default_model
        .as_deref()
        .or(registry.catalog().default_model.as_deref());
    resolve(
        agent_name,
        selections.mode,
        &selections.per_agent,
        default_model,
        registry,
    )
}
