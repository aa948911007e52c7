//! The merged model registry.
//!
//! User-defined models come from two stores: the local durable store and
//! the service's listing. They are merged at load time with a pure union
//! keyed by identifier. Writes go to the local store first and are then
//! mirrored to the service when the sync mode and connectivity allow it;
//! a failed mirror is reported but never rolls back the local write.

use std::collections::BTreeMap;

use af_protocol::ipc::Event;
use af_protocol::model_models::{CustomModel, ModelConfig, ProviderCatalog};
use chrono::Utc;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

use crate::client::{AgentService, ServiceError};
use crate::config::models::SyncMode;
use crate::storage::{
    read_json, write_json, KeyValueStore, StorageError, CUSTOM_MODELS_KEY, SELECTED_MODEL_KEY,
};

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Invalid model definition: {0}")]
    InvalidModel(String),

    #[error("Unknown custom model: {0}")]
    UnknownModel(String),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Result of the last discovery call against the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Connectivity {
    Online,
    /// Discovery failed; stage-initiating actions stay disabled.
    Unreachable(String),
}

impl Connectivity {
    pub fn is_online(&self) -> bool {
        matches!(self, Connectivity::Online)
    }
}

/// What happened to the remote copy of a registry change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorOutcome {
    Mirrored,
    /// Not attempted: local-only sync mode or the service is unreachable.
    Skipped,
    /// The local write stands; the remote store is now behind.
    Failed(ServiceError),
}

/// Union of `local` and `remote` keyed by identifier.
///
/// On conflict the entry with the newer `updated_at` wins. When the
/// timestamps tie or either is missing the remote entry wins; the local
/// store takes no precedence. Output is ordered by identifier.
pub fn merge_custom_models(local: Vec<CustomModel>, remote: Vec<CustomModel>) -> Vec<CustomModel> {
    let mut merged: BTreeMap<String, CustomModel> = BTreeMap::new();

    for model in local {
        merged.insert(model.id.clone(), model);
    }

    for model in remote {
        let keep_existing = merged.get(&model.id).is_some_and(|existing| {
            matches!(
                (existing.updated_at, model.updated_at),
                (Some(existing_at), Some(remote_at)) if existing_at > remote_at
            )
        });
        if !keep_existing {
            merged.insert(model.id.clone(), model);
        }
    }

    merged.into_values().collect()
}

/// Built-in catalog plus merged user-defined models.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    catalog: ProviderCatalog,
    custom: Vec<CustomModel>,
    connectivity: Connectivity,
}

impl ModelRegistry {
    pub fn new(catalog: ProviderCatalog, custom: Vec<CustomModel>, connectivity: Connectivity) -> Self {
        Self {
            catalog,
            custom,
            connectivity,
        }
    }

    /// Load the catalog and both custom-model stores.
    ///
    /// Discovery failures are not errors: they mark the registry
    /// unreachable and leave only the locally stored models.
    pub async fn load(service: &dyn AgentService, store: &dyn KeyValueStore) -> RegistryResult<Self> {
        let local: Vec<CustomModel> = read_json(store, CUSTOM_MODELS_KEY)?.unwrap_or_default();

        let (catalog, connectivity) = match service.available_providers().await {
            Ok(catalog) => (catalog, Connectivity::Online),
            Err(e) => {
                tracing::warn!(error = %e, "provider discovery failed");
                (ProviderCatalog::default(), Connectivity::Unreachable(e.to_string()))
            }
        };

        let remote = if connectivity.is_online() {
            match service.list_custom_models().await {
                Ok(models) => models,
                Err(e) => {
                    tracing::warn!(error = %e, "custom model listing failed; using local entries");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let custom = merge_custom_models(local, remote);
        tracing::info!(
            custom_models = custom.len(),
            online = connectivity.is_online(),
            "model registry loaded"
        );

        Ok(Self::new(catalog, custom, connectivity))
    }

    /// Re-run discovery and the merge, replacing this registry.
    pub async fn refresh(&mut self, service: &dyn AgentService, store: &dyn KeyValueStore) -> RegistryResult<()> {
        *self = Self::load(service, store).await?;
        Ok(())
    }

    pub fn catalog(&self) -> &ProviderCatalog {
        &self.catalog
    }

    pub fn custom_models(&self) -> &[CustomModel] {
        &self.custom
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    pub fn find_custom(&self, id: &str) -> Option<&CustomModel> {
        self.custom.iter().find(|m| m.id == id)
    }

    /// Configuration for `model`, with connection details when it is user-defined.
    pub fn model_config(&self, model: &str) -> ModelConfig {
        ModelConfig {
            model: model.to_string(),
            connection: self.find_custom(model).map(|m| m.connection.clone()),
        }
    }

    /// The persisted default model, else the catalog default.
    pub fn selected_default(&self, store: &dyn KeyValueStore) -> RegistryResult<Option<String>> {
        let stored: Option<String> = read_json(store, SELECTED_MODEL_KEY)?;
        Ok(stored.or_else(|| self.catalog.default_model.clone()))
    }

    pub fn select_default(&self, store: &dyn KeyValueStore, model: &str) -> RegistryResult<()> {
        if model.trim().is_empty() {
            return Err(RegistryError::InvalidModel("model identifier is empty".to_string()));
        }
        write_json(store, SELECTED_MODEL_KEY, &model)?;
        Ok(())
    }

    /// Create or replace a user-defined model.
    pub async fn upsert_custom_model(
        &mut self,
        mut model: CustomModel,
        store: &dyn KeyValueStore,
        service: &dyn AgentService,
        sync: SyncMode,
        events: Option<&UnboundedSender<Event>>,
    ) -> RegistryResult<MirrorOutcome> {
        validate_model(&model)?;
        model.updated_at = Some(Utc::now());

        self.custom.retain(|m| m.id != model.id);
        self.custom.push(model.clone());
        self.custom.sort_by(|a, b| a.id.cmp(&b.id));
        write_json(store, CUSTOM_MODELS_KEY, &self.custom)?;

        if !self.should_mirror(sync) {
            return Ok(MirrorOutcome::Skipped);
        }
        let result = service.save_custom_model(&model).await;
        Ok(mirror_outcome(&model.id, result, events))
    }

    /// Delete a user-defined model locally and, when allowed, remotely.
    pub async fn remove_custom_model(
        &mut self,
        id: &str,
        store: &dyn KeyValueStore,
        service: &dyn AgentService,
        sync: SyncMode,
        events: Option<&UnboundedSender<Event>>,
    ) -> RegistryResult<MirrorOutcome> {
        if self.find_custom(id).is_none() {
            return Err(RegistryError::UnknownModel(id.to_string()));
        }

        self.custom.retain(|m| m.id != id);
        write_json(store, CUSTOM_MODELS_KEY, &self.custom)?;

        if !self.should_mirror(sync) {
            return Ok(MirrorOutcome::Skipped);
        }
        let result = service.delete_custom_model(id).await;
        Ok(mirror_outcome(id, result, events))
    }

    fn should_mirror(&self, sync: SyncMode) -> bool {
        sync == SyncMode::Mirror && self.is_online()
    }
}

fn validate_model(model: &CustomModel) -> RegistryResult<()> {
    let missing = if model.id.trim().is_empty() {
        Some("id")
    } else if model.connection.base_url.trim().is_empty() {
        Some("base_url")
    } else if model.connection.model_id.trim().is_empty() {
        Some("model_id")
    } else {
        None
    };

    match missing {
        Some(field) => Err(RegistryError::InvalidModel(format!("{field} is required"))),
        None => Ok(()),
    }
}

fn mirror_outcome(
    model_id: &str,
    result: Result<(), ServiceError>,
    events: Option<&UnboundedSender<Event>>,
) -> MirrorOutcome {
    match result {
        Ok(()) => MirrorOutcome::Mirrored,
        Err(e) => {
            tracing::warn!(model_id, error = %e, "registry mirror failed; keeping local change");
            if let Some(tx) = events {
                let _ = tx.send(Event::RegistryMirrorFailed {
                    model_id: model_id.to_string(),
                    error: e.to_string(),
                });
            }
            MirrorOutcome::Failed(e)
        }
    }
}
