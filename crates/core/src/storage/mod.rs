//! Durable local key-value storage.
//!
//! Client state is kept as whole JSON documents under a handful of fixed
//! keys. Writes replace the full value; there is no field-level merge and
//! no transaction across keys.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Identifier of the default model picked by the user.
pub const SELECTED_MODEL_KEY: &str = "selected_model";
/// Locally stored user-defined models.
pub const CUSTOM_MODELS_KEY: &str = "custom_models";
/// Evaluator dashboard preferences and the last-known batch run.
pub const EVALUATOR_DASHBOARD_KEY: &str = "evaluator_dashboard";
/// Bounded pipeline run history.
pub const PIPELINE_HISTORY_KEY: &str = "pipeline_history";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to access storage at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to encode value for key {key}: {source}")]
    Encode {
        key: String,
        source: serde_json::Error,
    },
}

pub type StorageResult<T> = Result<T, StorageError>;

/// A string-valued key-value store with last-writer-wins semantics.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> StorageResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;
    fn remove(&self, key: &str) -> StorageResult<()>;
}

/// Read and decode the JSON document stored under `key`.
///
/// A value that no longer decodes is logged and treated as absent so a
/// schema change never bricks startup.
pub fn read_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> StorageResult<Option<T>> {
    let Some(raw) = store.get(key)? else {
        return Ok(None);
    };

    match serde_json::from_str(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            tracing::warn!(key, error = %e, "discarding undecodable persisted value");
            Ok(None)
        }
    }
}

/// Encode `value` as JSON and replace whatever is stored under `key`.
pub fn write_json<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) -> StorageResult<()> {
    let raw = serde_json::to_string(value).map_err(|source| StorageError::Encode {
        key: key.to_string(),
        source,
    })?;
    store.set(key, &raw)
}
