//! Shared command context.

use std::path::Path;
use std::sync::Arc;

use af_core::client::{AgentService, HttpAgentService};
use af_core::config::loader::{load_config, CONFIG_DIR};
use af_core::config::models::AppConfig;
use af_core::history::HistoryStore;
use af_core::models::ModelRegistry;
use af_core::storage::{FileStore, KeyValueStore};

/// Configuration, local storage and the service client for one invocation.
pub struct App {
    pub config: AppConfig,
    pub store: Arc<dyn KeyValueStore>,
    pub service: Arc<dyn AgentService>,
}

impl App {
    /// Load `.agentflow/config.toml` under `root` and open the state directory.
    ///
    /// Nothing here touches the network; the first request is made by the
    /// command that needs it.
    pub async fn load(root: &Path, base_url: Option<String>) -> color_eyre::Result<Self> {
        let mut config = load_config(root).await?;
        if let Some(url) = base_url {
            config.service.base_url = url;
        }

        let data_dir = config
            .storage
            .data_dir
            .clone()
            .unwrap_or_else(|| root.join(CONFIG_DIR).join("state"));
        let store = FileStore::open(&data_dir)?;
        tracing::debug!(data_dir = %data_dir.display(), base_url = %config.service.base_url, "client state opened");

        let service = HttpAgentService::new(&config.service)?;

        Ok(Self {
            config,
            store: Arc::new(store),
            service: Arc::new(service),
        })
    }

    pub fn history(&self) -> color_eyre::Result<HistoryStore> {
        Ok(HistoryStore::open(
            Arc::clone(&self.store),
            self.config.pipeline.history_capacity,
        )?)
    }

    pub async fn registry(&self) -> color_eyre::Result<ModelRegistry> {
        Ok(ModelRegistry::load(self.service.as_ref(), self.store.as_ref()).await?)
    }
}
