//! Test fixtures for creating controllers, pollers and sample data.

use std::sync::Arc;
use std::time::Duration;

use af_core::client::{AgentService, MockAgentService};
use af_core::engine::PipelineController;
use af_core::evaluator::EvaluatorPoller;
use af_core::history::HistoryStore;
use af_core::models::{Connectivity, ModelRegistry};
use af_core::storage::{KeyValueStore, MemoryStore};
use af_protocol::evaluator_models::{EvaluatorStatus, ItemProgress, RunSnapshot, TokenCounters};
use af_protocol::ipc::Event;
use af_protocol::model_models::{
    CustomModel, ModelConnection, ModelSelections, ProviderCatalog, ProviderInfo, ProviderKind,
};
use tokio::sync::mpsc::{self, UnboundedReceiver};

/// Polling cadence used by pollers built here.
#[allow(dead_code)]
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// A catalog with one provider and `model-A` as its default.
#[allow(dead_code)]
pub fn sample_catalog() -> ProviderCatalog {
    ProviderCatalog {
        providers: vec![ProviderInfo {
            name: "openai".to_string(),
            models: vec!["model-A".to_string(), "model-B".to_string()],
            available: true,
        }],
        default_model: Some("model-A".to_string()),
    }
}

/// A user-defined model served by a local OpenAI-compatible endpoint.
#[allow(dead_code)]
pub fn sample_custom_model(id: &str) -> CustomModel {
    CustomModel {
        id: id.to_string(),
        display_name: format!("Local {id}"),
        connection: ModelConnection {
            provider_type: ProviderKind::OpenaiCompatible,
            base_url: "http://localhost:11434/v1".to_string(),
            model_id: "llama3.1:8b".to_string(),
            api_key: None,
            context_length: Some(8192),
            temperature_default: Some(0.2),
        },
        updated_at: None,
    }
}

/// An online registry over [`sample_catalog`] and `custom`.
#[allow(dead_code)]
pub fn online_registry(custom: Vec<CustomModel>) -> ModelRegistry {
    ModelRegistry::new(sample_catalog(), custom, Connectivity::Online)
}

/// `model-A` for every agent.
#[allow(dead_code)]
pub fn all_model_a() -> ModelSelections {
    ModelSelections::single("model-A")
}

#[allow(dead_code)]
pub fn memory_store() -> Arc<dyn KeyValueStore> {
    Arc::new(MemoryStore::new())
}

/// A controller over `service` with a 10-item history and 3 attempts.
#[allow(dead_code)]
pub fn create_controller(
    service: &Arc<MockAgentService>,
    store: Arc<dyn KeyValueStore>,
) -> (PipelineController, UnboundedReceiver<Event>) {
    let history = HistoryStore::open(store, 10).expect("history should open");
    let (tx, rx) = mpsc::unbounded_channel();
    let service: Arc<dyn AgentService> = service.clone();
    (PipelineController::new(service, history, 3, tx), rx)
}

/// A poller over `service` and `store` polling every [`POLL_INTERVAL`].
#[allow(dead_code)]
pub async fn create_poller(
    service: &Arc<MockAgentService>,
    store: Arc<dyn KeyValueStore>,
) -> (EvaluatorPoller, UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let service: Arc<dyn AgentService> = service.clone();
    let poller = EvaluatorPoller::open(service, store, POLL_INTERVAL, tx)
        .await
        .expect("poller should open");
    (poller, rx)
}

/// Like [`create_poller`], but opened without rehydrating the run.
#[allow(dead_code)]
pub fn create_passive_poller(
    service: &Arc<MockAgentService>,
    store: Arc<dyn KeyValueStore>,
) -> (EvaluatorPoller, UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let service: Arc<dyn AgentService> = service.clone();
    let poller = EvaluatorPoller::open_passive(service, store, POLL_INTERVAL, tx)
        .expect("poller should open");
    (poller, rx)
}

/// A running snapshot at `cursor` reporting progress for `items`.
#[allow(dead_code)]
pub fn running_snapshot(cursor: u64, items: &[u32]) -> RunSnapshot {
    snapshot(EvaluatorStatus::Running, cursor, items)
}

#[allow(dead_code)]
pub fn snapshot(status: EvaluatorStatus, cursor: u64, items: &[u32]) -> RunSnapshot {
    RunSnapshot {
        status,
        cursor,
        items: items
            .iter()
            .map(|index| {
                (
                    *index,
                    ItemProgress {
                        stage_statuses: [("generate".to_string(), "completed".to_string())]
                            .into_iter()
                            .collect(),
                        tokens: TokenCounters {
                            prompt_tokens: 100,
                            completion_tokens: 50,
                            total_tokens: 150,
                        },
                        record_available: true,
                    },
                )
            })
            .collect(),
        tokens: Some(TokenCounters {
            prompt_tokens: 100 * items.len() as u64,
            completion_tokens: 50 * items.len() as u64,
            total_tokens: 150 * items.len() as u64,
        }),
        metrics_table: None,
        error: None,
    }
}
