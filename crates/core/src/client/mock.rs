//! Scripted agent service for testing.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use af_protocol::evaluator_models::{EvaluatorStatus, RunSnapshot, StartRunResponse};
use af_protocol::model_models::{CustomModel, ProviderCatalog};
use af_protocol::pipeline_models::Stage;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use super::error::{ServiceError, ServiceResult};
use super::{AgentService, RunControl, StageRequest, StartEvaluatorRequest};

/// A call received by [`MockAgentService`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    Stage(StageRequest),
    AvailableProviders,
    ListCustomModels,
    SaveCustomModel(String),
    DeleteCustomModel(String),
    StartEvaluator(StartEvaluatorRequest),
    Poll { run_id: String, offset: u64 },
    Control { run_id: String, action: RunControl },
    FetchRecord { run_id: String, index: u32 },
}

#[derive(Default)]
struct MockState {
    calls: Vec<RecordedCall>,
    stage_responses: HashMap<Stage, VecDeque<ServiceResult<Value>>>,
    stage_delays: HashMap<Stage, Duration>,
    catalog: Option<ProviderCatalog>,
    remote_models: Vec<CustomModel>,
    mirror_error: Option<ServiceError>,
    control_error: Option<ServiceError>,
    snapshots: VecDeque<ServiceResult<RunSnapshot>>,
    last_snapshot: Option<RunSnapshot>,
    run_counter: u32,
    offline: bool,
}

/// In-memory [`AgentService`] with scripted responses.
///
/// Stages without a queued response succeed with a small JSON payload;
/// validate succeeds with `{"valid": true}`. Polls replay queued
/// snapshots and then repeat the last one.
#[derive(Default)]
pub struct MockAgentService {
    state: Mutex<MockState>,
}

impl MockAgentService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call fails with [`ServiceError::Unreachable`].
    pub fn offline() -> Self {
        let mock = Self::default();
        mock.state.lock().offline = true;
        mock
    }

    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Queue the next response for `stage`.
    pub fn push_stage_response(&self, stage: Stage, response: ServiceResult<Value>) {
        self.state
            .lock()
            .stage_responses
            .entry(stage)
            .or_default()
            .push_back(response);
    }

    /// Make every call to `stage` take `delay` before answering.
    pub fn set_stage_delay(&self, stage: Stage, delay: Duration) {
        self.state.lock().stage_delays.insert(stage, delay);
    }

    pub fn set_catalog(&self, catalog: ProviderCatalog) {
        self.state.lock().catalog = Some(catalog);
    }

    pub fn set_remote_models(&self, models: Vec<CustomModel>) {
        self.state.lock().remote_models = models;
    }

    pub fn remote_models(&self) -> Vec<CustomModel> {
        self.state.lock().remote_models.clone()
    }

    /// Fail custom-model writes with `error`.
    pub fn fail_mirror(&self, error: ServiceError) {
        self.state.lock().mirror_error = Some(error);
    }

    /// Fail stop/suspend/resume with `error`.
    pub fn fail_control(&self, error: ServiceError) {
        self.state.lock().control_error = Some(error);
    }

    pub fn push_snapshot(&self, snapshot: ServiceResult<RunSnapshot>) {
        self.state.lock().snapshots.push_back(snapshot);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().calls.clone()
    }

    /// Stages called so far, in order.
    pub fn stage_calls(&self) -> Vec<Stage> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RecordedCall::Stage(req) => Some(req.stage()),
                _ => None,
            })
            .collect()
    }

    pub fn stage_requests(&self) -> Vec<StageRequest> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RecordedCall::Stage(req) => Some(req),
                _ => None,
            })
            .collect()
    }

    /// Offsets sent with each poll, in order.
    pub fn poll_offsets(&self) -> Vec<u64> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RecordedCall::Poll { offset, .. } => Some(offset),
                _ => None,
            })
            .collect()
    }

    pub fn control_calls(&self) -> Vec<RunControl> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RecordedCall::Control { action, .. } => Some(action),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: RecordedCall) -> ServiceResult<()> {
        let mut state = self.state.lock();
        state.calls.push(call);
        if state.offline {
            return Err(ServiceError::Unreachable("connection refused".to_string()));
        }
        Ok(())
    }
}

fn default_stage_output(stage: Stage) -> Value {
    match stage {
        Stage::Validate => json!({"valid": true, "errors": []}),
        other => json!({ "stage": other.agent_name(), "ok": true }),
    }
}

#[async_trait]
impl AgentService for MockAgentService {
    async fn run_stage(&self, request: &StageRequest) -> ServiceResult<Value> {
        let stage = request.stage();
        self.record(RecordedCall::Stage(request.clone()))?;

        let delay = self.state.lock().stage_delays.get(&stage).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let queued = self
            .state
            .lock()
            .stage_responses
            .get_mut(&stage)
            .and_then(VecDeque::pop_front);
        queued.unwrap_or_else(|| Ok(default_stage_output(stage)))
    }

    async fn available_providers(&self) -> ServiceResult<ProviderCatalog> {
        self.record(RecordedCall::AvailableProviders)?;
        Ok(self.state.lock().catalog.clone().unwrap_or_default())
    }

    async fn list_custom_models(&self) -> ServiceResult<Vec<CustomModel>> {
        self.record(RecordedCall::ListCustomModels)?;
        Ok(self.state.lock().remote_models.clone())
    }

    async fn save_custom_model(&self, model: &CustomModel) -> ServiceResult<()> {
        self.record(RecordedCall::SaveCustomModel(model.id.clone()))?;
        let mut state = self.state.lock();
        if let Some(err) = state.mirror_error.clone() {
            return Err(err);
        }
        state.remote_models.retain(|m| m.id != model.id);
        state.remote_models.push(model.clone());
        Ok(())
    }

    async fn delete_custom_model(&self, id: &str) -> ServiceResult<()> {
        self.record(RecordedCall::DeleteCustomModel(id.to_string()))?;
        let mut state = self.state.lock();
        if let Some(err) = state.mirror_error.clone() {
            return Err(err);
        }
        state.remote_models.retain(|m| m.id != id);
        Ok(())
    }

    async fn start_evaluator(&self, request: &StartEvaluatorRequest) -> ServiceResult<StartRunResponse> {
        self.record(RecordedCall::StartEvaluator(request.clone()))?;
        let mut state = self.state.lock();
        state.run_counter += 1;
        Ok(StartRunResponse {
            run_id: format!("run-{}", state.run_counter),
        })
    }

    async fn poll_evaluator(&self, run_id: &str, offset: u64) -> ServiceResult<RunSnapshot> {
        self.record(RecordedCall::Poll {
            run_id: run_id.to_string(),
            offset,
        })?;

        let mut state = self.state.lock();
        match state.snapshots.pop_front() {
            Some(Ok(snapshot)) => {
                state.last_snapshot = Some(snapshot.clone());
                Ok(snapshot)
            }
            Some(Err(e)) => Err(e),
            None => Ok(state.last_snapshot.clone().unwrap_or(RunSnapshot {
                status: EvaluatorStatus::Running,
                cursor: offset,
                items: Default::default(),
                tokens: None,
                metrics_table: None,
                error: None,
            })),
        }
    }

    async fn control_evaluator(&self, run_id: &str, action: RunControl) -> ServiceResult<()> {
        self.record(RecordedCall::Control {
            run_id: run_id.to_string(),
            action,
        })?;
        match self.state.lock().control_error.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn fetch_record(&self, run_id: &str, index: u32) -> ServiceResult<Value> {
        self.record(RecordedCall::FetchRecord {
            run_id: run_id.to_string(),
            index,
        })?;
        Ok(json!({ "run_id": run_id, "index": index }))
    }
}
