//! Remote agent service client.
//!
//! [`AgentService`] is the one seam between the orchestration core and the
//! HTTP+JSON service that does the actual parsing, reasoning, generation,
//! validation and batch evaluation. [`HttpAgentService`] talks to the real
//! service; [`MockAgentService`] is a scripted double for tests.

pub mod error;
pub mod http;
pub mod mock;

pub use error::{ServiceError, ServiceResult};
pub use http::HttpAgentService;
pub use mock::{MockAgentService, RecordedCall};

use af_protocol::evaluator_models::{RunSnapshot, StartRunResponse};
use af_protocol::model_models::{CustomModel, ModelConfig, ModelConnection, ProviderCatalog};
use af_protocol::pipeline_models::Stage;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

/// Model fields shared by every model-bearing request body.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct ModelParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Connection details when `model` is a user-defined entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_config: Option<ModelConnection>,
}

impl From<Option<&ModelConfig>> for ModelParams {
    fn from(config: Option<&ModelConfig>) -> Self {
        match config {
            Some(c) => Self {
                model: Some(c.model.clone()),
                model_config: c.connection.clone(),
            },
            None => Self::default(),
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ParseRequest {
    pub text: String,
    #[serde(flatten)]
    pub model: ModelParams,
    pub temperature: f64,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ReasonRequest {
    pub parsed: Value,
    pub text: String,
    #[serde(flatten)]
    pub model: ModelParams,
    pub temperature: f64,
}

/// Body of `POST /api/generate`, for first attempts and regeneration.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    pub parsed: Value,
    pub reasoning: Value,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_errors: Option<Vec<Value>>,
    pub attempt: u32,
    #[serde(flatten)]
    pub model: ModelParams,
    pub temperature: f64,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ValidateRequest {
    pub generated: Value,
    #[serde(flatten)]
    pub model: ModelParams,
    pub temperature: f64,
}

/// A request for one of the four pipeline stages.
#[derive(Debug, Clone, PartialEq)]
pub enum StageRequest {
    Parse(ParseRequest),
    Reason(ReasonRequest),
    Generate(GenerateRequest),
    Validate(ValidateRequest),
}

impl StageRequest {
    pub fn stage(&self) -> Stage {
        match self {
            StageRequest::Parse(_) => Stage::Parse,
            StageRequest::Reason(_) => Stage::Reason,
            StageRequest::Generate(_) => Stage::Generate,
            StageRequest::Validate(_) => Stage::Validate,
        }
    }

    /// JSON body sent to the stage endpoint.
    pub fn body(&self) -> Result<Value, serde_json::Error> {
        match self {
            StageRequest::Parse(r) => serde_json::to_value(r),
            StageRequest::Reason(r) => serde_json::to_value(r),
            StageRequest::Generate(r) => serde_json::to_value(r),
            StageRequest::Validate(r) => serde_json::to_value(r),
        }
    }
}

/// Body of `POST /api/storage/evaluators/run`.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct StartEvaluatorRequest {
    pub evaluator: String,
    pub limit: u32,
    #[serde(flatten)]
    pub model: ModelParams,
}

/// Lifecycle actions on a batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunControl {
    Stop,
    Suspend,
    Resume,
}

impl RunControl {
    pub fn path_segment(self) -> &'static str {
        match self {
            RunControl::Stop => "stop",
            RunControl::Suspend => "suspend",
            RunControl::Resume => "resume",
        }
    }
}

/// The remote agent service.
///
/// Implementations normalize every failure into [`ServiceError`].
#[async_trait]
pub trait AgentService: Send + Sync {
    /// Run one pipeline stage (`POST /api/{parse|reason|generate|validate}`).
    async fn run_stage(&self, request: &StageRequest) -> ServiceResult<Value>;

    /// Built-in model catalog and default model (`GET /api/available-providers`).
    async fn available_providers(&self) -> ServiceResult<ProviderCatalog>;

    /// User-defined models known to the service (`GET /api/custom-models`).
    async fn list_custom_models(&self) -> ServiceResult<Vec<CustomModel>>;

    /// Create or replace a user-defined model (`POST /api/custom-models`).
    async fn save_custom_model(&self, model: &CustomModel) -> ServiceResult<()>;

    /// `DELETE /api/custom-models/{id}`.
    async fn delete_custom_model(&self, id: &str) -> ServiceResult<()>;

    /// Start a batch run (`POST /api/storage/evaluators/run`).
    async fn start_evaluator(&self, request: &StartEvaluatorRequest) -> ServiceResult<StartRunResponse>;

    /// Incremental status (`GET /api/storage/evaluators/run/{id}?offset=N`).
    async fn poll_evaluator(&self, run_id: &str, offset: u64) -> ServiceResult<RunSnapshot>;

    /// `POST /api/storage/evaluators/run/{id}/{stop|suspend|resume}`.
    async fn control_evaluator(&self, run_id: &str, action: RunControl) -> ServiceResult<()>;

    /// Full record of one processed item (`GET .../run/{id}/record/{index}`).
    async fn fetch_record(&self, run_id: &str, index: u32) -> ServiceResult<Value>;
}
