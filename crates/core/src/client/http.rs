//! HTTP implementation of [`AgentService`].

use std::time::{Duration, Instant};

use af_protocol::evaluator_models::{RunSnapshot, StartRunResponse};
use af_protocol::model_models::{CustomModel, ProviderCatalog};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use super::error::{error_message_from_body, from_reqwest, ServiceError, ServiceResult};
use super::{AgentService, RunControl, StageRequest, StartEvaluatorRequest};
use crate::config::models::ServiceConfig;

/// A `reqwest`-backed client for the agent service.
///
/// Created once and shared; the underlying `reqwest::Client` keeps a
/// connection pool. Only discovery and listing calls carry a client-side
/// timeout.
#[derive(Debug, Clone)]
pub struct HttpAgentService {
    http: Client,
    base_url: String,
    discovery_timeout: Duration,
}

/// The custom-model listing has been served both bare and wrapped.
#[derive(Deserialize)]
#[serde(untagged)]
enum CustomModelListing {
    Bare(Vec<CustomModel>),
    Wrapped { models: Vec<CustomModel> },
}

impl HttpAgentService {
    pub fn new(cfg: &ServiceConfig) -> ServiceResult<Self> {
        let http = Client::builder()
            .build()
            .map_err(|e| ServiceError::Unreachable(e.to_string()))?;

        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_owned(),
            discovery_timeout: cfg.discovery_timeout(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn run_url(&self, run_id: &str, suffix: &str) -> String {
        self.url(&format!("/api/storage/evaluators/run/{run_id}{suffix}"))
    }

    /// Send a request and turn non-success statuses into [`ServiceError::Status`].
    async fn send(&self, endpoint: &str, rb: RequestBuilder) -> ServiceResult<Response> {
        let start = Instant::now();
        let result = rb.send().await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let resp = match result {
            Ok(resp) => resp,
            Err(e) => {
                tracing::debug!(endpoint, duration_ms, error = %e, "agent service call failed");
                return Err(from_reqwest(e));
            }
        };

        let status = resp.status();
        tracing::debug!(endpoint, status = status.as_u16(), duration_ms, "agent service call");

        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        Err(ServiceError::Status {
            status: status.as_u16(),
            message: error_message_from_body(&body),
        })
    }

    async fn decode<T: DeserializeOwned>(endpoint: &str, resp: Response) -> ServiceResult<T> {
        let body = resp.text().await.map_err(from_reqwest)?;
        serde_json::from_str(&body).map_err(|e| ServiceError::Decode {
            endpoint: endpoint.to_owned(),
            message: format!("{e}: {body}"),
        })
    }
}

#[async_trait]
impl AgentService for HttpAgentService {
    async fn run_stage(&self, request: &StageRequest) -> ServiceResult<Value> {
        let endpoint = request.stage().endpoint();
        let body = request.body().map_err(|e| ServiceError::Decode {
            endpoint: endpoint.to_owned(),
            message: format!("failed to encode request: {e}"),
        })?;

        let resp = self
            .send(endpoint, self.http.post(self.url(endpoint)).json(&body))
            .await?;
        Self::decode(endpoint, resp).await
    }

    async fn available_providers(&self) -> ServiceResult<ProviderCatalog> {
        let endpoint = "/api/available-providers";
        let rb = self
            .http
            .get(self.url(endpoint))
            .timeout(self.discovery_timeout);
        let resp = self.send(endpoint, rb).await?;
        Self::decode(endpoint, resp).await
    }

    async fn list_custom_models(&self) -> ServiceResult<Vec<CustomModel>> {
        let endpoint = "/api/custom-models";
        let rb = self
            .http
            .get(self.url(endpoint))
            .timeout(self.discovery_timeout);
        let resp = self.send(endpoint, rb).await?;
        let listing: CustomModelListing = Self::decode(endpoint, resp).await?;
        Ok(match listing {
            CustomModelListing::Bare(models) | CustomModelListing::Wrapped { models } => models,
        })
    }

    async fn save_custom_model(&self, model: &CustomModel) -> ServiceResult<()> {
        let endpoint = "/api/custom-models";
        self.send(endpoint, self.http.post(self.url(endpoint)).json(model))
            .await?;
        Ok(())
    }

    async fn delete_custom_model(&self, id: &str) -> ServiceResult<()> {
        let endpoint = format!("/api/custom-models/{id}");
        self.send(&endpoint, self.http.delete(self.url(&endpoint)))
            .await?;
        Ok(())
    }

    async fn start_evaluator(&self, request: &StartEvaluatorRequest) -> ServiceResult<StartRunResponse> {
        let endpoint = "/api/storage/evaluators/run";
        let resp = self
            .send(endpoint, self.http.post(self.url(endpoint)).json(request))
            .await?;
        Self::decode(endpoint, resp).await
    }

    async fn poll_evaluator(&self, run_id: &str, offset: u64) -> ServiceResult<RunSnapshot> {
        let endpoint = "GET /api/storage/evaluators/run/{id}";
        let rb = self
            .http
            .get(self.run_url(run_id, ""))
            .query(&[("offset", offset)]);
        let resp = self.send(endpoint, rb).await?;
        Self::decode(endpoint, resp).await
    }

    async fn control_evaluator(&self, run_id: &str, action: RunControl) -> ServiceResult<()> {
        let suffix = format!("/{}", action.path_segment());
        self.send(&suffix, self.http.post(self.run_url(run_id, &suffix)))
            .await?;
        Ok(())
    }

    async fn fetch_record(&self, run_id: &str, index: u32) -> ServiceResult<Value> {
        let endpoint = "GET /api/storage/evaluators/run/{id}/record/{index}";
        let resp = self
            .send(
                endpoint,
                self.http.get(self.run_url(run_id, &format!("/record/{index}"))),
            )
            .await?;
        Self::decode(endpoint, resp).await
    }
}
