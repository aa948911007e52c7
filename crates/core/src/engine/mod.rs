//! Pipeline execution engine.
//!
//! The PipelineController sends one input text through the parse, reason,
//! generate and validate stages of the agent service, strictly in order and
//! with at most one call in flight. In manual mode it stops at the
//! checkpoint after the reason stage. Every checkpoint and terminal state is
//! snapshotted into the run history.

pub mod error;

pub use error::{PipelineError, PipelineResult};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use af_protocol::ipc::Event;
use af_protocol::model_models::{ModelConfig, ModelSelections};
use af_protocol::pipeline_models::{PipelineRun, ProgressionMode, RunStatus, Stage, StageState};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

use crate::cancel::{CancelSource, CancelToken, CANCELLED_BY_USER};
use crate::client::{
    AgentService, GenerateRequest, ModelParams, ParseRequest, ReasonRequest, StageRequest,
    ValidateRequest,
};
use crate::history::HistoryStore;
use crate::models::{resolve_for, Connectivity, ModelRegistry};
use crate::state::run::{
    begin_stage, cancel_run, complete_run, complete_stage, create_run, fail_run, fail_stage,
    pause_at_checkpoint, start_attempt, start_run,
};

/// Reason recorded on the token of a run discarded by an input edit.
pub const INPUT_EDITED: &str = "input edited";

/// Detail of a failed validation, attached to a regenerate call.
struct Feedback {
    previous_output: Value,
    validation_errors: Vec<Value>,
}

/// Drives pipeline runs against the agent service.
///
/// Owns the current run exclusively. In-flight calls are aborted through
/// [`cancel_handle`](Self::cancel_handle); the controller notices the
/// cancelled token, discards any late response and records the run as
/// cancelled.
pub struct PipelineController {
    service: Arc<dyn AgentService>,
    history: HistoryStore,
    cancel: CancelSource,
    events_tx: UnboundedSender<Event>,
    max_attempts: u32,
    run: Option<PipelineRun>,
    /// Model configuration resolved for each stage of the current run.
    stage_models: BTreeMap<Stage, Option<ModelConfig>>,
}

impl PipelineController {
    /// Create a new PipelineController.
    ///
    /// # Arguments
    ///
    /// * `service` - The agent service that runs the stages
    /// * `history` - Where checkpoint and terminal snapshots are recorded
    /// * `max_attempts` - Upper bound on generate/validate attempts per run
    /// * `events_tx` - Channel for lifecycle events
    pub fn new(
        service: Arc<dyn AgentService>,
        history: HistoryStore,
        max_attempts: u32,
        events_tx: UnboundedSender<Event>,
    ) -> Self {
        Self {
            service,
            history,
            cancel: CancelSource::new(),
            events_tx,
            max_attempts,
            run: None,
            stage_models: BTreeMap::new(),
        }
    }

    /// The current run, live or last settled.
    pub fn current(&self) -> Option<&PipelineRun> {
        self.run.as_ref()
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut HistoryStore {
        &mut self.history
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// A handle that cancels whatever call the controller is awaiting.
    pub fn cancel_handle(&self) -> CancelSource {
        self.cancel.clone()
    }

    /// Start a new run and drive it to the checkpoint (manual) or to the end (auto).
    ///
    /// A cancelled run is returned as `Ok` with status `Cancelled`; a stage
    /// failure is returned as [`PipelineError::Stage`] after the failed run
    /// has been recorded.
    pub async fn run(
        &mut self,
        input_text: &str,
        selections: &ModelSelections,
        temperature: f64,
        progression_mode: ProgressionMode,
        registry: &ModelRegistry,
    ) -> PipelineResult<PipelineRun> {
        if input_text.trim().is_empty() {
            return Err(PipelineError::EmptyInput);
        }
        if self.run.as_ref().is_some_and(PipelineRun::is_live) {
            return Err(PipelineError::RunInProgress);
        }
        if let Connectivity::Unreachable(reason) = registry.connectivity() {
            return Err(PipelineError::Offline(reason.clone()));
        }

        let stage_models: BTreeMap<Stage, Option<ModelConfig>> = Stage::ALL
            .into_iter()
            .map(|stage| (stage, resolve_for(stage.agent_name(), selections, registry)))
            .collect();
        if !matches!(stage_models.get(&Stage::Parse), Some(Some(_))) {
            return Err(PipelineError::NoModel);
        }
        let models = stage_models
            .iter()
            .map(|(stage, config)| (*stage, config.as_ref().map(|c| c.model.clone())))
            .collect();

        let token = self.cancel.issue();
        let mut run = create_run(input_text.to_string(), temperature, progression_mode, models);
        tracing::info!(run_id = %run.id, mode = ?progression_mode, "pipeline run started");
        start_run(&mut run, &self.events_tx);
        self.run = Some(run);
        self.stage_models = stage_models;

        let outcome = self.run_until_checkpoint(&token).await;
        self.settle(outcome)
    }

    /// Resume a run paused at the checkpoint, starting from generate.
    ///
    /// The token issued by [`run`](Self::run) still governs cancellation.
    pub async fn continue_after_checkpoint(&mut self) -> PipelineResult<PipelineRun> {
        let run = self.run.as_mut().ok_or(PipelineError::NoActiveRun)?;
        if run.status != RunStatus::PausedAtCheckpoint {
            return Err(PipelineError::NotAtCheckpoint);
        }
        run.status = RunStatus::Running;
        tracing::info!(run_id = %run.id, "continuing after checkpoint");

        let token = self.cancel.current().unwrap_or_else(|| self.cancel.issue());
        let outcome = self.generate_and_validate(&token, None).await;
        self.settle(outcome)
    }

    /// Run another generate/validate attempt with the validation failure attached.
    ///
    /// Fails fast with [`PipelineError::ContextMissing`] before touching the
    /// run when any part of the prior context is absent.
    pub async fn regenerate(&mut self) -> PipelineResult<PipelineRun> {
        let run = self.run.as_ref().ok_or(PipelineError::NoActiveRun)?;
        if run.input_text.trim().is_empty() {
            return Err(PipelineError::ContextMissing("input text"));
        }
        if run.stage_outputs.parse.is_none() {
            return Err(PipelineError::ContextMissing("parse output"));
        }
        if run.stage_outputs.reason.is_none() {
            return Err(PipelineError::ContextMissing("reasoning output"));
        }
        let previous_output = run
            .stage_outputs
            .generate
            .clone()
            .ok_or(PipelineError::ContextMissing("previously generated output"))?;
        // The verdict must belong to the latest generated output.
        let failure = Some(run)
            .filter(|run| run.stage_states.validate == StageState::Completed)
            .and_then(PipelineRun::validation_failure)
            .ok_or(PipelineError::ContextMissing("validation errors"))?;
        if run.is_live() {
            return Err(PipelineError::RunInProgress);
        }
        if run.attempt_number >= self.max_attempts {
            return Err(PipelineError::AttemptsExhausted {
                max: self.max_attempts,
            });
        }

        let token = self.cancel.issue();
        if let Some(run) = self.run.as_mut() {
            start_attempt(run, &self.events_tx);
            tracing::info!(run_id = %run.id, attempt = run.attempt_number, "regenerating");
        }

        let feedback = Feedback {
            previous_output,
            validation_errors: failure.errors,
        };
        let outcome = self.generate_and_validate(&token, Some(feedback)).await;
        self.settle(outcome)
    }

    /// Cancel the live run with the user-cancellation reason.
    pub fn cancel(&mut self) -> PipelineResult<PipelineRun> {
        self.cancel_with(CANCELLED_BY_USER)
    }

    /// Cancel the live run, marking open stages as cancelled.
    pub fn cancel_with(&mut self, reason: &str) -> PipelineResult<PipelineRun> {
        if !self.run.as_ref().is_some_and(PipelineRun::is_live) {
            return Err(PipelineError::NoActiveRun);
        }
        self.cancel.cancel(reason);
        self.finish_cancelled(reason);
        self.snapshot()
    }

    /// Settle a cancel that arrived while no call was in flight.
    ///
    /// A cancel handle fired during a pause only marks the token. When the
    /// live run's token is cancelled, the run is cancelled and recorded and
    /// its snapshot returned; otherwise nothing changes.
    pub fn apply_pending_cancel(&mut self) -> PipelineResult<Option<PipelineRun>> {
        let Some(token) = self.cancel.current().filter(CancelToken::is_cancelled) else {
            return Ok(None);
        };
        if !self.run.as_ref().is_some_and(PipelineRun::is_live) {
            return Ok(None);
        }
        self.finish_cancelled(&cancel_reason(&token));
        self.snapshot().map(Some)
    }

    /// Discard the current run and return to idle.
    ///
    /// Nothing is recorded; a terminal run already has its history entry.
    pub fn edit_input(&mut self) -> Option<PipelineRun> {
        self.cancel.cancel(INPUT_EDITED);
        self.stage_models.clear();
        let discarded = self.run.take();
        if let Some(run) = &discarded {
            tracing::info!(run_id = %run.id, status = ?run.status, "pipeline run discarded");
        }
        discarded
    }

    async fn run_until_checkpoint(&mut self, token: &CancelToken) -> PipelineResult<()> {
        let run = self.run.as_ref().ok_or(PipelineError::NoActiveRun)?;
        let text = run.input_text.clone();
        let temperature = run.temperature;
        let mode = run.progression_mode;

        let parsed = self
            .call_stage(
                StageRequest::Parse(ParseRequest {
                    text: text.clone(),
                    model: self.params(Stage::Parse),
                    temperature,
                }),
                token,
            )
            .await?;

        self.call_stage(
            StageRequest::Reason(ReasonRequest {
                parsed,
                text,
                model: self.params(Stage::Reason),
                temperature,
            }),
            token,
        )
        .await?;

        if mode == ProgressionMode::Manual {
            if let Some(run) = self.run.as_mut() {
                pause_at_checkpoint(run, &self.events_tx);
                tracing::info!(run_id = %run.id, "paused at checkpoint");
            }
            self.record_history();
            return Ok(());
        }

        self.generate_and_validate(token, None).await
    }

    async fn generate_and_validate(
        &mut self,
        token: &CancelToken,
        feedback: Option<Feedback>,
    ) -> PipelineResult<()> {
        let run = self.run.as_ref().ok_or(PipelineError::NoActiveRun)?;
        let parsed = run
            .stage_outputs
            .parse
            .clone()
            .ok_or(PipelineError::ContextMissing("parse output"))?;
        let reasoning = run
            .stage_outputs
            .reason
            .clone()
            .ok_or(PipelineError::ContextMissing("reasoning output"))?;
        let temperature = run.temperature;
        let (previous_output, validation_errors) = match feedback {
            Some(f) => (Some(f.previous_output), Some(f.validation_errors)),
            None => (None, None),
        };

        let request = GenerateRequest {
            parsed,
            reasoning,
            text: run.input_text.clone(),
            previous_output,
            validation_errors,
            attempt: run.attempt_number,
            model: self.params(Stage::Generate),
            temperature,
        };
        let generated = self
            .call_stage(StageRequest::Generate(request), token)
            .await?;

        self.call_stage(
            StageRequest::Validate(ValidateRequest {
                generated,
                model: self.params(Stage::Validate),
                temperature,
            }),
            token,
        )
        .await?;

        if let Some(run) = self.run.as_mut() {
            complete_run(run, &self.events_tx);
            tracing::info!(run_id = %run.id, attempt = run.attempt_number, "pipeline run completed");
        }
        self.record_history();
        Ok(())
    }

    /// Run one stage call under `token`.
    ///
    /// The token is checked before dispatch, raced against the call, and
    /// checked again once the response arrives; a response to a cancelled
    /// token is dropped without touching the run.
    async fn call_stage(&mut self, request: StageRequest, token: &CancelToken) -> PipelineResult<Value> {
        let stage = request.stage();
        if token.is_cancelled() {
            return Err(PipelineError::Cancelled(cancel_reason(token)));
        }

        let run = self.run.as_mut().ok_or(PipelineError::NoActiveRun)?;
        begin_stage(run, stage, &self.events_tx)?;
        let run_id = run.id;

        let started = Instant::now();
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::debug!(run_id = %run_id, stage = ?stage, "stage call cancelled in flight");
                return Err(PipelineError::Cancelled(cancel_reason(token)));
            }
            result = self.service.run_stage(&request) => result,
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        if token.is_cancelled() {
            tracing::debug!(run_id = %run_id, stage = ?stage, "discarding stale stage response");
            return Err(PipelineError::Cancelled(cancel_reason(token)));
        }

        let run = self.run.as_mut().ok_or(PipelineError::NoActiveRun)?;
        match result {
            Ok(output) => {
                complete_stage(run, stage, output.clone(), duration_ms, &self.events_tx)?;
                Ok(output)
            }
            Err(e) => {
                let message = e.to_string();
                fail_stage(run, stage, &message, duration_ms, &self.events_tx)?;
                Err(PipelineError::Stage { stage, message })
            }
        }
    }

    /// Turn the outcome of a drive into the caller's result.
    fn settle(&mut self, outcome: PipelineResult<()>) -> PipelineResult<PipelineRun> {
        match outcome {
            Ok(()) => self.snapshot(),
            Err(PipelineError::Cancelled(reason)) => {
                self.finish_cancelled(&reason);
                self.snapshot()
            }
            Err(err) => {
                if let Some(run) = self.run.as_mut() {
                    tracing::warn!(run_id = %run.id, error = %err, "pipeline run failed");
                    fail_run(run, err.to_string(), &self.events_tx);
                }
                self.record_history();
                Err(err)
            }
        }
    }

    fn finish_cancelled(&mut self, reason: &str) {
        if let Some(run) = self.run.as_mut() {
            tracing::info!(run_id = %run.id, reason, "pipeline run cancelled");
            cancel_run(run, reason, &self.events_tx);
        }
        self.record_history();
    }

    fn record_history(&mut self) {
        let Some(run) = self.run.as_ref() else {
            return;
        };
        let (item, result) = self.history.record(run);
        if let Err(e) = result {
            tracing::warn!(run_id = %run.id, error = %e, "failed to persist run history");
        }
        let _ = self.events_tx.send(Event::HistoryRecorded {
            item_id: item.id,
            status: item.status(),
        });
    }

    fn snapshot(&self) -> PipelineResult<PipelineRun> {
        self.run.clone().ok_or(PipelineError::NoActiveRun)
    }

    fn params(&self, stage: Stage) -> ModelParams {
        ModelParams::from(self.stage_models.get(&stage).and_then(Option::as_ref))
    }
}

fn cancel_reason(token: &CancelToken) -> String {
    token
        .reason()
        .unwrap_or_else(|| CANCELLED_BY_USER.to_string())
}
