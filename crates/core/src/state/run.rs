//! Pipeline run state machine implementation.
//!
//! This module provides functions for managing the lifecycle of a
//! PipelineRun, including stage transitions and event emission. Stage
//! states only move forward; the one exception is [`start_attempt`], which
//! opens a fresh generate/validate cycle for regeneration.

use std::collections::BTreeMap;

use af_protocol::ipc::Event;
use af_protocol::pipeline_models::{
    PipelineRun, ProgressionMode, RunStatus, Stage, StageState, ValidationSummary,
};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::engine::error::{PipelineError, PipelineResult};

/// Create a new PipelineRun with Running status on its first attempt.
///
/// # Arguments
///
/// * `input_text` - The text sent to the parse stage
/// * `temperature` - Sampling temperature used for every stage call
/// * `progression_mode` - Whether to pause at the checkpoint
/// * `models` - Resolved model identifier per stage (`None` for the service default)
pub fn create_run(
    input_text: String,
    temperature: f64,
    progression_mode: ProgressionMode,
    models: BTreeMap<Stage, Option<String>>,
) -> PipelineRun {
    PipelineRun {
        id: Uuid::new_v4(),
        input_text,
        temperature,
        progression_mode,
        models,
        stage_outputs: Default::default(),
        stage_states: Default::default(),
        attempt_number: 1,
        metrics: BTreeMap::new(),
        status: RunStatus::Running,
        error: None,
    }
}

/// Announce the run (or its current attempt) and emit RunStarted.
pub fn start_run(run: &mut PipelineRun, events_tx: &UnboundedSender<Event>) {
    run.status = RunStatus::Running;
    let _ = events_tx.send(Event::RunStarted {
        run_id: run.id,
        attempt: run.attempt_number,
    });
}

fn transition(run: &mut PipelineRun, stage: Stage, to: StageState) -> PipelineResult<()> {
    let slot = run.stage_states.get_mut(stage);
    if !slot.can_transition_to(to) {
        return Err(PipelineError::InvalidTransition {
            stage,
            from: *slot,
            to,
        });
    }
    *slot = to;
    Ok(())
}

/// Move `stage` to Processing and emit StageStarted.
pub fn begin_stage(
    run: &mut PipelineRun,
    stage: Stage,
    events_tx: &UnboundedSender<Event>,
) -> PipelineResult<()> {
    transition(run, stage, StageState::Processing)?;
    let _ = events_tx.send(Event::StageStarted {
        run_id: run.id,
        stage,
    });
    Ok(())
}

/// Store the stage output, record its duration and emit StageCompleted.
pub fn complete_stage(
    run: &mut PipelineRun,
    stage: Stage,
    output: Value,
    duration_ms: u64,
    events_tx: &UnboundedSender<Event>,
) -> PipelineResult<()> {
    transition(run, stage, StageState::Completed)?;
    run.stage_outputs.set(stage, output);
    run.metrics.insert(stage, duration_ms);
    let _ = events_tx.send(Event::StageCompleted {
        run_id: run.id,
        stage,
        duration_ms,
    });
    Ok(())
}

/// Mark `stage` as failed and emit StageFailed.
///
/// The run itself is failed separately with [`fail_run`].
pub fn fail_stage(
    run: &mut PipelineRun,
    stage: Stage,
    error: &str,
    duration_ms: u64,
    events_tx: &UnboundedSender<Event>,
) -> PipelineResult<()> {
    transition(run, stage, StageState::Error)?;
    run.metrics.insert(stage, duration_ms);
    let _ = events_tx.send(Event::StageFailed {
        run_id: run.id,
        stage,
        error: error.to_string(),
    });
    Ok(())
}

/// Cancel every stage that is processing or has not started yet.
///
/// Completed and failed stages keep their state. Returns the stages that
/// were cancelled, in pipeline order.
pub fn cancel_open_stages(run: &mut PipelineRun, events_tx: &UnboundedSender<Event>) -> Vec<Stage> {
    let mut cancelled = Vec::new();
    for stage in Stage::ALL {
        let state = run.stage_states.get(stage);
        if state.can_transition_to(StageState::Cancelled) {
            *run.stage_states.get_mut(stage) = StageState::Cancelled;
            if state == StageState::Processing {
                let _ = events_tx.send(Event::StageCancelled {
                    run_id: run.id,
                    stage,
                });
            }
            cancelled.push(stage);
        }
    }
    cancelled
}

/// Pause after the reason stage and emit CheckpointReached.
pub fn pause_at_checkpoint(run: &mut PipelineRun, events_tx: &UnboundedSender<Event>) {
    run.status = RunStatus::PausedAtCheckpoint;
    let _ = events_tx.send(Event::CheckpointReached { run_id: run.id });
}

/// Open the next generate/validate cycle.
///
/// Increments the attempt number and returns both stages to Idle. The
/// previous attempt's outputs and timings are dropped so a snapshot never
/// pairs a new artifact with an old verdict.
pub fn start_attempt(run: &mut PipelineRun, events_tx: &UnboundedSender<Event>) {
    run.attempt_number += 1;
    for stage in [Stage::Generate, Stage::Validate] {
        *run.stage_states.get_mut(stage) = StageState::Idle;
        run.stage_outputs.clear(stage);
        run.metrics.remove(&stage);
    }
    run.error = None;
    start_run(run, events_tx);
}

/// Mark the run as completed and emit RunCompleted with the validation verdict.
pub fn complete_run(run: &mut PipelineRun, events_tx: &UnboundedSender<Event>) {
    run.status = RunStatus::Completed;
    let valid = run
        .stage_outputs
        .validate
        .as_ref()
        .map(ValidationSummary::from_output)
        .and_then(|summary| summary.valid);
    let _ = events_tx.send(Event::RunCompleted {
        run_id: run.id,
        attempt: run.attempt_number,
        valid,
    });
}

/// Mark the run as failed and emit RunFailed.
///
/// # Arguments
///
/// * `run` - The run to fail
/// * `error` - Human-readable failure detail, kept on the run
/// * `events_tx` - Channel to send the failure event
pub fn fail_run(run: &mut PipelineRun, error: String, events_tx: &UnboundedSender<Event>) {
    run.status = RunStatus::Failed;
    run.error = Some(error.clone());
    let _ = events_tx.send(Event::RunFailed {
        run_id: run.id,
        error,
    });
}

/// Cancel open stages, mark the run as cancelled and emit RunCancelled.
pub fn cancel_run(run: &mut PipelineRun, reason: &str, events_tx: &UnboundedSender<Event>) {
    cancel_open_stages(run, events_tx);
    run.status = RunStatus::Cancelled;
    run.error = Some(reason.to_string());
    let _ = events_tx.send(Event::RunCancelled {
        run_id: run.id,
        reason: reason.to_string(),
    });
}
