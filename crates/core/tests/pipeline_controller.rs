//! Integration tests for PipelineController.
//!
//! These tests verify that the controller:
//! - Pauses at the checkpoint in manual mode and runs through in auto mode
//! - Marks in-flight and unstarted stages as cancelled on cancel
//! - Bounds and feeds regeneration
//! - Records history through a file-backed store

mod common;

use std::sync::Arc;
use std::time::Duration;

use af_core::cancel::CANCELLED_BY_USER;
use af_core::client::{MockAgentService, ServiceError, StageRequest};
use af_core::engine::PipelineError;
use af_core::history::HistoryStore;
use af_core::storage::{FileStore, KeyValueStore};
use af_protocol::ipc::Event;
use af_protocol::model_models::{ModelSelections, SelectionMode};
use af_protocol::pipeline_models::{ProgressionMode, RunStatus, Stage, StageState};
use common::*;
use serde_json::json;

#[tokio::test]
async fn test_manual_run_stops_at_checkpoint() {
    let service = Arc::new(MockAgentService::new());
    let (mut controller, mut rx) = create_controller(&service, memory_store());

    let run = controller
        .run(
            "Users can read the document",
            &all_model_a(),
            0.3,
            ProgressionMode::Manual,
            &online_registry(vec![]),
        )
        .await
        .unwrap();

    assert_eq!(run.stage_states.parse, StageState::Completed);
    assert_eq!(run.stage_states.reason, StageState::Completed);
    assert_eq!(run.stage_states.generate, StageState::Idle);
    assert_eq!(run.stage_states.validate, StageState::Idle);
    assert_eq!(run.status, RunStatus::PausedAtCheckpoint);

    // No generate or validate call went out.
    assert_eq!(service.stage_calls(), vec![Stage::Parse, Stage::Reason]);

    let events = drain_events(&mut rx);
    assert_eq!(started_stages(&events), vec![Stage::Parse, Stage::Reason]);
    assert!(events.iter().any(|e| matches!(e, Event::CheckpointReached { .. })));
    assert!(has_history_recorded(&events, RunStatus::PausedAtCheckpoint));
}

#[tokio::test]
async fn test_auto_run_issues_all_four_calls() {
    let service = Arc::new(MockAgentService::new());
    let (mut controller, mut rx) = create_controller(&service, memory_store());

    let run = controller
        .run(
            "Users can read the document",
            &all_model_a(),
            0.3,
            ProgressionMode::Auto,
            &online_registry(vec![]),
        )
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(service.stage_calls(), Stage::ALL.to_vec());
    for stage in Stage::ALL {
        assert_eq!(run.stage_states.get(stage), StageState::Completed);
        assert!(run.metrics.contains_key(&stage));
        assert!(run.stage_outputs.get(stage).is_some());
    }

    let events = drain_events(&mut rx);
    assert_no_failures(&events);
    assert!(!events.iter().any(|e| matches!(e, Event::CheckpointReached { .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::RunCompleted { valid: Some(true), .. })));
}

#[tokio::test]
async fn test_continue_after_checkpoint_reuses_outputs() {
    let service = Arc::new(MockAgentService::new());
    service.push_stage_response(Stage::Parse, Ok(json!({"actions": ["read"]})));
    service.push_stage_response(Stage::Reason, Ok(json!({"policy": "allow"})));
    let (mut controller, _rx) = create_controller(&service, memory_store());

    controller
        .run("Users can read", &all_model_a(), 0.3, ProgressionMode::Manual, &online_registry(vec![]))
        .await
        .unwrap();
    let run = controller.continue_after_checkpoint().await.unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(service.stage_calls(), Stage::ALL.to_vec());

    let requests = service.stage_requests();
    let StageRequest::Generate(generate) = &requests[2] else {
        panic!("third call should be generate");
    };
    assert_eq!(generate.parsed, json!({"actions": ["read"]}));
    assert_eq!(generate.reasoning, json!({"policy": "allow"}));
    assert_eq!(generate.attempt, 1);
    assert!(generate.previous_output.is_none());

    let statuses: Vec<_> = controller.history().items().iter().map(|i| i.status()).collect();
    assert_eq!(statuses, vec![RunStatus::Completed, RunStatus::PausedAtCheckpoint]);
}

#[tokio::test]
async fn test_cancel_while_processing_records_cancelled() {
    let service = Arc::new(MockAgentService::new());
    service.set_stage_delay(Stage::Reason, Duration::from_secs(30));
    let (mut controller, mut rx) = create_controller(&service, memory_store());
    let cancel = controller.cancel_handle();

    let task = tokio::spawn(async move {
        let result = controller
            .run("Users can read", &all_model_a(), 0.3, ProgressionMode::Auto, &online_registry(vec![]))
            .await;
        (controller, result)
    });

    // Wait until the reason call is in flight.
    loop {
        if service.stage_calls().contains(&Stage::Reason) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(cancel.cancel(CANCELLED_BY_USER));

    let (controller, result) = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("run should stop promptly")
        .unwrap();
    let run = result.unwrap();

    assert_eq!(run.status, RunStatus::Cancelled);
    assert_eq!(run.stage_states.parse, StageState::Completed);
    assert_eq!(run.stage_states.reason, StageState::Cancelled);
    assert_eq!(run.stage_states.generate, StageState::Cancelled);
    assert_eq!(run.stage_states.validate, StageState::Cancelled);
    assert!(run.stage_outputs.reason.is_none());
    assert_eq!(controller.history().items()[0].status(), RunStatus::Cancelled);

    let events = drain_events(&mut rx);
    assert_no_failures(&events);
    assert!(events.iter().any(|e| matches!(
        e,
        Event::StageCancelled { stage: Stage::Reason, .. }
    )));
    assert!(has_history_recorded(&events, RunStatus::Cancelled));
    assert!(!has_history_recorded(&events, RunStatus::Failed));
}

#[tokio::test]
async fn test_cancel_during_checkpoint_pause_is_settled() {
    let service = Arc::new(MockAgentService::new());
    let (mut controller, mut rx) = create_controller(&service, memory_store());
    controller
        .run("text", &all_model_a(), 0.3, ProgressionMode::Manual, &online_registry(vec![]))
        .await
        .unwrap();
    assert!(controller.apply_pending_cancel().unwrap().is_none());

    // Nothing is awaiting a call, so the cancel only marks the token.
    assert!(controller.cancel_handle().cancel(CANCELLED_BY_USER));
    assert_eq!(controller.current().unwrap().status, RunStatus::PausedAtCheckpoint);

    let run = controller.apply_pending_cancel().unwrap().unwrap();

    assert_eq!(run.status, RunStatus::Cancelled);
    assert_eq!(run.stage_states.reason, StageState::Completed);
    assert_eq!(run.stage_states.generate, StageState::Cancelled);
    assert_eq!(controller.history().items()[0].status(), RunStatus::Cancelled);
    assert!(has_history_recorded(&drain_events(&mut rx), RunStatus::Cancelled));

    // Already settled.
    assert!(controller.apply_pending_cancel().unwrap().is_none());
    assert_eq!(service.stage_calls(), vec![Stage::Parse, Stage::Reason]);
}

#[tokio::test]
async fn test_new_run_allowed_after_terminal_run() {
    let service = Arc::new(MockAgentService::new());
    let (mut controller, _rx) = create_controller(&service, memory_store());
    let registry = online_registry(vec![]);

    let first = controller
        .run("first", &all_model_a(), 0.3, ProgressionMode::Auto, &registry)
        .await
        .unwrap();
    let second = controller
        .run("second", &all_model_a(), 0.3, ProgressionMode::Auto, &registry)
        .await
        .unwrap();

    assert_ne!(first.id, second.id);
    assert_eq!(second.attempt_number, 1);
    assert_eq!(controller.history().len(), 2);
}

#[tokio::test]
async fn test_regenerate_without_validation_failure_is_rejected() {
    let service = Arc::new(MockAgentService::new());
    let (mut controller, _rx) = create_controller(&service, memory_store());

    controller
        .run("text", &all_model_a(), 0.3, ProgressionMode::Manual, &online_registry(vec![]))
        .await
        .unwrap();

    // Paused at the checkpoint: nothing generated yet.
    let err = controller.regenerate().await.unwrap_err();
    assert!(matches!(err, PipelineError::ContextMissing(_)));
    assert_eq!(controller.current().unwrap().attempt_number, 1);
    assert_eq!(service.stage_calls().len(), 2);
}

#[tokio::test]
async fn test_attempt_number_strictly_increases() {
    let service = Arc::new(MockAgentService::new());
    for _ in 0..2 {
        service.push_stage_response(
            Stage::Validate,
            Ok(json!({"conforms": false, "violations": [{"path": "ex:owner"}]})),
        );
    }
    let (mut controller, mut rx) = create_controller(&service, memory_store());

    let mut attempts = vec![controller
        .run("text", &all_model_a(), 0.3, ProgressionMode::Auto, &online_registry(vec![]))
        .await
        .unwrap()
        .attempt_number];
    attempts.push(controller.regenerate().await.unwrap().attempt_number);
    attempts.push(controller.regenerate().await.unwrap().attempt_number);

    assert_eq!(attempts, vec![1, 2, 3]);
    assert!(drain_events(&mut rx)
        .iter()
        .any(|e| matches!(e, Event::RunStarted { attempt: 3, .. })));
}

#[tokio::test]
async fn test_failed_attempt_drops_previous_verdict() {
    let service = Arc::new(MockAgentService::new());
    service.push_stage_response(
        Stage::Validate,
        Ok(json!({"conforms": false, "violations": [{"path": "ex:owner"}]})),
    );
    service.push_stage_response(
        Stage::Validate,
        Err(ServiceError::Unreachable("connection reset".to_string())),
    );
    let (mut controller, _rx) = create_controller(&service, memory_store());

    controller
        .run("text", &all_model_a(), 0.3, ProgressionMode::Auto, &online_registry(vec![]))
        .await
        .unwrap();

    let err = controller.regenerate().await.unwrap_err();
    assert!(matches!(err, PipelineError::Stage { stage: Stage::Validate, .. }));

    // The new artifact is never paired with the first attempt's verdict.
    let run = controller.current().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.attempt_number, 2);
    assert!(run.stage_outputs.generate.is_some());
    assert!(run.stage_outputs.validate.is_none());
    assert!(run.validation_failure().is_none());

    let calls = service.stage_calls().len();
    let err = controller.regenerate().await.unwrap_err();
    assert!(matches!(err, PipelineError::ContextMissing(_)));
    assert_eq!(controller.current().unwrap().attempt_number, 2);
    assert_eq!(service.stage_calls().len(), calls);
}

#[tokio::test]
async fn test_per_agent_selection_attaches_custom_connection() {
    let service = Arc::new(MockAgentService::new());
    let (mut controller, _rx) = create_controller(&service, memory_store());
    let registry = online_registry(vec![sample_custom_model("local-llama")]);
    let selections = ModelSelections {
        mode: SelectionMode::PerAgent,
        default_model: Some("model-A".to_string()),
        per_agent: [("reasoner".to_string(), "local-llama".to_string())]
            .into_iter()
            .collect(),
    };

    let run = controller
        .run("text", &selections, 0.3, ProgressionMode::Manual, &registry)
        .await
        .unwrap();

    assert_eq!(run.models[&Stage::Parse].as_deref(), Some("model-A"));
    assert_eq!(run.models[&Stage::Reason].as_deref(), Some("local-llama"));

    let requests = service.stage_requests();
    let StageRequest::Parse(parse) = &requests[0] else {
        panic!("first call should be parse");
    };
    assert!(parse.model.model_config.is_none());
    let StageRequest::Reason(reason) = &requests[1] else {
        panic!("second call should be reason");
    };
    assert_eq!(
        reason.model.model_config.as_ref().map(|c| c.model_id.as_str()),
        Some("llama3.1:8b")
    );
}

#[tokio::test]
async fn test_transport_failure_is_a_stage_error() {
    let service = Arc::new(MockAgentService::new());
    service.push_stage_response(
        Stage::Parse,
        Err(ServiceError::Unreachable("connection refused".to_string())),
    );
    let (mut controller, mut rx) = create_controller(&service, memory_store());

    let err = controller
        .run("text", &all_model_a(), 0.3, ProgressionMode::Manual, &online_registry(vec![]))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Stage { stage: Stage::Parse, .. }));
    let events = drain_events(&mut rx);
    assert!(has_history_recorded(&events, RunStatus::Failed));
    assert_eq!(controller.current().unwrap().stage_states.reason, StageState::Idle);
}

#[tokio::test]
async fn test_history_persists_in_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(dir.path()).unwrap());
    let service = Arc::new(MockAgentService::new());

    {
        let (mut controller, _rx) = create_controller(&service, Arc::clone(&store));
        controller
            .run("persist me", &all_model_a(), 0.3, ProgressionMode::Auto, &online_registry(vec![]))
            .await
            .unwrap();
    }

    let history = HistoryStore::open(store, 10).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history.items()[0].run.input_text, "persist me");
    assert_eq!(history.items()[0].status(), RunStatus::Completed);
}
