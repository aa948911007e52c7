//! Custom assertion helpers over lifecycle events.

use af_protocol::evaluator_models::EvaluatorStatus;
use af_protocol::ipc::Event;
use af_protocol::pipeline_models::{RunStatus, Stage};
use tokio::sync::mpsc::UnboundedReceiver;

/// Drain every event currently queued on `rx`.
#[allow(dead_code)]
pub fn drain_events(rx: &mut UnboundedReceiver<Event>) -> Vec<Event> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

/// Stages with a StageStarted event, in order.
#[allow(dead_code)]
pub fn started_stages(events: &[Event]) -> Vec<Stage> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::StageStarted { stage, .. } => Some(*stage),
            _ => None,
        })
        .collect()
}

/// Check that the events contain a HistoryRecorded event with `status`.
#[allow(dead_code)]
pub fn has_history_recorded(events: &[Event], status: RunStatus) -> bool {
    events
        .iter()
        .any(|e| matches!(e, Event::HistoryRecorded { status: s, .. } if *s == status))
}

/// Check that no event reports a failure.
#[allow(dead_code)]
pub fn assert_no_failures(events: &[Event]) {
    let failure = events
        .iter()
        .find(|e| matches!(e, Event::StageFailed { .. } | Event::RunFailed { .. }));
    assert!(failure.is_none(), "unexpected failure event: {failure:?}");
}

/// Status changes in order, with their notify flags.
#[allow(dead_code)]
pub fn status_changes(events: &[Event]) -> Vec<(EvaluatorStatus, bool)> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::EvaluatorStatusChanged { status, notify, .. } => Some((*status, *notify)),
            _ => None,
        })
        .collect()
}
