//! Lifecycle events emitted by the orchestration core.
//!
//! The core never talks to a UI directly. It sends `Event`s over a channel
//! and whatever presentation layer is attached (the CLI, a browser bridge)
//! subscribes and renders them.
//!
//! Uses tagged enum serialization for TypeScript compatibility:
//! ```json
//! {
//!   "type": "stageCompleted",
//!   "payload": {
//!     "run_id": "uuid-here",
//!     "stage": "parse",
//!     "duration_ms": 812
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::evaluator_models::EvaluatorStatus;
use crate::pipeline_models::{RunStatus, Stage};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum Event {
    /// A new pipeline run (or a new attempt of one) began.
    RunStarted { run_id: Uuid, attempt: u32 },

    StageStarted { run_id: Uuid, stage: Stage },

    StageCompleted {
        run_id: Uuid,
        stage: Stage,
        duration_ms: u64,
    },

    /// A stage call was rejected by the service or the transport.
    StageFailed {
        run_id: Uuid,
        stage: Stage,
        error: String,
    },

    StageCancelled { run_id: Uuid, stage: Stage },

    /// Manual mode stopped after the reason stage.
    CheckpointReached { run_id: Uuid },

    RunCompleted {
        run_id: Uuid,
        attempt: u32,
        /// Verdict read from the validate output, when it reports one.
        valid: Option<bool>,
    },

    RunFailed { run_id: Uuid, error: String },

    RunCancelled { run_id: Uuid, reason: String },

    /// A history snapshot was appended.
    HistoryRecorded { item_id: Uuid, status: RunStatus },

    EvaluatorStarted { run_id: String, evaluator_kind: String },

    /// A poll response was applied.
    PollTick {
        run_id: String,
        cursor: u64,
        items_seen: usize,
    },

    /// The batch run changed status.
    ///
    /// `notify` marks the one-shot notifications a user should see; silent
    /// transitions such as a teardown suspend carry `false`.
    EvaluatorStatusChanged {
        run_id: String,
        status: EvaluatorStatus,
        notify: bool,
    },

    /// Polling picked up a run restored from local storage.
    EvaluatorResumed { run_id: String },

    /// A response broke a protocol invariant and was discarded.
    ProtocolViolation { detail: String },

    /// A local registry change could not be mirrored to the service.
    RegistryMirrorFailed { model_id: String, error: String },
}
