//! Batch evaluation run models.
//!
//! The service runs evaluator jobs server-side; the client keeps an
//! [`EvaluatorRunState`] mirror that it advances by polling with a cursor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use ts_rs::TS;

/// Lifecycle of a batch run as seen by the client.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, TS)]
#[serde(rename_all = "lowercase")]
pub enum EvaluatorStatus {
    #[default]
    Idle,
    Running,
    Suspended,
    Cancelled,
    Completed,
    Failed,
}

impl EvaluatorStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EvaluatorStatus::Cancelled | EvaluatorStatus::Completed | EvaluatorStatus::Failed
        )
    }

    /// Running or suspended runs still own server-side work.
    pub fn is_live(self) -> bool {
        matches!(self, EvaluatorStatus::Running | EvaluatorStatus::Suspended)
    }
}

/// Cumulative token usage.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, TS)]
pub struct TokenCounters {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// Progress of a single evaluated item.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, TS)]
pub struct ItemProgress {
    /// Stage name to the service's status string for that stage.
    #[serde(default)]
    pub stage_statuses: BTreeMap<String, String>,
    #[serde(default)]
    pub tokens: TokenCounters,
    /// Whether the full record can be fetched for inspection.
    #[serde(default)]
    pub record_available: bool,
}

/// Accumulated progress of a run.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, TS)]
pub struct RunProgress {
    #[serde(default)]
    pub items: BTreeMap<u32, ItemProgress>,
    #[serde(default)]
    pub tokens: TokenCounters,
}

/// Client-side mirror of one server-side batch run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TS)]
pub struct EvaluatorRunState {
    pub evaluator_kind: String,
    pub run_id: String,
    pub status: EvaluatorStatus,
    /// How much of the run's event log has been consumed. Never decreases.
    pub cursor: u64,
    #[serde(default)]
    pub progress: RunProgress,
    /// Final tabular result; only present once the run completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_table: Option<serde_json::Value>,
    pub item_limit: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Set when the run was suspended by teardown rather than by the user.
    #[serde(default)]
    pub auto_suspended: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EvaluatorRunState {
    pub fn new(evaluator_kind: String, run_id: String, item_limit: u32, model: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            evaluator_kind,
            run_id,
            status: EvaluatorStatus::Running,
            cursor: 0,
            progress: RunProgress::default(),
            metrics_table: None,
            item_limit,
            model,
            auto_suspended: false,
            error: None,
            started_at: now,
            updated_at: now,
        }
    }
}

/// Everything the evaluator dashboard persists under one key.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, TS)]
pub struct EvaluatorDashboard {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_evaluator: Option<String>,
    /// Item limit chosen per evaluator kind.
    #[serde(default)]
    pub item_limits: BTreeMap<String, u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<EvaluatorRunState>,
}

/// Response to `POST /api/storage/evaluators/run`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StartRunResponse {
    #[serde(alias = "id")]
    pub run_id: String,
}

/// Response to an incremental poll.
///
/// `items` only carries entries that changed since the requested offset.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RunSnapshot {
    pub status: EvaluatorStatus,
    #[serde(alias = "offset", alias = "next_offset")]
    pub cursor: u64,
    #[serde(default, alias = "progress")]
    pub items: BTreeMap<u32, ItemProgress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenCounters>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_table: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
