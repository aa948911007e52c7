//! Pipeline run models.
//!
//! A pipeline run sends one input text through four remote stages:
//! parse, reason, generate and validate. The stage payloads are opaque to
//! the client and are carried as raw JSON values.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use ts_rs::TS;
use uuid::Uuid;

/// One of the four remote stages, in execution order.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, TS)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Parse,
    Reason,
    Generate,
    Validate,
}

impl Stage {
    /// All stages in the order they run.
    pub const ALL: [Stage; 4] = [Stage::Parse, Stage::Reason, Stage::Generate, Stage::Validate];

    /// Logical agent name used for per-agent model selection.
    pub fn agent_name(self) -> &'static str {
        match self {
            Stage::Parse => "parser",
            Stage::Reason => "reasoner",
            Stage::Generate => "generator",
            Stage::Validate => "validator",
        }
    }

    /// Service endpoint for this stage.
    pub fn endpoint(self) -> &'static str {
        match self {
            Stage::Parse => "/api/parse",
            Stage::Reason => "/api/reason",
            Stage::Generate => "/api/generate",
            Stage::Validate => "/api/validate",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.agent_name())
    }
}

/// Per-stage lifecycle.
///
/// Within one attempt a stage only moves
/// `Idle -> Processing -> {Completed | Error | Cancelled}`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, TS)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    #[default]
    Idle,
    Processing,
    Completed,
    Error,
    Cancelled,
}

impl StageState {
    /// Whether `self -> next` is a legal forward transition.
    pub fn can_transition_to(self, next: StageState) -> bool {
        matches!(
            (self, next),
            (StageState::Idle, StageState::Processing)
                | (StageState::Idle, StageState::Cancelled)
                | (StageState::Processing, StageState::Completed)
                | (StageState::Processing, StageState::Error)
                | (StageState::Processing, StageState::Cancelled)
        )
    }

    pub fn is_settled(self) -> bool {
        matches!(
            self,
            StageState::Completed | StageState::Error | StageState::Cancelled
        )
    }
}

/// Whether the controller pauses after the reason stage.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, TS)]
#[serde(rename_all = "lowercase")]
pub enum ProgressionMode {
    #[default]
    Manual,
    Auto,
}

/// Overall status of a pipeline run.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, TS)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// A stage call is in flight.
    Running,
    /// Stopped after the reason stage, waiting for the user to continue.
    PausedAtCheckpoint,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

/// Opaque stage payloads, present once the matching stage has completed.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, TS)]
pub struct StageOutputs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validate: Option<serde_json::Value>,
}

impl StageOutputs {
    pub fn get(&self, stage: Stage) -> Option<&serde_json::Value> {
        match stage {
            Stage::Parse => self.parse.as_ref(),
            Stage::Reason => self.reason.as_ref(),
            Stage::Generate => self.generate.as_ref(),
            Stage::Validate => self.validate.as_ref(),
        }
    }

    pub fn set(&mut self, stage: Stage, value: serde_json::Value) {
        *self.slot(stage) = Some(value);
    }

    pub fn clear(&mut self, stage: Stage) {
        *self.slot(stage) = None;
    }

    fn slot(&mut self, stage: Stage) -> &mut Option<serde_json::Value> {
        match stage {
            Stage::Parse => &mut self.parse,
            Stage::Reason => &mut self.reason,
            Stage::Generate => &mut self.generate,
            Stage::Validate => &mut self.validate,
        }
    }
}

/// Per-stage state for all four stages.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, TS)]
pub struct StageStates {
    pub parse: StageState,
    pub reason: StageState,
    pub generate: StageState,
    pub validate: StageState,
}

impl StageStates {
    pub fn get(&self, stage: Stage) -> StageState {
        match stage {
            Stage::Parse => self.parse,
            Stage::Reason => self.reason,
            Stage::Generate => self.generate,
            Stage::Validate => self.validate,
        }
    }

    pub fn get_mut(&mut self, stage: Stage) -> &mut StageState {
        match stage {
            Stage::Parse => &mut self.parse,
            Stage::Reason => &mut self.reason,
            Stage::Generate => &mut self.generate,
            Stage::Validate => &mut self.validate,
        }
    }
}

/// Lenient reading of a validate payload.
///
/// The validator's output is passed through untouched; this view only
/// extracts whether it passed and the reported violations, accepting the
/// field spellings the service has used.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ValidationSummary {
    #[serde(default, alias = "conforms", alias = "is_valid")]
    pub valid: Option<bool>,
    #[serde(default, alias = "violations")]
    pub errors: Vec<serde_json::Value>,
}

impl ValidationSummary {
    pub fn from_output(output: &serde_json::Value) -> Self {
        serde_json::from_value(output.clone()).unwrap_or_default()
    }

    /// A failure is an explicit `false` verdict or any reported violation.
    pub fn is_failure(&self) -> bool {
        self.valid == Some(false) || !self.errors.is_empty()
    }
}

/// One end-to-end attempt over a single input text.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TS)]
pub struct PipelineRun {
    pub id: Uuid,
    pub input_text: String,
    pub temperature: f64,
    pub progression_mode: ProgressionMode,
    /// Resolved model identifier per stage; `None` means the service default.
    #[serde(default)]
    pub models: BTreeMap<Stage, Option<String>>,
    #[serde(default)]
    pub stage_outputs: StageOutputs,
    #[serde(default)]
    pub stage_states: StageStates,
    /// Starts at 1 and only grows through regeneration.
    pub attempt_number: u32,
    /// Wall-clock duration of each settled stage call in milliseconds.
    #[serde(default)]
    pub metrics: BTreeMap<Stage, u64>,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PipelineRun {
    /// Validation failure of the latest attempt, if the validate output reports one.
    pub fn validation_failure(&self) -> Option<ValidationSummary> {
        self.stage_outputs
            .validate
            .as_ref()
            .map(ValidationSummary::from_output)
            .filter(ValidationSummary::is_failure)
    }

    pub fn is_live(&self) -> bool {
        !self.status.is_terminal()
    }
}
