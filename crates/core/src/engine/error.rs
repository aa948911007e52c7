//! Pipeline controller error types.

use af_protocol::pipeline_models::{Stage, StageState};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Input text is empty")]
    EmptyInput,

    #[error("No model could be resolved for the parser stage")]
    NoModel,

    #[error("Another pipeline run is still live")]
    RunInProgress,

    #[error("No pipeline run is active")]
    NoActiveRun,

    #[error("The run is not paused at the checkpoint")]
    NotAtCheckpoint,

    /// Regeneration needs the full prior context.
    #[error("Cannot regenerate without the {0}")]
    ContextMissing(&'static str),

    #[error("Regeneration limit reached after {max} attempts")]
    AttemptsExhausted { max: u32 },

    #[error("Agent service is unreachable: {0}")]
    Offline(String),

    #[error("{stage} stage failed: {message}")]
    Stage { stage: Stage, message: String },

    /// Carries the cancellation reason; never surfaced as a failure.
    #[error("Run cancelled: {0}")]
    Cancelled(String),

    #[error("Invalid {stage} transition from {from:?} to {to:?}")]
    InvalidTransition {
        stage: Stage,
        from: StageState,
        to: StageState,
    },
}

pub type PipelineResult<T> = Result<T, PipelineError>;
