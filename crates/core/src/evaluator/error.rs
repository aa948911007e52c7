//! Evaluator poller error types.

use thiserror::Error;

use crate::client::ServiceError;
use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum EvaluatorError {
    #[error("No evaluator kind selected")]
    NoEvaluatorSelected,

    #[error("No model could be resolved for the evaluator run")]
    NoModel,

    #[error("An evaluator run is already active")]
    RunAlreadyActive,

    #[error("No evaluator run is recorded")]
    NoActiveRun,

    #[error("The evaluator run is not running")]
    NotRunning,

    #[error("The evaluator run is not suspended")]
    NotSuspended,

    /// A poll answered with a cursor behind the one already consumed.
    #[error("Poll cursor went backwards: stored {stored}, received {received}")]
    CursorRegression { stored: u64, received: u64 },

    #[error("No record available for item {0}")]
    RecordUnavailable(u32),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type EvaluatorResult<T> = Result<T, EvaluatorError>;
