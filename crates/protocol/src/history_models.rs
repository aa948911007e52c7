//! Run history models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::pipeline_models::{PipelineRun, RunStatus};

/// Immutable snapshot of a pipeline run at a checkpoint or terminal state.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TS)]
pub struct HistoryItem {
    pub id: Uuid,
    pub recorded_at: DateTime<Utc>,
    pub run: PipelineRun,
}

impl HistoryItem {
    pub fn snapshot(run: &PipelineRun) -> Self {
        Self {
            id: Uuid::new_v4(),
            recorded_at: Utc::now(),
            run: run.clone(),
        }
    }

    pub fn status(&self) -> RunStatus {
        self.run.status
    }
}
