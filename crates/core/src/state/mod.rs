//! State management for pipeline runs.
//!
//! This module provides the pipeline run state machine: free functions that
//! apply one transition to a [`PipelineRun`](af_protocol::pipeline_models::PipelineRun)
//! and emit the matching lifecycle event.

pub mod run;
