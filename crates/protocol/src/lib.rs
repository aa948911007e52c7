//! # af-protocol
//!
//! Core protocol definitions and data models for agentflow.
//!
//! This crate defines all shared data structures used for:
//! - Pipeline runs and their per-stage state
//! - Run history snapshots
//! - Batch evaluator runs and their polled progress
//! - The model catalog, user-defined models and per-call model configuration
//! - Lifecycle events sent from the core to a presentation layer
//!
//! ## Modules
//!
//! - [`pipeline_models`]: Pipeline runs, stages and stage states
//! - [`history_models`]: History snapshots
//! - [`evaluator_models`]: Batch evaluator run state and poll responses
//! - [`model_models`]: Provider catalog, custom models, model selection
//! - [`ipc`]: Lifecycle events
//!
//! ## Design Principles
//!
//! - Minimal dependencies: serde, ts-rs, uuid and chrono
//! - TypeScript generation: shared types derive `TS` for the browser client
//! - Independent compilation: No dependencies on other agentflow crates

pub mod evaluator_models;
pub mod history_models;
pub mod ipc;
pub mod model_models;
pub mod pipeline_models;

// Re-export all public types for convenience
pub use evaluator_models::*;
pub use history_models::*;
pub use ipc::*;
pub use model_models::*;
pub use pipeline_models::*;
