//! # af-core
//!
//! Client-side orchestration engine for agentflow.
//!
//! This crate provides:
//! - Configuration loading from the `.agentflow/` directory
//! - Durable local key-value storage for client state
//! - The agent service client (HTTP and a scripted mock)
//! - Cooperative cancellation tokens
//! - The merged model registry and per-agent model resolution
//! - The pipeline controller and its run history
//! - The resumable evaluator poller
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and management
//! - [`storage`]: Key-value stores and the persisted keys
//! - [`client`]: `AgentService` trait and implementations
//! - [`cancel`]: Cancellation token source
//! - [`models`]: Model registry and resolver
//! - [`state`]: Pipeline run state machine
//! - [`engine`]: Pipeline controller
//! - [`history`]: Bounded run history
//! - [`evaluator`]: Batch run poller

pub mod cancel;
pub mod client;
pub mod config;
pub mod engine;
pub mod evaluator;
pub mod history;
pub mod models;
pub mod state;
pub mod storage;
