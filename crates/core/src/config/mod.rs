//! Configuration loading and management.
//!
//! Settings live in `.agentflow/config.toml` under the project root. Every
//! section is optional and falls back to defaults.

pub mod error;
pub mod loader;
pub mod models;
