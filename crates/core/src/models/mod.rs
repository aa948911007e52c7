//! Model registry and per-agent model resolution.
//!
//! The registry is an explicitly constructed value: it is loaded once at
//! start, refreshed on demand, and passed to whoever needs to resolve a
//! model. Nothing here is global.

pub mod registry;
pub mod resolver;

pub use registry::{merge_custom_models, Connectivity, MirrorOutcome, ModelRegistry, RegistryError};
pub use resolver::{resolve, resolve_for};
