//! Subcommand implementations.

pub mod eval;
pub mod history;
pub mod models;
pub mod run;
