//! Resumable batch evaluation runs.
//!
//! The service executes evaluator jobs server-side. [`EvaluatorPoller`]
//! starts one, tails its progress with a cursor on a fixed cadence, and
//! keeps the client-side mirror in the durable store so a restarted client
//! picks the run back up.

pub mod error;
pub mod poller;

pub use error::{EvaluatorError, EvaluatorResult};
pub use poller::{EvaluatorPoller, PollOutcome};
