//! Draining a queue: print every message, optionally delete it, and stop once the
//! queue has gone quiet.
//!
//! [`DrainRun`] owns one drain from start to teardown and wires the
//! [`DrainHandler`] and the [`DispositionHandler`] into the consumer pipeline.

mod disposition;
mod handler;
mod orchestrator;
mod progress;

pub use disposition::DispositionHandler;
pub use handler::DrainHandler;
pub use orchestrator::{
    shutdown_signal, DrainError, DrainOutcome, DrainRun, StopReason, DEFAULT_IDLE_TIMEOUT,
};
pub use progress::{progress_channel, ProgressReceiver, ProgressSender};
