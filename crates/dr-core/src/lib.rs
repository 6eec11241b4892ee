//! dr-core: Core types and traits for deep-research-mcp
//!
//! This crate provides the interaction data model, the error taxonomy, the
//! backend and clock abstractions, and the orchestrator that drives a
//! background research job to completion.

pub mod backend;
pub mod clock;
pub mod error;
pub mod interaction;
pub mod orchestrator;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use backend::ResearchBackend;
pub use clock::{Clock, SystemClock};
pub use error::Error;
pub use interaction::{field, Annotation, Interaction, Output, TERMINAL_STATUSES, UNKNOWN_STATUS};
pub use orchestrator::{
    Orchestrator, OrchestratorConfig, PollOutcome, PollState, DEFAULT_AGENT, DEFAULT_MODEL,
    DEFAULT_POLL_INTERVAL, MAX_TIMEOUT_SECONDS,
};

pub type Result<T> = std::result::Result<T, Error>;
