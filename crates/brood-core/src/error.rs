//! Internal error type for the subagent engine.
//!
//! None of these escape [`crate::subagent::SubagentSupervisor::launch`]; they
//! are converted into a failed [`crate::subagent::SubagentResult`] at that
//! boundary so callers only ever see one result shape.

/// Errors raised while running a single subagent attempt.
#[derive(Debug, thiserror::Error)]
pub enum SubagentError {
    #[error("Failed to spawn subagent command '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Subagent {0} was not captured")]
    MissingPipe(&'static str),

    #[error("Failed to wait for subagent process: {0}")]
    Wait(#[source] std::io::Error),

    #[error("Failed to parse subagent output: {0}")]
    FallbackParse(String),
}
