pub mod error;
pub mod subagent;
