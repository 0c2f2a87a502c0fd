//! Subagent orchestration engine.
//!
//! A subagent is a nested copy of the `brood` harness running as a child
//! process with one delegated task. This module turns a [`SubagentRequest`]
//! into exactly one [`SubagentResult`].
//!
//! # Architecture
//!
//! ```text
//! SubagentSupervisor::launch(request, cancel)
//!     |
//!     +-- SubagentTypeRegistry::get(type) ------> SubagentTypeConfig
//!     +-- resolve_subagent_model(..) -----------> Option<model handle>
//!     +-- build_subagent_args(..) --------------> Vec<String>
//!     +-- LaunchCommand::to_spec(args, env) ----> LaunchSpec
//!     |
//!     spawn child --stdout lines--> ExecutionState::ingest_line
//!     |                                  |
//!     |                                  +--> ActivitySink (tool calls)
//!     v
//!     exit status + stderr + last line --> resolve_outcome (+ arbiter)
//!                                              |
//!                                              v
//!                                        SubagentResult
//! ```
//!
//! Every invocation owns its child process and its [`ExecutionState`];
//! nothing mutable is shared between invocations, so [`fanout::launch_all`]
//! can run many of them at once.

pub mod arbiter;
pub mod args;
pub mod fanout;
pub mod launcher;
pub mod model;
pub mod registry;
pub mod stream;
pub mod supervisor;
pub mod tracking;
pub mod types;

pub use arbiter::{ReportSource, choose_report};
pub use args::{ArgsInput, build_subagent_args};
pub use fanout::launch_all;
pub use launcher::{LaunchCommand, LaunchSpec, LauncherInputs, Platform, resolve_launcher};
pub use model::{ModelCatalog, ModelResolutionInput, StaticModelCatalog, resolve_subagent_model};
pub use registry::{RegistryError, SubagentTypeRegistry};
pub use stream::{ExecutionState, ReasoningEffort, ResultEvent, StreamEvent};
pub use supervisor::SubagentSupervisor;
pub use tracking::{
    ActivitySink, InMemoryActivitySink, NoopActivitySink, ToolCallRecord, TracingActivitySink,
};
pub use types::{
    Credentials, INTERRUPTED_BY_USER, InitBlocks, ParentContext, PermissionMode, PermissionState,
    RecommendedModel, SubagentRequest, SubagentResult, SubagentTypeConfig, ToolAllowance,
};
