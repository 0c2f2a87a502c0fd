//! Shared vocabulary for the subagent engine.
//!
//! These types are the engine's only view of the outside world: static
//! per-type policy ([`SubagentTypeConfig`]), read-only snapshots of the
//! parent's state ([`PermissionState`], [`ParentContext`], [`Credentials`]),
//! the logical launch request ([`SubagentRequest`]), and the single terminal
//! outcome ([`SubagentResult`]).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Error text used whenever a launch is cancelled, before or after spawn.
pub const INTERRUPTED_BY_USER: &str = "Interrupted by user";

/// Sentinel accepted in config for "use the parent's model".
pub const INHERIT_MODEL: &str = "inherit";

// ---------------------------------------------------------------------------
// Permission mode
// ---------------------------------------------------------------------------

/// Tool-approval mode a subagent runs under.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    #[default]
    Default,
    AcceptEdits,
    Plan,
    BypassPermissions,
}

impl PermissionMode {
    /// The flag value understood by the child's `--permission-mode`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::AcceptEdits => "acceptEdits",
            Self::Plan => "plan",
            Self::BypassPermissions => "bypassPermissions",
        }
    }
}

impl fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Self::Default),
            "acceptEdits" => Ok(Self::AcceptEdits),
            "plan" => Ok(Self::Plan),
            "bypassPermissions" => Ok(Self::BypassPermissions),
            other => Err(format!(
                "unknown permission mode '{other}' (expected default, acceptEdits, plan or bypassPermissions)"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Subagent type policy
// ---------------------------------------------------------------------------

/// Model a subagent type asks for.
///
/// Serialized as a plain string; `"inherit"` maps to [`RecommendedModel::Inherit`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RecommendedModel {
    #[default]
    Inherit,
    Handle(String),
}

impl RecommendedModel {
    /// The concrete handle, or `None` when the type inherits.
    pub fn handle(&self) -> Option<&str> {
        match self {
            Self::Inherit => None,
            Self::Handle(h) => Some(h),
        }
    }
}

impl From<String> for RecommendedModel {
    fn from(value: String) -> Self {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(INHERIT_MODEL) {
            Self::Inherit
        } else {
            Self::Handle(trimmed.to_string())
        }
    }
}

impl From<RecommendedModel> for String {
    fn from(value: RecommendedModel) -> Self {
        match value {
            RecommendedModel::Inherit => INHERIT_MODEL.to_string(),
            RecommendedModel::Handle(h) => h,
        }
    }
}

/// Config representation shared by [`ToolAllowance`] and [`InitBlocks`]:
/// either a keyword (`"all"`, `"none"`) or an explicit list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ListOrKeyword {
    Keyword(String),
    List(Vec<String>),
}

/// Tools a subagent type may use.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ListOrKeyword", into = "ListOrKeyword")]
pub enum ToolAllowance {
    #[default]
    All,
    Only(Vec<String>),
}

impl ToolAllowance {
    /// The explicit list, or `None` for [`ToolAllowance::All`].
    pub fn restricted(&self) -> Option<&[String]> {
        match self {
            Self::All => None,
            Self::Only(tools) => Some(tools),
        }
    }
}

impl TryFrom<ListOrKeyword> for ToolAllowance {
    type Error = String;

    fn try_from(value: ListOrKeyword) -> Result<Self, Self::Error> {
        match value {
            ListOrKeyword::Keyword(k) if k == "all" => Ok(Self::All),
            ListOrKeyword::Keyword(k) => Err(format!(
                "invalid allowed_tools '{k}': expected \"all\" or a list of tool names"
            )),
            ListOrKeyword::List(tools) => Ok(Self::Only(tools)),
        }
    }
}

impl From<ToolAllowance> for ListOrKeyword {
    fn from(value: ToolAllowance) -> Self {
        match value {
            ToolAllowance::All => Self::Keyword("all".to_string()),
            ToolAllowance::Only(tools) => Self::List(tools),
        }
    }
}

/// Which memory blocks a freshly created subagent is seeded with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ListOrKeyword", into = "ListOrKeyword")]
pub enum InitBlocks {
    #[default]
    All,
    None,
    Only(Vec<String>),
}

impl TryFrom<ListOrKeyword> for InitBlocks {
    type Error = String;

    fn try_from(value: ListOrKeyword) -> Result<Self, Self::Error> {
        match value {
            ListOrKeyword::Keyword(k) if k == "all" => Ok(Self::All),
            ListOrKeyword::Keyword(k) if k == "none" => Ok(Self::None),
            ListOrKeyword::Keyword(k) => Err(format!(
                "invalid init_blocks '{k}': expected \"all\", \"none\" or a list of block labels"
            )),
            ListOrKeyword::List(blocks) => Ok(Self::Only(blocks)),
        }
    }
}

impl From<InitBlocks> for ListOrKeyword {
    fn from(value: InitBlocks) -> Self {
        match value {
            InitBlocks::All => Self::Keyword("all".to_string()),
            InitBlocks::None => Self::Keyword("none".to_string()),
            InitBlocks::Only(blocks) => Self::List(blocks),
        }
    }
}

/// Static policy for one subagent type. Immutable once loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubagentTypeConfig {
    /// Type identifier, passed to the child as `--system <name>`.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub recommended_model: RecommendedModel,
    /// Overrides the parent's permission mode when set.
    #[serde(default)]
    pub permission_mode: Option<PermissionMode>,
    #[serde(default)]
    pub allowed_tools: ToolAllowance,
    #[serde(default)]
    pub init_blocks: InitBlocks,
}

impl SubagentTypeConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Parent snapshots
// ---------------------------------------------------------------------------

/// The parent's permission state, captured once per launch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionState {
    pub mode: PermissionMode,
    /// Parent's explicit `--allowedTools`.
    pub allow: Vec<String>,
    /// Parent's explicit `--disallowedTools`.
    pub deny: Vec<String>,
    /// Allow rules granted interactively during the current session.
    pub session_allow: Vec<String>,
}

/// Identity of the agent doing the launching.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParentContext {
    pub agent_id: Option<String>,
    /// Model handle the parent currently runs on.
    pub model: Option<String>,
}

/// API credentials forwarded to every child.
///
/// Resolved once by the caller and shared by all launches so a fan-out of N
/// subagents does not hit the credential store N times.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Request / result
// ---------------------------------------------------------------------------

/// One logical subagent launch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubagentRequest {
    pub subagent_type: String,
    pub prompt: String,
    /// Explicit model; bypasses availability checks.
    pub model_override: Option<String>,
    /// Redeploy an existing agent in a new conversation.
    pub existing_agent_id: Option<String>,
    /// Continue an existing conversation (its agent is implied).
    pub existing_conversation_id: Option<String>,
    pub max_turns: Option<u32>,
}

impl SubagentRequest {
    pub fn new(subagent_type: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            subagent_type: subagent_type.into(),
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    /// True when an existing identity is being reused instead of created.
    pub fn is_redeploy(&self) -> bool {
        self.existing_agent_id.is_some() || self.existing_conversation_id.is_some()
    }
}

/// Terminal outcome of one launch.
///
/// `success == false` always comes with a non-empty `error`; use the
/// constructors rather than building the struct by hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubagentResult {
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// Link to view the agent, when the backend is the hosted one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub report: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl SubagentResult {
    pub fn success(agent_id: impl Into<String>, report: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            conversation_id: None,
            agent_url: None,
            model: None,
            report: report.into(),
            success: true,
            error: None,
            total_tokens: None,
            duration_ms: None,
        }
    }

    /// A failed result. An empty `error` is replaced by a generic message.
    pub fn failure(agent_id: impl Into<String>, error: impl Into<String>) -> Self {
        let mut error = error.into();
        if error.trim().is_empty() {
            error = "Subagent failed without an error message".to_string();
        }
        Self {
            success: false,
            error: Some(error),
            ..Self::success(agent_id, "")
        }
    }

    pub fn interrupted(agent_id: impl Into<String>) -> Self {
        Self::failure(agent_id, INTERRUPTED_BY_USER)
    }

    pub fn is_interrupted(&self) -> bool {
        self.error.as_deref() == Some(INTERRUPTED_BY_USER)
    }
}
