//! Stream event parser for the child's `stream-json` output.
//!
//! The child writes one JSON record per stdout line. The protocol is
//! best-effort and forward-compatible: lines that are not JSON objects are
//! dropped, and unknown record kinds decode to [`StreamEvent::Ignored`].
//!
//! Each invocation owns one [`ExecutionState`] and feeds it every line in
//! arrival order via [`ExecutionState::ingest_line`].

use std::collections::HashSet;

use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::error::SubagentError;

use super::tracking::{ActivitySink, ToolCallRecord};

/// Base URL of the hosted backend.
pub const HOSTED_BASE_URL: &str = "https://api.brood.dev";
/// Web app where hosted agents can be viewed.
pub const HOSTED_APP_URL: &str = "https://app.brood.dev";

/// Link prefix for viewable agents, or `None` for self-hosted backends.
pub fn agent_link_base(base_url: Option<&str>) -> Option<String> {
    match base_url.map(|u| u.trim_end_matches('/')) {
        None | Some(HOSTED_BASE_URL) => Some(format!("{HOSTED_APP_URL}/agents")),
        Some(_) => None,
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Reasoning effort reported by the child at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReasoningEffort {
    /// The child reported the field with an explicit `null`.
    Unset,
    Level(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitEvent {
    pub agent_id: Option<String>,
    pub conversation_id: Option<String>,
    pub model: Option<String>,
    /// `None` when the field was absent from the record.
    pub reasoning_effort: Option<ReasoningEffort>,
}

/// One piece of a tool call. Arguments may arrive split across records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallFragment {
    pub call_id: String,
    pub name: Option<String>,
    pub arguments: String,
}

/// Terminal `result` record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultEvent {
    pub text: String,
    pub is_error: bool,
    pub duration_ms: Option<u64>,
    pub total_tokens: Option<u64>,
    pub agent_id: Option<String>,
    pub conversation_id: Option<String>,
}

/// One decoded protocol line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Init(InitEvent),
    ApprovalRequest(Vec<ToolCallFragment>),
    AutoApproval(Vec<ToolCallFragment>),
    Result(ResultEvent),
    Error(String),
    /// Valid record of a kind this engine does not act on.
    Ignored,
}

impl StreamEvent {
    /// Decode one line. `None` means the line is not a JSON object.
    pub fn decode(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        let v: Value = serde_json::from_str(trimmed).ok()?;
        if !v.is_object() {
            return None;
        }

        let event = match str_field(&v, "type").unwrap_or("") {
            "init" => Self::Init(InitEvent::from_value(&v)),
            "system" if str_field(&v, "subtype") == Some("init") => {
                Self::Init(InitEvent::from_value(&v))
            }
            "message" => match str_field(&v, "message_type") {
                Some("approval_request_message" | "approval_request") => {
                    Self::ApprovalRequest(tool_call_fragments(&v))
                }
                _ => Self::Ignored,
            },
            "auto_approval" => Self::AutoApproval(tool_call_fragments(&v)),
            "result" => Self::Result(ResultEvent::from_value(&v)),
            "error" => Self::Error(error_message(&v)),
            other => {
                debug!(event_type = other, "ignoring unrecognised stream event type");
                Self::Ignored
            }
        };
        Some(event)
    }
}

impl InitEvent {
    fn from_value(v: &Value) -> Self {
        let reasoning_effort = match v.get("reasoning_effort") {
            None => None,
            Some(Value::Null) => Some(ReasoningEffort::Unset),
            Some(Value::String(s)) => Some(ReasoningEffort::Level(s.clone())),
            Some(other) => Some(ReasoningEffort::Level(other.to_string())),
        };
        Self {
            agent_id: owned_str_field(v, "agent_id"),
            conversation_id: owned_str_field(v, "conversation_id"),
            model: owned_str_field(v, "model"),
            reasoning_effort,
        }
    }
}

impl ToolCallFragment {
    fn from_value(v: &Value) -> Option<Self> {
        let call_id = owned_str_field(v, "tool_call_id").or_else(|| owned_str_field(v, "id"))?;
        let arguments = match v.get("arguments") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        };
        Some(Self {
            call_id,
            name: owned_str_field(v, "name"),
            arguments,
        })
    }
}

impl ResultEvent {
    fn from_value(v: &Value) -> Self {
        let text = match v.get("result") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        };
        let is_error = v.get("is_error").and_then(Value::as_bool).unwrap_or(false)
            || str_field(v, "subtype").is_some_and(|s| s.starts_with("error"));

        let total_tokens = v.get("usage").and_then(|usage| {
            usage.get("total_tokens").and_then(Value::as_u64).or_else(|| {
                let input = usage.get("input_tokens").and_then(Value::as_u64).unwrap_or(0);
                let output = usage.get("output_tokens").and_then(Value::as_u64).unwrap_or(0);
                (input + output > 0).then_some(input + output)
            })
        });

        Self {
            text,
            is_error,
            duration_ms: v.get("duration_ms").and_then(Value::as_u64),
            total_tokens,
            agent_id: owned_str_field(v, "agent_id"),
            conversation_id: owned_str_field(v, "conversation_id"),
        }
    }

    /// Parse a raw line as a terminal `result` record.
    ///
    /// Used on the last stdout line when the stream itself produced no
    /// result.
    pub fn parse_line(line: &str) -> Result<Self, SubagentError> {
        let v: Value = serde_json::from_str(line.trim())
            .map_err(|e| SubagentError::FallbackParse(e.to_string()))?;
        match str_field(&v, "type") {
            Some("result") => Ok(Self::from_value(&v)),
            Some(other) => Err(SubagentError::FallbackParse(format!(
                "last output line is a '{other}' record, not a result"
            ))),
            None => Err(SubagentError::FallbackParse(
                "last output line has no record type".to_string(),
            )),
        }
    }
}

fn str_field<'a>(v: &'a Value, key: &str) -> Option<&'a str> {
    v.get(key).and_then(Value::as_str)
}

fn owned_str_field(v: &Value, key: &str) -> Option<String> {
    str_field(v, key).filter(|s| !s.is_empty()).map(str::to_string)
}

/// Tool calls carried by a record, as `tool_call` and/or `tool_calls`.
fn tool_call_fragments(v: &Value) -> Vec<ToolCallFragment> {
    let mut calls: Vec<&Value> = Vec::new();
    if let Some(arr) = v.get("tool_calls").and_then(Value::as_array) {
        calls.extend(arr);
    }
    if let Some(call) = v.get("tool_call").filter(|c| c.is_object()) {
        calls.push(call);
    }
    calls
        .into_iter()
        .filter_map(ToolCallFragment::from_value)
        .collect()
}

fn error_message(v: &Value) -> String {
    let explicit = match v.get("error") {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(obj @ Value::Object(_)) => owned_str_field(obj, "message"),
        _ => None,
    };
    explicit
        .or_else(|| owned_str_field(v, "message"))
        .unwrap_or_else(|| "Subagent reported an unspecified error".to_string())
}

// ---------------------------------------------------------------------------
// Execution state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultStats {
    pub duration_ms: Option<u64>,
    pub total_tokens: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingToolCall {
    call_id: String,
    name: Option<String>,
    arguments: String,
}

/// Accumulated state for one running child.
///
/// Public fields are read by the supervisor once the child exits; they are
/// only ever written by [`ExecutionState::apply`].
#[derive(Debug)]
pub struct ExecutionState {
    invocation_id: Uuid,
    link_base: Option<String>,
    pub agent_id: Option<String>,
    pub agent_url: Option<String>,
    pub conversation_id: Option<String>,
    pub model: Option<String>,
    pub reasoning_effort: Option<ReasoningEffort>,
    /// Set by a successful `result` record.
    pub final_result: Option<String>,
    /// Set by a failed `result` record or an `error` record.
    pub final_error: Option<String>,
    pub stats: ResultStats,
    recorded: HashSet<String>,
    /// Buffered approval requests, in first-seen order.
    pending: Vec<PendingToolCall>,
}

impl ExecutionState {
    pub fn new(invocation_id: Uuid) -> Self {
        Self {
            invocation_id,
            link_base: None,
            agent_id: None,
            agent_url: None,
            conversation_id: None,
            model: None,
            reasoning_effort: None,
            final_result: None,
            final_error: None,
            stats: ResultStats::default(),
            recorded: HashSet::new(),
            pending: Vec::new(),
        }
    }

    /// Enable viewable agent links under `base` (see [`agent_link_base`]).
    pub fn with_link_base(mut self, base: Option<String>) -> Self {
        self.link_base = base;
        self
    }

    pub fn invocation_id(&self) -> Uuid {
        self.invocation_id
    }

    /// Whether a terminal `result` record has been seen.
    pub fn has_terminal_result(&self) -> bool {
        self.final_result.is_some()
    }

    /// Number of tool calls reported to the sink so far.
    pub fn recorded_tool_calls(&self) -> usize {
        self.recorded.len()
    }

    /// Decode and apply one stdout line. Returns `false` if it was dropped.
    pub fn ingest_line(&mut self, line: &str, sink: &dyn ActivitySink) -> bool {
        match StreamEvent::decode(line) {
            Some(event) => {
                self.apply(event, sink);
                true
            }
            None => false,
        }
    }

    pub fn apply(&mut self, event: StreamEvent, sink: &dyn ActivitySink) {
        match event {
            StreamEvent::Init(init) => self.apply_init(init, sink),
            StreamEvent::ApprovalRequest(fragments) => {
                for fragment in fragments {
                    self.buffer_fragment(fragment);
                }
            }
            StreamEvent::AutoApproval(fragments) => {
                for fragment in fragments {
                    let pending = self.pending.iter().find(|p| p.call_id == fragment.call_id);
                    let name = fragment
                        .name
                        .clone()
                        .or_else(|| pending.and_then(|p| p.name.clone()));
                    let arguments = if fragment.arguments.is_empty() {
                        pending.map(|p| p.arguments.clone()).unwrap_or_default()
                    } else {
                        fragment.arguments.clone()
                    };
                    self.record_tool_call(&fragment.call_id, name, arguments, sink);
                }
            }
            StreamEvent::Result(result) => self.apply_result(result, sink),
            StreamEvent::Error(message) => self.final_error = Some(message),
            StreamEvent::Ignored => {}
        }
    }

    fn apply_init(&mut self, init: InitEvent, sink: &dyn ActivitySink) {
        if let Some(agent_id) = init.agent_id {
            self.agent_url = self
                .link_base
                .as_ref()
                .map(|base| format!("{base}/{agent_id}"));
            sink.agent_started(self.invocation_id, &agent_id, self.agent_url.as_deref());
            self.agent_id = Some(agent_id);
        }
        if init.conversation_id.is_some() {
            self.conversation_id = init.conversation_id;
        }
        if init.model.is_some() {
            self.model = init.model;
        }
        if init.reasoning_effort.is_some() {
            self.reasoning_effort = init.reasoning_effort;
        }
    }

    fn apply_result(&mut self, result: ResultEvent, sink: &dyn ActivitySink) {
        self.stats = ResultStats {
            duration_ms: result.duration_ms,
            total_tokens: result.total_tokens,
        };
        if self.agent_id.is_none() {
            self.agent_id = result.agent_id;
        }
        if self.conversation_id.is_none() {
            self.conversation_id = result.conversation_id;
        }

        if result.is_error {
            self.final_error = Some(if result.text.trim().is_empty() {
                "Subagent reported an error".to_string()
            } else {
                result.text
            });
        } else {
            self.final_result = Some(result.text);
            self.flush_pending(sink);
        }
    }

    fn buffer_fragment(&mut self, fragment: ToolCallFragment) {
        if self.recorded.contains(&fragment.call_id) {
            return;
        }
        match self.pending.iter_mut().find(|p| p.call_id == fragment.call_id) {
            Some(pending) => {
                pending.arguments.push_str(&fragment.arguments);
                if pending.name.is_none() {
                    pending.name = fragment.name;
                }
            }
            None => self.pending.push(PendingToolCall {
                call_id: fragment.call_id,
                name: fragment.name,
                arguments: fragment.arguments,
            }),
        }
    }

    /// Report every buffered call that was never acknowledged.
    fn flush_pending(&mut self, sink: &dyn ActivitySink) {
        for pending in std::mem::take(&mut self.pending) {
            self.record_tool_call(&pending.call_id, pending.name, pending.arguments, sink);
        }
    }

    fn record_tool_call(
        &mut self,
        call_id: &str,
        name: Option<String>,
        arguments: String,
        sink: &dyn ActivitySink,
    ) {
        if !self.recorded.insert(call_id.to_string()) {
            return;
        }
        self.pending.retain(|p| p.call_id != call_id);
        let name = name.unwrap_or_else(|| "unknown".to_string());
        sink.tool_call(
            self.invocation_id,
            ToolCallRecord::new(call_id, name, arguments),
        );
    }

    /// Arguments buffered so far for a pending call.
    pub fn pending_arguments(&self, call_id: &str) -> Option<&str> {
        self.pending
            .iter()
            .find(|p| p.call_id == call_id)
            .map(|p| p.arguments.as_str())
    }
}
