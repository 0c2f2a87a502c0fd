//! Activity tracking: where the engine reports what its subagents do.
//!
//! The engine only writes. Sinks are shared by every concurrent invocation,
//! so implementations must key by `(invocation id, call id)` and tolerate
//! concurrent writers.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

/// One tool call observed in a subagent's stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolCallRecord {
    pub call_id: String,
    pub name: String,
    /// Raw argument text, concatenated from streamed fragments.
    pub arguments: String,
    pub recorded_at: DateTime<Utc>,
}

impl ToolCallRecord {
    pub fn new(call_id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            arguments: arguments.into(),
            recorded_at: Utc::now(),
        }
    }
}

/// Write-only sink for subagent activity.
pub trait ActivitySink: Send + Sync {
    /// The child announced its agent identity.
    fn agent_started(&self, invocation_id: Uuid, agent_id: &str, agent_url: Option<&str>);

    /// A tool call was approved or completed. Called at most once per
    /// `(invocation_id, call_id)` by the engine.
    fn tool_call(&self, invocation_id: Uuid, record: ToolCallRecord);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopActivitySink;

impl ActivitySink for NoopActivitySink {
    fn agent_started(&self, _invocation_id: Uuid, _agent_id: &str, _agent_url: Option<&str>) {}

    fn tool_call(&self, _invocation_id: Uuid, _record: ToolCallRecord) {}
}

/// Logs activity through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingActivitySink;

impl ActivitySink for TracingActivitySink {
    fn agent_started(&self, invocation_id: Uuid, agent_id: &str, agent_url: Option<&str>) {
        info!(invocation_id = %invocation_id, agent_id, agent_url, "subagent started");
    }

    fn tool_call(&self, invocation_id: Uuid, record: ToolCallRecord) {
        info!(
            invocation_id = %invocation_id,
            call_id = %record.call_id,
            tool = %record.name,
            "subagent tool call"
        );
    }
}

#[derive(Debug, Default)]
struct Recorded {
    agents: HashMap<Uuid, String>,
    tool_calls: HashMap<Uuid, Vec<ToolCallRecord>>,
}

/// Keeps everything in memory, per invocation, in arrival order.
///
/// A second record for an existing `(invocation, call id)` is ignored.
#[derive(Debug, Default)]
pub struct InMemoryActivitySink {
    inner: Mutex<Recorded>,
}

impl InMemoryActivitySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Agent id announced by an invocation, if any.
    pub fn agent_for(&self, invocation_id: Uuid) -> Option<String> {
        self.lock().agents.get(&invocation_id).cloned()
    }

    /// Tool calls recorded for one invocation.
    pub fn tool_calls_for(&self, invocation_id: Uuid) -> Vec<ToolCallRecord> {
        self.lock()
            .tool_calls
            .get(&invocation_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Every invocation id that recorded at least one tool call.
    pub fn invocations(&self) -> Vec<Uuid> {
        self.lock().tool_calls.keys().copied().collect()
    }

    /// Total tool calls across all invocations.
    pub fn total_tool_calls(&self) -> usize {
        self.lock().tool_calls.values().map(Vec::len).sum()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Recorded> {
        // A panic while holding the lock cannot leave the maps half-written.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ActivitySink for InMemoryActivitySink {
    fn agent_started(&self, invocation_id: Uuid, agent_id: &str, _agent_url: Option<&str>) {
        self.lock().agents.insert(invocation_id, agent_id.to_string());
    }

    fn tool_call(&self, invocation_id: Uuid, record: ToolCallRecord) {
        let mut inner = self.lock();
        let calls = inner.tool_calls.entry(invocation_id).or_default();
        if calls.iter().all(|c| c.call_id != record.call_id) {
            calls.push(record);
        }
    }
}
