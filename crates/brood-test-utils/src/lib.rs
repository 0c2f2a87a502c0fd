//! Shared test utilities for brood integration tests.
//!
//! Subagents are child processes, so tests stand in for the real harness
//! with small `/bin/sh` scripts that print protocol lines. Scripts are run
//! as `/bin/sh <script>` rather than exec'd directly, which sidesteps
//! `ETXTBSY` when another test thread forks while the file is being written.

use std::path::{Path, PathBuf};

use serde_json::json;
use tempfile::TempDir;

/// Shell used to run fake subagent scripts.
pub const SHELL: &str = "/bin/sh";

/// A fake subagent script in its own temp directory.
///
/// The directory (and the script) is removed when this is dropped.
pub struct FakeSubagent {
    dir: TempDir,
    script: PathBuf,
}

impl Default for FakeSubagent {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeSubagent {
    /// Create the temp directory; the script is empty until
    /// [`write`](Self::write) is called.
    ///
    /// Useful when the script body needs paths from [`scratch`](Self::scratch).
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let script = dir.path().join("fake_brood.sh");
        let fake = Self { dir, script };
        fake.write("");
        fake
    }

    /// Replace the script body.
    pub fn write(&self, body: &str) {
        std::fs::write(&self.script, format!("#!/bin/sh\n{body}\n"))
            .expect("failed to write script");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.script, std::fs::Permissions::from_mode(0o755))
                .expect("failed to chmod script");
        }
    }

    /// Path of the script itself.
    pub fn script(&self) -> &Path {
        &self.script
    }

    /// Scratch directory next to the script, for files the script writes.
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Path to a scratch file inside [`dir`](Self::dir).
    pub fn scratch(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Command token and base arguments that run the script.
    pub fn command(&self) -> (String, Vec<String>) {
        (
            SHELL.to_string(),
            vec![self.script.to_string_lossy().into_owned()],
        )
    }

    /// Base arguments as the JSON array `BROOD_BIN_ARGS_JSON` expects.
    pub fn base_args_json(&self) -> String {
        serde_json::to_string(&self.command().1).expect("string list serializes")
    }
}

/// Write `body` as a `/bin/sh` script into a fresh temp directory.
pub fn fake_subagent(body: &str) -> FakeSubagent {
    let fake = FakeSubagent::new();
    fake.write(body);
    fake
}

/// Quote `s` for a POSIX shell.
pub fn sh_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Script lines that print each of `lines` verbatim on stdout.
pub fn emit_lines<S: AsRef<str>>(lines: &[S]) -> String {
    lines
        .iter()
        .map(|line| format!("printf '%s\\n' {}", sh_quote(line.as_ref())))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Script line that saves the script's arguments, one per line, to `path`.
pub fn record_args(path: &Path) -> String {
    format!(
        "printf '%s\\n' \"$@\" > {}",
        sh_quote(&path.to_string_lossy())
    )
}

/// Builders for protocol lines.
pub mod lines {
    use super::json;

    pub fn init(agent_id: &str, conversation_id: &str, model: &str) -> String {
        json!({
            "type": "system",
            "subtype": "init",
            "agent_id": agent_id,
            "conversation_id": conversation_id,
            "model": model,
        })
        .to_string()
    }

    pub fn approval_request(call_id: &str, name: &str, arguments: &str) -> String {
        json!({
            "type": "message",
            "message_type": "approval_request_message",
            "tool_call": { "tool_call_id": call_id, "name": name, "arguments": arguments },
        })
        .to_string()
    }

    pub fn auto_approval(call_id: &str, name: &str, arguments: &str) -> String {
        json!({
            "type": "auto_approval",
            "tool_call": { "tool_call_id": call_id, "name": name, "arguments": arguments },
        })
        .to_string()
    }

    pub fn result_success(text: &str) -> String {
        json!({
            "type": "result",
            "subtype": "success",
            "is_error": false,
            "result": text,
            "duration_ms": 1500,
            "usage": { "total_tokens": 420 },
        })
        .to_string()
    }

    pub fn result_error(text: &str) -> String {
        json!({
            "type": "result",
            "subtype": "error",
            "is_error": true,
            "result": text,
        })
        .to_string()
    }

    pub fn error(message: &str) -> String {
        json!({ "type": "error", "error": message }).to_string()
    }
}
