//! Process supervisor: runs one subagent request to completion.
//!
//! [`SubagentSupervisor::launch`] never fails. Spawn errors, unknown types,
//! protocol garbage and cancellation all come back as a failed
//! [`SubagentResult`].
//!
//! Per attempt:
//!
//! 1. resolve the model (fresh path only) and build the argument list,
//! 2. spawn the child with stdout and stderr piped,
//! 3. feed each stdout line to the attempt's [`ExecutionState`] while stderr
//!    is drained concurrently,
//! 4. wait for exit and turn state + exit status + stderr into a result.
//!
//! A child that dies because the backend rejected its model's provider is
//! re-run once on the parent's model.

use std::fmt;
use std::process::Stdio;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::SubagentError;

use super::arbiter::choose_report;
use super::args::{ArgsInput, build_subagent_args};
use super::launcher::LaunchCommand;
use super::model::{ModelCatalog, ModelResolutionInput, StaticModelCatalog, resolve_subagent_model};
use super::registry::SubagentTypeRegistry;
use super::stream::{ExecutionState, ResultEvent, agent_link_base};
use super::tracking::{ActivitySink, NoopActivitySink};
use super::types::{
    Credentials, ParentContext, PermissionState, SubagentRequest, SubagentResult, SubagentTypeConfig,
};

/// API credential forwarded to the child.
pub const API_KEY_ENV: &str = "BROOD_API_KEY";
/// Backend base URL forwarded to the child.
pub const BASE_URL_ENV: &str = "BROOD_BASE_URL";
/// Tells the child it runs as a subagent.
pub const AGENT_ROLE_ENV: &str = "BROOD_AGENT_ROLE";
pub const SUBAGENT_ROLE: &str = "subagent";
/// Id of the launching agent, when known.
pub const PARENT_AGENT_ID_ENV: &str = "BROOD_PARENT_AGENT_ID";

/// How long a cancelled child gets between SIGTERM and SIGKILL.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(5);
/// Re-runs allowed after the backend rejects a model's provider.
pub const MAX_PROVIDER_RETRIES: u32 = 1;

static UNSUPPORTED_PROVIDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(provider\b.*\bis not supported|unsupported provider)")
        .expect("unsupported provider pattern is valid")
});

/// Runs subagent requests. Cheap to clone; clones share the registry,
/// catalog and activity sink.
#[derive(Clone)]
pub struct SubagentSupervisor {
    launcher: LaunchCommand,
    registry: Arc<SubagentTypeRegistry>,
    catalog: Arc<dyn ModelCatalog>,
    permissions: PermissionState,
    parent: ParentContext,
    credentials: Credentials,
    sink: Arc<dyn ActivitySink>,
    kill_grace: Duration,
}

impl SubagentSupervisor {
    pub fn new(launcher: LaunchCommand, registry: Arc<SubagentTypeRegistry>) -> Self {
        Self {
            launcher,
            registry,
            catalog: Arc::new(StaticModelCatalog::default()),
            permissions: PermissionState::default(),
            parent: ParentContext::default(),
            credentials: Credentials::default(),
            sink: Arc::new(NoopActivitySink),
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn ModelCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_permissions(mut self, permissions: PermissionState) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_parent(mut self, parent: ParentContext) -> Self {
        self.parent = parent;
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_activity_sink(mut self, sink: Arc<dyn ActivitySink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    pub fn registry(&self) -> &SubagentTypeRegistry {
        &self.registry
    }

    pub fn parent(&self) -> &ParentContext {
        &self.parent
    }

    /// Run one request to completion.
    ///
    /// A token that is already cancelled short-circuits before anything is
    /// spawned. Cancelling later terminates the child and the result is
    /// always [`SubagentResult::interrupted`], whatever the child printed.
    pub async fn launch(
        &self,
        request: &SubagentRequest,
        cancel: Option<CancellationToken>,
    ) -> SubagentResult {
        let cancel = cancel.unwrap_or_default();
        if cancel.is_cancelled() {
            info!(subagent_type = %request.subagent_type, "subagent cancelled before launch");
            return SubagentResult::interrupted("");
        }

        let config = match self.registry.require(&request.subagent_type) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "cannot launch subagent");
                return SubagentResult::failure("", e.to_string());
            }
        };

        let mut model_override = request.model_override.clone();
        let mut attempt: u32 = 0;
        loop {
            let outcome = self
                .run_attempt(config, request, model_override.as_deref(), attempt, &cancel)
                .await;
            match outcome {
                Ok(AttemptOutcome::Finished(result)) => return result,
                Ok(AttemptOutcome::ProviderRejected(result)) => {
                    let fallback = self.parent.model.as_deref().filter(|m| !m.is_empty());
                    match fallback {
                        Some(parent_model) if attempt < MAX_PROVIDER_RETRIES => {
                            warn!(
                                attempt,
                                model = parent_model,
                                "subagent provider rejected, retrying on the parent model"
                            );
                            attempt += 1;
                            model_override = Some(parent_model.to_string());
                        }
                        _ => return result,
                    }
                }
                Err(e) => {
                    warn!(error = %e, attempt, "subagent attempt failed");
                    return SubagentResult::failure("", e.to_string());
                }
            }
        }
    }

    async fn run_attempt(
        &self,
        config: &SubagentTypeConfig,
        request: &SubagentRequest,
        model_override: Option<&str>,
        attempt: u32,
        cancel: &CancellationToken,
    ) -> Result<AttemptOutcome, SubagentError> {
        let invocation_id = Uuid::new_v4();

        let model = if request.is_redeploy() {
            None
        } else {
            let input = ModelResolutionInput {
                explicit: model_override,
                recommended: config.recommended_model.handle(),
                parent: self.parent.model.as_deref(),
            };
            resolve_subagent_model(input, self.catalog.as_ref()).await
        };

        let args = build_subagent_args(&ArgsInput {
            type_config: config,
            model: model.as_deref(),
            prompt: &request.prompt,
            existing_agent_id: request.existing_agent_id.as_deref(),
            existing_conversation_id: request.existing_conversation_id.as_deref(),
            max_turns: request.max_turns,
            permissions: &self.permissions,
        });
        let spec = self.launcher.to_spec(args, self.child_env());

        let mut child = Command::new(&spec.command)
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SubagentError::Spawn {
                command: spec.command.clone(),
                source,
            })?;

        info!(
            invocation_id = %invocation_id,
            subagent_type = %config.name,
            attempt,
            pid = child.id(),
            model = model.as_deref(),
            "subagent spawned"
        );

        let stdout = child.stdout.take().ok_or(SubagentError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(SubagentError::MissingPipe("stderr"))?;
        let stderr_task: JoinHandle<String> = tokio::spawn(async move {
            let mut reader = stderr;
            let mut buf = Vec::new();
            if let Err(e) = reader.read_to_end(&mut buf).await {
                debug!(error = %e, "stderr capture ended early");
            }
            String::from_utf8_lossy(&buf).into_owned()
        });

        let mut state = ExecutionState::new(invocation_id)
            .with_link_base(agent_link_base(self.credentials.base_url.as_deref()));
        // Split on raw bytes: a line that is not UTF-8 is dropped, not fatal.
        let mut lines = BufReader::new(stdout).split(b'\n');
        let mut last_line: Option<String> = None;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                segment = lines.next_segment() => Some(segment),
            };
            let Some(segment) = next else {
                return Ok(self.interrupt(child, stderr_task, &state).await);
            };
            match segment {
                Ok(Some(bytes)) => {
                    let Some(line) = decode_line(bytes) else {
                        debug!(invocation_id = %invocation_id, "dropping stdout line that is not UTF-8");
                        continue;
                    };
                    if !state.ingest_line(&line, self.sink.as_ref()) {
                        debug!(invocation_id = %invocation_id, "skipping non-protocol output line");
                    }
                    if !line.trim().is_empty() {
                        last_line = Some(line);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(invocation_id = %invocation_id, error = %e, "failed reading subagent stdout");
                    break;
                }
            }
        }
        // Close our end so a child still writing gets EPIPE instead of blocking.
        drop(lines);

        let waited = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            status = child.wait() => Some(status),
        };
        let Some(status) = waited else {
            return Ok(self.interrupt(child, stderr_task, &state).await);
        };
        let status = status.map_err(SubagentError::Wait)?;
        let stderr = stderr_task.await.unwrap_or_default();

        let outcome = resolve_outcome(
            &state,
            &ExitReport {
                code: status.code(),
                stderr: &stderr,
                last_line: last_line.as_deref(),
            },
        );
        let result = outcome.result();
        info!(
            invocation_id = %invocation_id,
            agent_id = %result.agent_id,
            exit_code = status.code(),
            success = result.success,
            tool_calls = state.recorded_tool_calls(),
            "subagent finished"
        );
        Ok(outcome)
    }

    fn child_env(&self) -> Vec<(String, String)> {
        let mut env = Vec::new();
        if let Some(key) = &self.credentials.api_key {
            env.push((API_KEY_ENV.to_string(), key.clone()));
        }
        if let Some(url) = &self.credentials.base_url {
            env.push((BASE_URL_ENV.to_string(), url.clone()));
        }
        env.push((AGENT_ROLE_ENV.to_string(), SUBAGENT_ROLE.to_string()));
        if let Some(parent_id) = &self.parent.agent_id {
            env.push((PARENT_AGENT_ID_ENV.to_string(), parent_id.clone()));
        }
        env
    }

    async fn interrupt(
        &self,
        mut child: Child,
        stderr_task: JoinHandle<String>,
        state: &ExecutionState,
    ) -> AttemptOutcome {
        stderr_task.abort();
        self.terminate(&mut child).await;
        info!(invocation_id = %state.invocation_id(), "subagent interrupted");
        let agent_id = state.agent_id.clone().unwrap_or_default();
        AttemptOutcome::Finished(annotate(SubagentResult::interrupted(agent_id), state))
    }

    /// SIGTERM, then SIGKILL if the child outlives the grace period.
    async fn terminate(&self, child: &mut Child) {
        let pid = child.id();

        #[cfg(unix)]
        {
            if let Some(pid) = pid {
                // SAFETY: pid is a child we spawned and have not reaped yet.
                let ret = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
                if ret != 0 {
                    warn!(pid, "SIGTERM failed, proceeding to SIGKILL");
                }
            }
        }

        match tokio::time::timeout(self.kill_grace, child.wait()).await {
            Ok(Ok(_status)) => debug!(pid, "subagent exited after SIGTERM"),
            _ => {
                debug!(pid, "subagent did not exit after SIGTERM, sending SIGKILL");
                let _ = child.kill().await;
            }
        }
    }
}

impl fmt::Debug for SubagentSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubagentSupervisor")
            .field("launcher", &self.launcher)
            .field("registry", &self.registry)
            .field("permissions", &self.permissions)
            .field("parent", &self.parent)
            .field("credentials", &self.credentials)
            .field("kill_grace", &self.kill_grace)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Outcome resolution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum AttemptOutcome {
    Finished(SubagentResult),
    /// The backend refused the model's provider; eligible for one retry.
    ProviderRejected(SubagentResult),
}

impl AttemptOutcome {
    fn result(&self) -> &SubagentResult {
        match self {
            Self::Finished(r) | Self::ProviderRejected(r) => r,
        }
    }
}

/// UTF-8 text of one stdout segment without its line terminator.
fn decode_line(mut bytes: Vec<u8>) -> Option<String> {
    if bytes.last() == Some(&b'\r') {
        bytes.pop();
    }
    String::from_utf8(bytes).ok()
}

/// What the supervisor knows once the child has exited.
#[derive(Debug, Clone, Copy)]
struct ExitReport<'a> {
    /// `None` when the child was killed by a signal.
    code: Option<i32>,
    stderr: &'a str,
    /// Last non-empty stdout line.
    last_line: Option<&'a str>,
}

fn resolve_outcome(state: &ExecutionState, exit: &ExitReport<'_>) -> AttemptOutcome {
    let agent_id = state.agent_id.clone().unwrap_or_default();

    if exit.code != Some(0) {
        if let Some(error) = &state.final_error {
            return AttemptOutcome::Finished(stream_failure(agent_id, error, state));
        }
        let stderr = exit.stderr.trim();
        let message = if !stderr.is_empty() {
            stderr.to_string()
        } else if let Some(code) = exit.code {
            format!("Subagent exited with code {code}")
        } else {
            "Subagent terminated by signal".to_string()
        };
        let result = annotate(SubagentResult::failure(agent_id, message), state);
        return if UNSUPPORTED_PROVIDER.is_match(stderr) {
            AttemptOutcome::ProviderRejected(result)
        } else {
            AttemptOutcome::Finished(result)
        };
    }

    if let Some(error) = &state.final_error {
        return AttemptOutcome::Finished(stream_failure(agent_id, error, state));
    }

    if let Some(streamed) = &state.final_result {
        let report = match exit.last_line.map(ResultEvent::parse_line) {
            Some(Ok(fallback)) if !fallback.is_error => choose_report(streamed, &fallback.text)
                .pick(streamed, &fallback.text)
                .to_string(),
            _ => streamed.clone(),
        };
        return AttemptOutcome::Finished(annotate(SubagentResult::success(agent_id, report), state));
    }

    let parsed = exit
        .last_line
        .ok_or_else(|| SubagentError::FallbackParse("subagent produced no output".to_string()))
        .and_then(ResultEvent::parse_line);
    let result = match parsed {
        Ok(fallback) => {
            let agent_id = state
                .agent_id
                .clone()
                .or_else(|| fallback.agent_id.clone())
                .unwrap_or_default();
            let mut result = if fallback.is_error {
                SubagentResult::failure(agent_id, fallback.text)
            } else {
                SubagentResult::success(agent_id, fallback.text)
            };
            result.total_tokens = fallback.total_tokens;
            result.duration_ms = fallback.duration_ms;
            result.conversation_id = fallback.conversation_id;
            annotate(result, state)
        }
        Err(e) => annotate(SubagentResult::failure(agent_id, e.to_string()), state),
    };
    AttemptOutcome::Finished(result)
}

/// Failure carrying the stream's error. Any streamed report is kept.
fn stream_failure(agent_id: String, error: &str, state: &ExecutionState) -> SubagentResult {
    let mut result = SubagentResult::failure(agent_id, error);
    if let Some(streamed) = &state.final_result {
        result.report = streamed.clone();
    }
    annotate(result, state)
}

/// Copy what the stream told us about the child onto a result, keeping any
/// field the result already carries.
fn annotate(mut result: SubagentResult, state: &ExecutionState) -> SubagentResult {
    result.conversation_id = result.conversation_id.or_else(|| state.conversation_id.clone());
    result.agent_url = result.agent_url.or_else(|| state.agent_url.clone());
    result.model = result.model.or_else(|| state.model.clone());
    result.total_tokens = result.total_tokens.or(state.stats.total_tokens);
    result.duration_ms = result.duration_ms.or(state.stats.duration_ms);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_from(lines: &[&str]) -> ExecutionState {
        let mut state = ExecutionState::new(Uuid::new_v4());
        for line in lines {
            state.ingest_line(line, &NoopActivitySink);
        }
        state
    }

    fn exit<'a>(code: Option<i32>, stderr: &'a str, last_line: Option<&'a str>) -> ExitReport<'a> {
        ExitReport {
            code,
            stderr,
            last_line,
        }
    }

    fn finished(outcome: AttemptOutcome) -> SubagentResult {
        match outcome {
            AttemptOutcome::Finished(r) => r,
            other => panic!("expected a finished outcome, got {other:?}"),
        }
    }

    #[test]
    fn streamed_result_wins_on_clean_exit() {
        let result_line = r#"{"type":"result","result":"All tests pass.","usage":{"total_tokens":90},"duration_ms":400}"#;
        let state = state_from(&[
            r#"{"type":"init","agent_id":"agent-1","conversation_id":"conv-1","model":"openai/gpt-5"}"#,
            result_line,
        ]);
        let r = finished(resolve_outcome(&state, &exit(Some(0), "", Some(result_line))));
        assert!(r.success);
        assert_eq!(r.report, "All tests pass.");
        assert_eq!(r.agent_id, "agent-1");
        assert_eq!(r.conversation_id.as_deref(), Some("conv-1"));
        assert_eq!(r.model.as_deref(), Some("openai/gpt-5"));
        assert_eq!(r.total_tokens, Some(90));
        assert_eq!(r.duration_ms, Some(400));
    }

    #[test]
    fn substantive_fallback_line_overrides_stream() {
        let state = state_from(&[r#"{"type":"result","result":"Working on it"}"#]);
        let fallback = r#"{"type":"result","result":"Root cause: the retry loop never resets its counter."}"#;
        let r = finished(resolve_outcome(&state, &exit(Some(0), "", Some(fallback))));
        assert_eq!(r.report, "Root cause: the retry loop never resets its counter.");
    }

    #[test]
    fn header_fallback_line_keeps_stream() {
        let long = "x".repeat(800);
        let line = format!(r#"{{"type":"result","result":"{long}"}}"#);
        let state = state_from(&[line.as_str()]);
        let fallback = r###"{"type":"result","result":"## Next steps"}"###;
        let r = finished(resolve_outcome(&state, &exit(Some(0), "", Some(fallback))));
        assert_eq!(r.report, long);
    }

    #[test]
    fn decode_line_strips_carriage_return_and_rejects_invalid_utf8() {
        assert_eq!(decode_line(b"{\"type\":\"init\"}\r".to_vec()).as_deref(), Some("{\"type\":\"init\"}"));
        assert_eq!(decode_line(Vec::new()).as_deref(), Some(""));
        assert_eq!(decode_line(b"tool output \xff\xfe".to_vec()), None);
    }

    #[test]
    fn stream_error_beats_clean_exit() {
        let state = state_from(&[
            r#"{"type":"result","result":"partial"}"#,
            r#"{"type":"error","error":"context window exceeded"}"#,
        ]);
        let r = finished(resolve_outcome(&state, &exit(Some(0), "", None)));
        assert!(!r.success);
        assert_eq!(r.error.as_deref(), Some("context window exceeded"));
        assert_eq!(r.report, "partial");
    }

    #[test]
    fn unparsable_last_line_is_a_parse_failure() {
        let state = state_from(&["booting..."]);
        let r = finished(resolve_outcome(&state, &exit(Some(0), "", Some("booting..."))));
        assert!(!r.success);
        assert!(r.error.unwrap().starts_with("Failed to parse subagent output:"));

        let empty = state_from(&[]);
        let r = finished(resolve_outcome(&empty, &exit(Some(0), "", None)));
        assert!(r.error.unwrap().starts_with("Failed to parse subagent output:"));
    }

    #[test]
    fn non_zero_exit_messages() {
        let state = state_from(&[]);
        let r = finished(resolve_outcome(&state, &exit(Some(2), "  boom\n", None)));
        assert_eq!(r.error.as_deref(), Some("boom"));

        let r = finished(resolve_outcome(&state, &exit(Some(3), "", None)));
        assert_eq!(r.error.as_deref(), Some("Subagent exited with code 3"));

        let r = finished(resolve_outcome(&state, &exit(None, "", None)));
        assert_eq!(r.error.as_deref(), Some("Subagent terminated by signal"));

        let errored = state_from(&[r#"{"type":"error","message":"auth failed"}"#]);
        let r = finished(resolve_outcome(&errored, &exit(Some(1), "Provider x is not supported", None)));
        assert_eq!(r.error.as_deref(), Some("auth failed"));
    }

    #[test]
    fn provider_rejection_is_flagged() {
        let state = state_from(&[]);
        for stderr in [
            "Error: Provider bring-your-own-zai is not supported for this account",
            "unsupported provider: minimax",
        ] {
            match resolve_outcome(&state, &exit(Some(1), stderr, None)) {
                AttemptOutcome::ProviderRejected(r) => assert_eq!(r.error.as_deref(), Some(stderr)),
                other => panic!("expected provider rejection for {stderr:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn child_env_carries_credentials_and_role() {
        let supervisor = SubagentSupervisor::new(
            LaunchCommand::new("brood"),
            Arc::new(SubagentTypeRegistry::with_builtins()),
        )
        .with_credentials(Credentials {
            api_key: Some("sk-test".into()),
            base_url: None,
        })
        .with_parent(ParentContext {
            agent_id: Some("agent-parent".into()),
            model: None,
        });

        let env = supervisor.child_env();
        assert!(env.contains(&(API_KEY_ENV.to_string(), "sk-test".to_string())));
        assert!(env.contains(&(AGENT_ROLE_ENV.to_string(), SUBAGENT_ROLE.to_string())));
        assert!(env.contains(&(PARENT_AGENT_ID_ENV.to_string(), "agent-parent".to_string())));
        assert!(!env.iter().any(|(k, _)| k == BASE_URL_ENV));
    }

    #[test]
    fn debug_redacts_api_key() {
        let supervisor = SubagentSupervisor::new(
            LaunchCommand::new("brood"),
            Arc::new(SubagentTypeRegistry::new()),
        )
        .with_credentials(Credentials {
            api_key: Some("sk-secret".into()),
            base_url: None,
        });
        assert!(!format!("{supervisor:?}").contains("sk-secret"));
    }
}
