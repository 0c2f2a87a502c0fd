//! Integration tests for launching many subagents at once.

#![cfg(unix)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use brood_core::subagent::{
    LaunchCommand, SubagentRequest, SubagentSupervisor, SubagentTypeRegistry, launch_all,
};
use brood_test_utils::{FakeSubagent, fake_subagent, sh_quote};
use tokio_util::sync::CancellationToken;

fn supervisor_for(fake: &FakeSubagent) -> SubagentSupervisor {
    let (command, base_args) = fake.command();
    SubagentSupervisor::new(
        LaunchCommand { command, base_args },
        Arc::new(SubagentTypeRegistry::with_builtins()),
    )
    .with_kill_grace(Duration::from_millis(500))
}

/// Echoes the prompt back as the report. The prompt "slow" finishes last.
const ECHO_PROMPT: &str = r#"
while [ $# -gt 0 ]; do
  if [ "$1" = "-p" ]; then prompt="$2"; fi
  shift
done
if [ "$prompt" = "slow" ]; then sleep 1; fi
printf '{"type":"result","result":"echo: %s"}\n' "$prompt"
"#;

#[tokio::test]
async fn results_come_back_in_input_order() {
    let fake = fake_subagent(ECHO_PROMPT);
    let prompts = ["slow", "alpha", "beta", "gamma"];
    let requests = prompts
        .iter()
        .map(|p| SubagentRequest::new("general-purpose", *p))
        .collect();

    let results = launch_all(&supervisor_for(&fake), requests, 2, CancellationToken::new()).await;

    assert_eq!(results.len(), prompts.len());
    for (result, prompt) in results.iter().zip(prompts) {
        assert!(result.success, "unexpected failure: {:?}", result.error);
        assert_eq!(result.report, format!("echo: {prompt}"));
    }
}

#[tokio::test]
async fn concurrency_limit_is_respected() {
    let fake = FakeSubagent::new();
    let log = fake.scratch("log");
    let log = sh_quote(&log.to_string_lossy());
    fake.write(&format!(
        "echo start >> {log}\nsleep 0.3\necho end >> {log}\n\
         printf '%s\\n' '{{\"type\":\"result\",\"result\":\"ok\"}}'"
    ));

    let requests = (0..4)
        .map(|n| SubagentRequest::new("general-purpose", format!("task {n}")))
        .collect();
    let results = launch_all(&supervisor_for(&fake), requests, 1, CancellationToken::new()).await;
    assert!(results.iter().all(|r| r.success));

    // With one slot, runs never overlap: the log strictly alternates.
    let contents = std::fs::read_to_string(fake.scratch("log")).unwrap();
    let entries: Vec<&str> = contents.lines().collect();
    assert_eq!(entries.len(), 8);
    for pair in entries.chunks(2) {
        assert_eq!(pair, ["start", "end"]);
    }
}

#[tokio::test]
async fn zero_concurrency_still_runs_everything() {
    let fake = fake_subagent(ECHO_PROMPT);
    let requests = vec![SubagentRequest::new("general-purpose", "solo")];
    let results = launch_all(&supervisor_for(&fake), requests, 0, CancellationToken::new()).await;
    assert_eq!(results[0].report, "echo: solo");
}

#[tokio::test]
async fn parent_cancellation_interrupts_every_launch() {
    let fake = fake_subagent("exec sleep 30");
    let requests = (0..3)
        .map(|n| SubagentRequest::new("general-purpose", format!("task {n}")))
        .collect();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let results = launch_all(&supervisor_for(&fake), requests, 1, cancel).await;

    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.is_interrupted()), "got {results:?}");
    assert!(started.elapsed() < Duration::from_secs(10));
}
