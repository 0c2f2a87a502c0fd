//! `brood run` and `brood fanout`: launch subagents and print their results
//! as JSON on stdout.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use brood_core::subagent::{
    LauncherInputs, StaticModelCatalog, SubagentRequest, SubagentResult, SubagentSupervisor,
    TracingActivitySink, launch_all, resolve_launcher,
};

use crate::config::BroodConfig;

/// Build a supervisor from resolved configuration.
pub fn build_supervisor(config: BroodConfig) -> SubagentSupervisor {
    let launcher = resolve_launcher(&LauncherInputs::from_env());
    tracing::debug!(command = %launcher.command, base_args = ?launcher.base_args, "resolved subagent launcher");

    SubagentSupervisor::new(launcher, Arc::new(config.registry))
        .with_catalog(Arc::new(StaticModelCatalog::new(config.available_models)))
        .with_permissions(config.permissions)
        .with_parent(config.parent)
        .with_credentials(config.credentials)
        .with_activity_sink(Arc::new(TracingActivitySink))
}

/// Run one subagent. Returns whether it succeeded.
pub async fn run_one(supervisor: &SubagentSupervisor, request: SubagentRequest) -> Result<bool> {
    let cancel = cancel_on_ctrl_c();
    let result = supervisor.launch(&request, Some(cancel)).await;
    print_json(&result)?;
    Ok(result.success)
}

/// Run several subagents in parallel. Returns whether all succeeded.
pub async fn run_fanout(
    supervisor: &SubagentSupervisor,
    requests: Vec<SubagentRequest>,
    max_agents: usize,
) -> Result<bool> {
    let cancel = cancel_on_ctrl_c();
    let results: Vec<SubagentResult> = launch_all(supervisor, requests, max_agents, cancel).await;
    print_json(&results)?;
    Ok(results.iter().all(|r| r.success))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to serialize result")?;
    println!("{json}");
    Ok(())
}

/// First Ctrl+C cancels running subagents, second force-exits.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    let got_first_signal = Arc::new(AtomicBool::new(false));

    tokio::spawn(async move {
        loop {
            tokio::signal::ctrl_c().await.ok();
            if got_first_signal.swap(true, Ordering::SeqCst) {
                eprintln!("\nForce exit.");
                std::process::exit(130);
            }
            eprintln!("\nInterrupting subagents (Ctrl+C again to force)...");
            cancel_clone.cancel();
        }
    });

    cancel
}
