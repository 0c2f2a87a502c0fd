//! Parallel launches with a concurrency cap.

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::supervisor::SubagentSupervisor;
use super::types::{SubagentRequest, SubagentResult};

/// Launch every request, at most `max_concurrency` at a time.
///
/// Results come back in input order. Each launch gets a child of `cancel`;
/// cancelling the parent interrupts running children and stops queued ones
/// from ever spawning.
pub async fn launch_all(
    supervisor: &SubagentSupervisor,
    requests: Vec<SubagentRequest>,
    max_concurrency: usize,
    cancel: CancellationToken,
) -> Vec<SubagentResult> {
    let limit = max_concurrency.max(1);
    let semaphore = Semaphore::new(limit);
    info!(count = requests.len(), max_concurrency = limit, "launching subagents");

    let launches = requests.iter().enumerate().map(|(index, request)| {
        let semaphore = &semaphore;
        let cancel = cancel.child_token();
        async move {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = semaphore.acquire() => Some(permit),
            };
            let _permit = match permit {
                None => return SubagentResult::interrupted(""),
                Some(Ok(permit)) => permit,
                Some(Err(e)) => {
                    warn!(index, error = %e, "failed to acquire launch slot");
                    return SubagentResult::failure("", format!("Failed to acquire launch slot: {e}"));
                }
            };
            supervisor.launch(request, Some(cancel)).await
        }
    });

    let results = join_all(launches).await;
    let failed = results.iter().filter(|r| !r.success).count();
    info!(count = results.len(), failed, "subagents finished");
    results
}
