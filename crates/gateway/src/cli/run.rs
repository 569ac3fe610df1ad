//! One-shot commands: `run`, `status` and `recover`.
//!
//! Each boots the orchestrator against the configured checkpoint log,
//! does its work in the foreground and exits.

use std::sync::Arc;

use sy_engine::{Orchestrator, TurnRequest, TurnStatus};

/// Execute a single turn and print the response (or the outcome as JSON).
///
/// Exits non-zero when the turn is rejected or fails.
pub async fn run(
    orch: Arc<Orchestrator>,
    query: String,
    thread: Option<String>,
    org: Option<String>,
    json_output: bool,
) -> anyhow::Result<()> {
    let mut request = TurnRequest::new(query);
    if let Some(thread) = thread {
        request = request.thread(thread);
    }
    if let Some(org) = org {
        request = request.org(org);
    }

    let outcome = match orch.submit(request).await {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    if json_output {
        let json = serde_json::to_string_pretty(&outcome)
            .map_err(|e| anyhow::anyhow!("serializing outcome: {e}"))?;
        println!("{json}");
    }

    let exit_code = match &outcome.status {
        TurnStatus::Completed { response } => {
            if !json_output {
                println!("{response}");
            }
            0
        }
        TurnStatus::Processing { reason } => {
            eprintln!(
                "thread {} left for recovery: {reason}",
                outcome.thread_id
            );
            2
        }
        TurnStatus::Failed { reason } => {
            eprintln!("thread {} failed: {reason}", outcome.thread_id);
            1
        }
    };

    // Let the fire-and-forget usage write land before the runtime stops.
    tokio::task::yield_now().await;

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

/// Print `thread_status` as JSON.
pub fn status(orch: &Orchestrator, thread_id: &str) -> anyhow::Result<()> {
    match orch.thread_status(thread_id)? {
        Some(view) => {
            let json = serde_json::to_string_pretty(&view)
                .map_err(|e| anyhow::anyhow!("serializing thread status: {e}"))?;
            println!("{json}");
            Ok(())
        }
        None => {
            eprintln!("thread {thread_id} not found");
            std::process::exit(1);
        }
    }
}

/// Run one recovery pass and print the report.
pub async fn recover(orch: &Orchestrator) -> anyhow::Result<()> {
    let report = orch.recover_now().await;
    let json = serde_json::to_string_pretty(&report)
        .map_err(|e| anyhow::anyhow!("serializing recovery report: {e}"))?;
    println!("{json}");
    Ok(())
}
