//! Single-task execution under supervision.
//!
//! Each worker run installs a timeout, a heartbeat, and a stall detector on
//! top of the invoker call, registers the worker in the agent registry, and
//! normalizes every outcome into a `WorkerResult`. Transient failures get
//! exactly one automatic re-run.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::{AssistantClient, InvokeError, InvokeRequest};
use crate::config::RumpbotConfig;
use crate::events::{InvocationSink, StatusEmitter};
use crate::invocations::record_from_response;
use crate::registry::AgentRegistry;
use crate::types::{Tier, WorkerResult, WorkerTask};

/// Result texts matching any of these re-run the worker once.
const TRANSIENT_PATTERNS: &[&str] = &[
    "rate limit",
    "429",
    "timed out",
    "timeout",
    "econnreset",
    "econnrefused",
    "socket hang up",
    "network error",
    "overloaded",
    "503",
    "502",
];

pub fn is_transient(text: &str) -> bool {
    let lower = text.to_lowercase();
    TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Why the worker's cancellation token fired, when we fired it ourselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CancelCause {
    Timeout,
    Stalled,
}

/// Everything a worker run needs from its orchestrator.
pub(super) struct WorkerEnv<'a> {
    pub client: &'a Arc<dyn AssistantClient>,
    pub registry: &'a Arc<AgentRegistry>,
    pub config: &'a Arc<RumpbotConfig>,
    pub chat_id: &'a str,
    pub orchestrator_id: u64,
    pub cwd: &'a Path,
    pub status: &'a StatusEmitter,
    pub invocations: &'a InvocationSink,
}

/// A finished worker run plus the cost of every attempt it took.
pub(super) struct WorkerOutcome {
    pub result: WorkerResult,
    pub attempts_cost: f64,
}

/// Run a worker, retrying once on a transient failure. The retry runs under
/// a new task id (`<id>-retry`) and its result replaces the first.
pub(super) async fn run_with_retry(
    env: &WorkerEnv<'_>,
    task: &WorkerTask,
    worker_number: usize,
    prompt: String,
    parent_cancel: &CancellationToken,
) -> WorkerOutcome {
    let first = run_supervised(env, task, worker_number, prompt.clone(), parent_cancel).await;
    let mut attempts_cost = first.cost_usd.unwrap_or(0.0);

    if first.success || parent_cancel.is_cancelled() || !is_transient(&first.result) {
        return WorkerOutcome {
            result: first,
            attempts_cost,
        };
    }

    env.status.status(format!(
        "Worker {} hit a transient error, retrying in {}s",
        task.id,
        env.config.retry_backoff().as_secs()
    ));
    tokio::time::sleep(env.config.retry_backoff()).await;

    let mut retry_task = task.clone();
    retry_task.id = format!("{}-retry", task.id);
    let second = run_supervised(env, &retry_task, worker_number, prompt, parent_cancel).await;
    attempts_cost += second.cost_usd.unwrap_or(0.0);

    WorkerOutcome {
        result: second,
        attempts_cost,
    }
}

/// Run a single worker attempt with full supervision.
pub(super) async fn run_supervised(
    env: &WorkerEnv<'_>,
    task: &WorkerTask,
    worker_number: usize,
    prompt: String,
    parent_cancel: &CancellationToken,
) -> WorkerResult {
    let agent_id = env.registry.register_worker(
        env.chat_id,
        env.orchestrator_id,
        worker_number,
        &task.description,
        &task.prompt,
    );
    let token = parent_cancel.child_token();
    env.registry.set_cancel_handle(agent_id, token.clone());

    let cause: Arc<Mutex<Option<CancelCause>>> = Arc::new(Mutex::new(None));
    let last_activity = Arc::new(AtomicU64::new(0));
    let started = Instant::now();

    let registry = env.registry.clone();
    let activity_clock = last_activity.clone();
    let activity_start = started;
    let on_activity = Arc::new(move || {
        activity_clock.store(activity_start.elapsed().as_millis() as u64, Ordering::Relaxed);
        registry.touch(agent_id);
    });
    let registry = env.registry.clone();
    let on_output = Arc::new(move |chunk: &str| {
        registry.append_output(agent_id, chunk);
    });

    let heartbeat = spawn_heartbeat(env, agent_id, task.description.clone(), started, &token);
    let stall = spawn_stall_detector(
        env,
        task.id.clone(),
        started,
        last_activity,
        cause.clone(),
        &token,
    );
    let timeout_guard = spawn_timeout(env, cause.clone(), &token);

    let tier = env.config.tier(Tier::Worker);
    let mut request = InvokeRequest::new(prompt, Tier::Worker);
    request.max_turns = tier.max_turns;
    request.model = tier.model.clone();
    request.timeout = tier.timeout();
    request.cwd = Some(env.cwd.to_path_buf());
    request.cancel = token.clone();
    request.on_activity = Some(on_activity);
    request.on_output = Some(on_output);

    let outcome = env.client.invoke(request).await;
    let wall_ms = started.elapsed().as_millis() as u64;

    heartbeat.abort();
    stall.abort();
    timeout_guard.abort();
    env.registry.remove_cancel_handle(agent_id);

    let result = match outcome {
        Ok(response) => {
            env.invocations.record(record_from_response(
                env.chat_id,
                Tier::Worker,
                &response,
                wall_ms,
            ));
            WorkerResult {
                task_id: task.id.clone(),
                success: !response.is_error,
                result: response.text,
                cost_usd: response.cost_usd,
                duration_ms: response.duration_ms.unwrap_or(wall_ms),
            }
        }
        Err(InvokeError::Cancelled) => {
            let text = match *cause.lock().expect("cause lock poisoned") {
                Some(CancelCause::Timeout) => "timed out".to_string(),
                Some(CancelCause::Stalled) => {
                    format!("timed out (no output for {}s)", env.config.stall_kill().as_secs())
                }
                None => "killed by user".to_string(),
            };
            debug!(task = %task.id, %text, "worker cancelled");
            WorkerResult {
                task_id: task.id.clone(),
                success: false,
                result: text,
                cost_usd: None,
                duration_ms: wall_ms,
            }
        }
        Err(InvokeError::Timeout(_)) => WorkerResult {
            task_id: task.id.clone(),
            success: false,
            result: "timed out".to_string(),
            cost_usd: None,
            duration_ms: wall_ms,
        },
        Err(e) => {
            warn!(task = %task.id, error = %e, "worker call failed");
            WorkerResult {
                task_id: task.id.clone(),
                success: false,
                result: format!("worker error: {e}"),
                cost_usd: None,
                duration_ms: wall_ms,
            }
        }
    };

    env.registry.complete(agent_id, result.success, result.cost_usd);
    env.status.worker_complete(
        format!(
            "Worker #{worker_number} ({}) {}",
            task.description,
            if result.success { "finished" } else { "failed" }
        ),
        format!("#{worker_number}"),
    );
    result
}

fn spawn_heartbeat(
    env: &WorkerEnv<'_>,
    agent_id: u64,
    description: String,
    started: Instant,
    token: &CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let registry = env.registry.clone();
    let status = env.status.clone();
    let interval = env.config.heartbeat_interval();
    let token = token.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            registry.touch(agent_id);
            let minutes = started.elapsed().as_secs() / 60;
            status.status(format!("{description}: still running ({minutes}m elapsed)"));
        }
    })
}

fn spawn_stall_detector(
    env: &WorkerEnv<'_>,
    task_id: String,
    started: Instant,
    last_activity: Arc<AtomicU64>,
    cause: Arc<Mutex<Option<CancelCause>>>,
    token: &CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let status = env.status.clone();
    let check_interval = env.config.stall_check_interval();
    let warn_after = env.config.stall_warning();
    let kill_after = env.config.stall_kill();
    let token = token.clone();
    tokio::spawn(async move {
        let mut warned = false;
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(check_interval) => {}
            }
            let last_ms = last_activity.load(Ordering::Relaxed);
            let idle = started.elapsed().saturating_sub(std::time::Duration::from_millis(last_ms));
            if idle >= kill_after {
                status.important(format!(
                    "Worker {task_id} produced no output for {}s, killing it",
                    idle.as_secs()
                ));
                *cause.lock().expect("cause lock poisoned") = Some(CancelCause::Stalled);
                token.cancel();
                break;
            }
            if idle >= warn_after {
                if !warned {
                    status.status(format!(
                        "Worker {task_id} has produced no output for {}s",
                        idle.as_secs()
                    ));
                    warned = true;
                }
            } else {
                // Activity resumed; re-arm the warning.
                warned = false;
            }
        }
    })
}

fn spawn_timeout(
    env: &WorkerEnv<'_>,
    cause: Arc<Mutex<Option<CancelCause>>>,
    token: &CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let timeout = env.config.worker_timeout();
    let token = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(timeout) => {
                *cause.lock().expect("cause lock poisoned") = Some(CancelCause::Timeout);
                token.cancel();
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_patterns_case_insensitive() {
        assert!(is_transient("Error: Rate Limit exceeded"));
        assert!(is_transient("got a 429 back"));
        assert!(is_transient("request TIMED OUT"));
        assert!(is_transient("ECONNRESET while reading"));
        assert!(is_transient("upstream 503"));
        assert!(!is_transient("assertion failed in tests"));
        assert!(!is_transient("killed by user"));
    }
}
