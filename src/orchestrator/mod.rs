//! The orchestration engine: plan, execute, summarize.

pub mod context;
pub mod plan;
pub mod prompts;
pub mod scheduler;
mod worker;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::client::{AssistantClient, InvokeError, InvokeRequest};
use crate::config::RumpbotConfig;
use crate::events::{InvocationSink, StatusEmitter};
use crate::invocations::record_from_response;
use crate::registry::{AgentPhase, AgentRegistry, RetryRequest};
use crate::types::{OrchestratorSummary, Plan, Tier, WorkRequest, WorkerResult};

use scheduler::WorkerScheduler;
use worker::WorkerEnv;

pub use worker::is_transient;

/// One orchestration run's input.
pub struct ExecuteRequest {
    pub chat_id: String,
    pub request: WorkRequest,
    pub cwd: PathBuf,
    pub cancel: CancellationToken,
}

/// What happened during the execution phase, for the summary.
#[derive(Default)]
struct ExecutionReport {
    results: Vec<WorkerResult>,
    workers_cost: f64,
    skipped: usize,
    deadlocked: Vec<String>,
    timed_out: bool,
}

/// Plans a work request, supervises the workers, and reports back.
pub struct Orchestrator {
    client: Arc<dyn AssistantClient>,
    registry: Arc<AgentRegistry>,
    config: Arc<RumpbotConfig>,
}

impl Orchestrator {
    pub fn new(
        client: Arc<dyn AssistantClient>,
        registry: Arc<AgentRegistry>,
        config: Arc<RumpbotConfig>,
    ) -> Self {
        Orchestrator {
            client,
            registry,
            config,
        }
    }

    /// Run the full plan → execute → summarize lifecycle. Always returns a
    /// summary; every failure mode is folded into it.
    pub async fn execute(
        &self,
        exec: ExecuteRequest,
        status: &StatusEmitter,
        invocations: &InvocationSink,
    ) -> OrchestratorSummary {
        let orchestrator_id = self
            .registry
            .register_orchestrator(&exec.chat_id, &exec.request.task);
        let (retry_tx, retry_rx) = mpsc::unbounded_channel();
        self.registry.set_retry_channel(orchestrator_id, retry_tx);

        let summary = self
            .run(orchestrator_id, &exec, status, invocations, retry_rx)
            .await;

        self.registry.complete(
            orchestrator_id,
            summary.overall_success,
            Some(summary.total_cost_usd),
        );
        summary
    }

    async fn run(
        &self,
        orchestrator_id: u64,
        exec: &ExecuteRequest,
        status: &StatusEmitter,
        invocations: &InvocationSink,
        retry_rx: mpsc::UnboundedReceiver<RetryRequest>,
    ) -> OrchestratorSummary {
        let mut total_cost = 0.0;

        // The orchestration timeout is its own cancellation channel layered
        // under the external token; the summary phase deliberately runs with
        // the external token only.
        let orch_token = exec.cancel.child_token();
        let timed_out_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let timeout_task = {
            let token = orch_token.clone();
            let flag = timed_out_flag.clone();
            let limit = self.config.orchestration_timeout();
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(limit) => {
                        flag.store(true, std::sync::atomic::Ordering::SeqCst);
                        token.cancel();
                    }
                }
            })
        };

        status.status("Planning the work...");
        let plan = match self
            .plan_phase(exec, &orch_token, invocations, &mut total_cost)
            .await
        {
            Ok(plan) => plan,
            Err(PlanFailure::Cancelled) => {
                timeout_task.abort();
                return OrchestratorSummary {
                    overall_success: false,
                    summary: "Cancelled before planning finished.".to_string(),
                    worker_results: Vec::new(),
                    total_cost_usd: total_cost,
                    needs_restart: false,
                };
            }
            Err(PlanFailure::Failed(reason)) => {
                timeout_task.abort();
                warn!(chat_id = %exec.chat_id, %reason, "planning failed");
                return OrchestratorSummary {
                    overall_success: false,
                    summary: format!("Planning failed: {reason}"),
                    worker_results: Vec::new(),
                    total_cost_usd: total_cost,
                    needs_restart: false,
                };
            }
        };

        info!(
            chat_id = %exec.chat_id,
            workers = plan.workers.len(),
            sequential = plan.sequential,
            "plan ready"
        );
        status.plan_breakdown(prompts::plan_breakdown_message(&plan));
        self.registry.set_phase(orchestrator_id, AgentPhase::Executing);

        let env = WorkerEnv {
            client: &self.client,
            registry: &self.registry,
            config: &self.config,
            chat_id: &exec.chat_id,
            orchestrator_id,
            cwd: &exec.cwd,
            status,
            invocations,
        };

        let mut report = if plan.sequential {
            self.run_sequential(&env, exec, &plan, &orch_token, retry_rx)
                .await
        } else {
            self.run_parallel(&env, exec, &plan, &orch_token, retry_rx)
                .await
        };
        report.timed_out = timed_out_flag.load(std::sync::atomic::Ordering::SeqCst);
        timeout_task.abort();
        total_cost += report.workers_cost;

        self.registry
            .set_phase(orchestrator_id, AgentPhase::Summarizing);
        let notices = build_notices(&report);
        let (summary_text, explicit_restart) = self
            .summary_phase(exec, &report.results, &notices, invocations, &mut total_cost)
            .await;

        let ran_any = !report.results.is_empty();
        let all_succeeded = report.results.iter().all(|r| r.success);
        let overall_success =
            ran_any && all_succeeded && report.deadlocked.is_empty() && !report.timed_out;

        let needs_restart = derive_needs_restart(
            explicit_restart,
            &plan.summary,
            &exec.request.task,
            &report.results,
            &self.config.service_tokens,
        );

        OrchestratorSummary {
            overall_success,
            summary: summary_text,
            worker_results: report.results,
            total_cost_usd: total_cost,
            needs_restart,
        }
    }

    async fn plan_phase(
        &self,
        exec: &ExecuteRequest,
        cancel: &CancellationToken,
        invocations: &InvocationSink,
        total_cost: &mut f64,
    ) -> Result<Plan, PlanFailure> {
        let tier = self.config.tier(Tier::Orchestrator);
        let mut request = InvokeRequest::new(
            prompts::build_planning_input(&exec.request, &exec.cwd),
            Tier::Orchestrator,
        );
        request.system_prompt = Some(prompts::PLANNING_SYSTEM_PROMPT.to_string());
        request.max_turns = 1;
        request.model = tier.model.clone();
        request.timeout = tier.timeout();
        // Planning needs no tools: an empty allow-list disables them all.
        request.allowed_tools = Some(String::new());
        request.cwd = Some(exec.cwd.clone());
        request.cancel = cancel.clone();

        let started = Instant::now();
        match self.client.invoke(request).await {
            Ok(response) => {
                let wall_ms = started.elapsed().as_millis() as u64;
                invocations.record(record_from_response(
                    &exec.chat_id,
                    Tier::Orchestrator,
                    &response,
                    wall_ms,
                ));
                *total_cost += response.cost_usd.unwrap_or(0.0);
                if response.is_error {
                    return Err(PlanFailure::Failed(response.text));
                }
                plan::parse_plan(&response.text, self.config.max_workers)
                    .map_err(PlanFailure::Failed)
            }
            Err(InvokeError::Cancelled) => Err(PlanFailure::Cancelled),
            Err(e) => Err(PlanFailure::Failed(e.to_string())),
        }
    }

    async fn run_sequential(
        &self,
        env: &WorkerEnv<'_>,
        exec: &ExecuteRequest,
        plan: &Plan,
        orch_token: &CancellationToken,
        mut retry_rx: mpsc::UnboundedReceiver<RetryRequest>,
    ) -> ExecutionReport {
        let overview = context::plan_overview(&exec.request.task, plan);
        let total = plan.workers.len();
        let mut report = ExecutionReport::default();

        for (index, task) in plan.workers.iter().enumerate() {
            self.drain_retries(env, plan, &overview, &mut report, &mut retry_rx, orch_token)
                .await;
            if orch_token.is_cancelled() {
                report.skipped += total - index;
                break;
            }

            let position = index + 1;
            env.status.progress(
                format!("Worker #{position} of {total}: {}", task.description),
                format!("{position}/{total}"),
            );
            env.registry
                .set_progress(env.orchestrator_id, &format!("{position}/{total}"));
            let block = context::sequential_context(
                &overview,
                position,
                total,
                &report.results,
                self.config.max_result_chars,
            );
            let prompt = context::prefix_prompt(&block, &task.prompt);
            let outcome = worker::run_with_retry(env, task, position, prompt, orch_token).await;
            report.workers_cost += outcome.attempts_cost;
            let failed = !outcome.result.success;
            report.results.push(outcome.result);

            if failed {
                let remaining = total - position;
                report.skipped += remaining;
                if remaining > 0 {
                    env.status.important(format!(
                        "Worker {} failed; skipping {remaining} remaining worker(s)",
                        task.id
                    ));
                }
                break;
            }
        }

        self.drain_retries(env, plan, &overview, &mut report, &mut retry_rx, orch_token)
            .await;
        report
    }

    async fn run_parallel(
        &self,
        env: &WorkerEnv<'_>,
        exec: &ExecuteRequest,
        plan: &Plan,
        orch_token: &CancellationToken,
        mut retry_rx: mpsc::UnboundedReceiver<RetryRequest>,
    ) -> ExecutionReport {
        let overview = context::plan_overview(&exec.request.task, plan);
        let total = plan.workers.len();
        let mut scheduler = WorkerScheduler::new(&plan.workers);
        let mut report = ExecutionReport::default();

        loop {
            self.drain_retries(env, plan, &overview, &mut report, &mut retry_rx, orch_token)
                .await;
            if orch_token.is_cancelled() {
                report.skipped += scheduler.pending_ids().len();
                break;
            }

            let ready = scheduler.ready();
            if ready.is_empty() {
                if scheduler.has_pending() {
                    report.deadlocked = scheduler.pending_ids();
                    env.status.important(format!(
                        "Dependency deadlock: workers {:?} can never run",
                        report.deadlocked
                    ));
                }
                break;
            }

            for (_, task) in &ready {
                scheduler.mark_running(&task.id);
            }

            let batch: Vec<_> = ready
                .iter()
                .map(|(position, task)| {
                    let deps: Vec<&WorkerResult> = task
                        .depends_on
                        .iter()
                        .filter_map(|dep| find_result(&report.results, dep))
                        .collect();
                    let block = context::dependency_context(
                        &overview,
                        *position,
                        total,
                        &deps,
                        self.config.max_result_chars,
                    );
                    let prompt = context::prefix_prompt(&block, &task.prompt);
                    (position, task, prompt)
                })
                .collect();

            let outcomes = join_all(batch.into_iter().map(|(position, task, prompt)| {
                worker::run_with_retry(env, task, *position, prompt, orch_token)
            }))
            .await;

            for ((_, task), outcome) in ready.iter().zip(outcomes) {
                report.workers_cost += outcome.attempts_cost;
                let success = outcome.result.success;
                report.results.push(outcome.result);
                env.registry.set_progress(
                    env.orchestrator_id,
                    &format!("{}/{total}", report.results.len()),
                );
                if success {
                    scheduler.mark_completed(&task.id);
                } else {
                    scheduler.mark_failed(&task.id);
                    let skipped = scheduler.skip_dependents_of(&task.id);
                    if !skipped.is_empty() {
                        report.skipped += skipped.len();
                        env.status.important(format!(
                            "Worker {} failed; skipping dependent worker(s) {:?}",
                            task.id, skipped
                        ));
                    }
                }
            }
        }

        report
    }

    /// Re-run externally requested workers (by number) under fresh handles.
    /// Drained at scheduling boundaries so an in-flight batch is never torn.
    async fn drain_retries(
        &self,
        env: &WorkerEnv<'_>,
        plan: &Plan,
        overview: &str,
        report: &mut ExecutionReport,
        retry_rx: &mut mpsc::UnboundedReceiver<RetryRequest>,
        orch_token: &CancellationToken,
    ) {
        while let Ok(RetryRequest { worker_number }) = retry_rx.try_recv() {
            if orch_token.is_cancelled() {
                return;
            }
            let Some(task) = plan.workers.get(worker_number.wrapping_sub(1)) else {
                warn!(worker_number, "retry requested for unknown worker");
                continue;
            };
            let Some(slot) = report
                .results
                .iter()
                .position(|r| r.task_id == task.id || r.task_id == format!("{}-retry", task.id))
            else {
                // Not run yet; nothing to re-run.
                continue;
            };

            env.status
                .important(format!("Re-running worker #{worker_number} ({})", task.id));
            let prompt = {
                let deps: Vec<&WorkerResult> = task
                    .depends_on
                    .iter()
                    .filter_map(|dep| find_result(&report.results, dep))
                    .collect();
                let block = context::dependency_context(
                    overview,
                    worker_number,
                    plan.workers.len(),
                    &deps,
                    self.config.max_result_chars,
                );
                context::prefix_prompt(&block, &task.prompt)
            };
            let result =
                worker::run_supervised(env, task, worker_number, prompt, orch_token).await;
            report.workers_cost += result.cost_usd.unwrap_or(0.0);
            report.results[slot] = result;
        }
    }

    async fn summary_phase(
        &self,
        exec: &ExecuteRequest,
        results: &[WorkerResult],
        notices: &[String],
        invocations: &InvocationSink,
        total_cost: &mut f64,
    ) -> (String, Option<bool>) {
        let tier = self.config.tier(Tier::Orchestrator);
        let mut request = InvokeRequest::new(
            prompts::build_summary_input(
                &exec.request.task,
                results,
                notices,
                *total_cost,
                self.config.max_result_chars,
            ),
            Tier::Orchestrator,
        );
        request.system_prompt = Some(prompts::SUMMARY_SYSTEM_PROMPT.to_string());
        request.max_turns = 1;
        request.model = tier.model.clone();
        request.timeout = Some(self.config.summary_timeout());
        request.allowed_tools = Some(String::new());
        request.cwd = Some(exec.cwd.clone());
        // Best-effort even when the orchestration timed out: only the
        // external token can stop the summary.
        request.cancel = exec.cancel.clone();

        let started = Instant::now();
        match self.client.invoke(request).await {
            Ok(response) => {
                let wall_ms = started.elapsed().as_millis() as u64;
                invocations.record(record_from_response(
                    &exec.chat_id,
                    Tier::Orchestrator,
                    &response,
                    wall_ms,
                ));
                *total_cost += response.cost_usd.unwrap_or(0.0);
                if response.is_error || response.text.trim().is_empty() {
                    (prompts::fallback_summary(results, notices), response.needs_restart)
                } else {
                    (response.text, response.needs_restart)
                }
            }
            Err(e) => {
                warn!(error = %e, "summary call failed, synthesizing");
                (prompts::fallback_summary(results, notices), None)
            }
        }
    }
}

enum PlanFailure {
    Cancelled,
    Failed(String),
}

/// A worker's result, under its original id or its retry id.
fn find_result<'a>(results: &'a [WorkerResult], task_id: &str) -> Option<&'a WorkerResult> {
    results
        .iter()
        .find(|r| r.task_id == task_id || r.task_id == format!("{task_id}-retry"))
}

fn build_notices(report: &ExecutionReport) -> Vec<String> {
    let mut notices = Vec::new();
    if report.timed_out {
        notices.push("The orchestration hit its time limit; remaining work was cancelled.".into());
    }
    if report.skipped > 0 {
        notices.push(format!(
            "Fail-fast skipped {} worker(s) after an earlier failure.",
            report.skipped
        ));
    }
    if !report.deadlocked.is_empty() {
        notices.push(format!(
            "Workers {:?} never ran: their dependencies can not be satisfied.",
            report.deadlocked
        ));
    }
    notices
}

/// True when the assistant said so, or when the combined text mentions a
/// restart together with a known service token.
fn derive_needs_restart(
    explicit: Option<bool>,
    plan_summary: &str,
    task: &str,
    results: &[WorkerResult],
    service_tokens: &[String],
) -> bool {
    if let Some(explicit) = explicit {
        return explicit;
    }
    let mut haystack = String::new();
    haystack.push_str(plan_summary);
    haystack.push(' ');
    haystack.push_str(task);
    for result in results {
        haystack.push(' ');
        haystack.push_str(&result.result);
    }
    let haystack = haystack.to_lowercase();
    haystack.contains("restart")
        && service_tokens
            .iter()
            .any(|token| haystack.contains(&token.to_lowercase()))
}
