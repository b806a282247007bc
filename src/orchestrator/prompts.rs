//! System prompts and input builders for the planning and summary calls.

use std::path::Path;

use crate::types::{Plan, Urgency, WorkRequest, WorkerResult};

use super::context::truncate_result;

/// System prompt for the planning call. The reply must be a single JSON
/// plan object; tools are disabled for this call.
pub const PLANNING_SYSTEM_PROMPT: &str = r#"You are a work planner. Break the user's request into discrete tasks for worker agents.

Respond with ONLY a JSON object, no prose, in this exact shape:

{"type":"plan","summary":"<one-line plan summary>","sequential":true|false,"workers":[{"id":"w1","description":"<short label>","prompt":"<full self-contained instruction>","dependsOn":[]}]}

Rules:
- Use at most 10 workers. Prefer the fewest workers that cover the request.
- Each worker prompt must stand alone: a worker sees only the plan summary and the results of the workers named in its dependsOn list.
- Set "sequential": true when each step builds directly on the previous one; otherwise use parallel mode with dependsOn references.
- dependsOn may only name ids that appear earlier in the workers list. No cycles.
- For quick requests, plan one or two workers at most."#;

/// System prompt for the summary call. Plain text, no persona.
pub const SUMMARY_SYSTEM_PROMPT: &str = "You summarize completed work. Write a short plain-text report of what was done, \
what failed, and anything the user must follow up on. No markdown headers, no role play.";

/// Input for the planning call.
pub fn build_planning_input(request: &WorkRequest, cwd: &Path) -> String {
    let urgency_note = match request.urgency {
        Urgency::Quick => "This is a QUICK request: keep the plan minimal.",
        Urgency::Normal => "Normal urgency.",
    };
    let mut input = format!(
        "Task: {task}\nWorking directory: {cwd}\n{urgency_note}\n",
        task = request.task,
        cwd = cwd.display(),
    );
    if !request.context.is_empty() {
        input.push_str(&format!("Context: {}\n", request.context));
    }
    input
}

/// Input for the summary call: ordered worker results plus any notices.
pub fn build_summary_input(
    task: &str,
    results: &[WorkerResult],
    notices: &[String],
    total_cost_usd: f64,
    max_chars: usize,
) -> String {
    let mut input = format!("Original request: {task}\n\nWorker results, in order:\n");
    if results.is_empty() {
        input.push_str("(no workers ran)\n");
    }
    for result in results {
        let label = if result.success { "SUCCESS" } else { "FAILED" };
        input.push_str(&format!(
            "[{label}] {}:\n{}\n\n",
            result.task_id,
            truncate_result(&result.result, max_chars)
        ));
    }
    for notice in notices {
        input.push_str(&format!("Note: {notice}\n"));
    }
    input.push_str(&format!("Total cost so far: ${total_cost_usd:.4}\n"));
    input
}

/// Deterministic summary used when the summary call itself fails.
pub fn fallback_summary(results: &[WorkerResult], notices: &[String]) -> String {
    let ok = results.iter().filter(|r| r.success).count();
    let mut summary = format!("{ok}/{} workers completed successfully.", results.len());
    for result in results.iter().filter(|r| !r.success) {
        summary.push_str(&format!(
            "\n{} failed: {}",
            result.task_id,
            truncate_result(&result.result, 200)
        ));
    }
    for notice in notices {
        summary.push_str(&format!("\n{notice}"));
    }
    summary
}

/// The important status update announcing the plan.
pub fn plan_breakdown_message(plan: &Plan) -> String {
    let mode = if plan.sequential {
        "sequential"
    } else {
        "parallel"
    };
    let mut message = format!(
        "Plan ({mode}, {} worker(s)): {}\n",
        plan.workers.len(),
        plan.summary
    );
    for (i, worker) in plan.workers.iter().enumerate() {
        message.push_str(&format!("{}. {}\n", i + 1, worker.description));
    }
    message.trim_end().to_string()
}
