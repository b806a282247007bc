//! Context blocks prefixed to worker prompts.
//!
//! Sequential workers see every prior result; parallel workers see only the
//! results of their declared dependencies. Either way the worker gets the
//! overall plan picture and its own position in it.

use crate::types::{Plan, WorkerResult};

pub const TRUNCATION_MARKER: &str = "\n[... truncated]";

/// Clamp a result to `max_chars`, marking the cut.
pub fn truncate_result(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let clipped: String = text.chars().take(max_chars).collect();
    format!("{clipped}{TRUNCATION_MARKER}")
}

/// The plan-wide context shared by every worker in a run.
pub fn plan_overview(task: &str, plan: &Plan) -> String {
    let mode = if plan.sequential {
        "sequential"
    } else {
        "parallel"
    };
    let mut overview = format!(
        "## Plan\nGoal: {task}\nSummary: {summary}\nMode: {mode}, {count} worker(s)\n",
        summary = plan.summary,
        count = plan.workers.len(),
    );
    for (i, worker) in plan.workers.iter().enumerate() {
        overview.push_str(&format!("{}. {} [{}]\n", i + 1, worker.description, worker.id));
    }
    overview
}

fn format_results(heading: &str, results: &[&WorkerResult], max_chars: usize) -> String {
    let mut section = format!("## {heading}\n");
    for result in results {
        let label = if result.success { "SUCCESS" } else { "FAILED" };
        section.push_str(&format!(
            "[{label}] {}:\n{}\n\n",
            result.task_id,
            truncate_result(&result.result, max_chars)
        ));
    }
    section
}

/// Context for a sequential worker: plan overview, position, and the
/// results of all strictly-prior workers.
pub fn sequential_context(
    overview: &str,
    position: usize,
    total: usize,
    prior: &[WorkerResult],
    max_chars: usize,
) -> String {
    let mut block = format!("{overview}\nYou are worker #{position} of {total}.\n");
    if !prior.is_empty() {
        let refs: Vec<&WorkerResult> = prior.iter().collect();
        block.push('\n');
        block.push_str(&format_results("Results from earlier workers", &refs, max_chars));
    }
    block
}

/// Context for a parallel worker: plan overview, position, and only the
/// results of its declared dependencies.
pub fn dependency_context(
    overview: &str,
    position: usize,
    total: usize,
    dependencies: &[&WorkerResult],
    max_chars: usize,
) -> String {
    let mut block = format!("{overview}\nYou are worker #{position} of {total}.\n");
    if !dependencies.is_empty() {
        block.push('\n');
        block.push_str(&format_results(
            "Results from your dependencies",
            dependencies,
            max_chars,
        ));
    }
    block
}

/// Final prompt handed to the worker executor.
pub fn prefix_prompt(context: &str, prompt: &str) -> String {
    format!("{context}\n## Your task\n\n{prompt}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WorkerTask;

    fn plan() -> Plan {
        Plan {
            summary: "two-step fix".to_string(),
            sequential: true,
            workers: vec![
                WorkerTask {
                    id: "w1".into(),
                    description: "diagnose".into(),
                    prompt: "p1".into(),
                    depends_on: vec![],
                },
                WorkerTask {
                    id: "w2".into(),
                    description: "fix".into(),
                    prompt: "p2".into(),
                    depends_on: vec![],
                },
            ],
        }
    }

    fn result(id: &str, success: bool, text: &str) -> WorkerResult {
        WorkerResult {
            task_id: id.to_string(),
            success,
            result: text.to_string(),
            cost_usd: None,
            duration_ms: 1,
        }
    }

    #[test]
    fn test_truncate_short_text_unchanged() {
        assert_eq!(truncate_result("short", 100), "short");
    }

    #[test]
    fn test_truncate_marks_cut() {
        let text = "x".repeat(50);
        let truncated = truncate_result(&text, 10);
        assert!(truncated.starts_with("xxxxxxxxxx"));
        assert!(truncated.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn test_truncate_is_char_safe() {
        let text = "é".repeat(20);
        let truncated = truncate_result(&text, 5);
        assert!(truncated.starts_with("ééééé"));
    }

    #[test]
    fn test_overview_lists_numbered_tasks() {
        let overview = plan_overview("fix the build", &plan());
        assert!(overview.contains("Goal: fix the build"));
        assert!(overview.contains("Mode: sequential, 2 worker(s)"));
        assert!(overview.contains("1. diagnose [w1]"));
        assert!(overview.contains("2. fix [w2]"));
    }

    #[test]
    fn test_sequential_context_labels_results() {
        let overview = plan_overview("fix", &plan());
        let prior = vec![result("w1", true, "found it"), result("w1b", false, "nope")];
        let block = sequential_context(&overview, 3, 3, &prior, 100);
        assert!(block.contains("You are worker #3 of 3."));
        assert!(block.contains("[SUCCESS] w1:\nfound it"));
        assert!(block.contains("[FAILED] w1b:\nnope"));
    }

    #[test]
    fn test_sequential_context_without_prior_results() {
        let overview = plan_overview("fix", &plan());
        let block = sequential_context(&overview, 1, 2, &[], 100);
        assert!(!block.contains("Results from earlier workers"));
    }

    #[test]
    fn test_dependency_context_only_lists_deps() {
        let overview = plan_overview("fix", &plan());
        let dep = result("w1", true, "dep output");
        let block = dependency_context(&overview, 2, 2, &[&dep], 100);
        assert!(block.contains("Results from your dependencies"));
        assert!(block.contains("[SUCCESS] w1:\ndep output"));
    }

    #[test]
    fn test_prefix_prompt_keeps_task_last() {
        let combined = prefix_prompt("CTX", "do the thing");
        assert!(combined.starts_with("CTX"));
        assert!(combined.ends_with("do the thing"));
    }
}
