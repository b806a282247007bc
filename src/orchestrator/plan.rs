//! Parsing and validation of the planning call's response.

use serde_json::Value;

use crate::invoker::parse::parse_payload;
use crate::types::Plan;

/// Parse the planner's reply into a validated plan, capped at `max_workers`.
///
/// The reply goes through the same four-fallback payload extraction as raw
/// CLI output: planners wrap the JSON in prose or fences often enough that
/// strict parsing would throw away good plans.
pub fn parse_plan(text: &str, max_workers: usize) -> Result<Plan, String> {
    let payload = parse_payload(text).ok_or_else(|| {
        format!(
            "planner did not return JSON: {}",
            first_line(text)
        )
    })?;

    let payload = match payload {
        // A stray event array: look for the plan object inside it.
        Value::Array(items) => items
            .into_iter()
            .find(|item| item.get("type").and_then(Value::as_str) == Some("plan"))
            .ok_or("planner returned an array without a plan object")?,
        other => other,
    };

    if let Some(kind) = payload.get("type").and_then(Value::as_str) {
        if kind != "plan" {
            return Err(format!("planner returned type \"{kind}\", expected \"plan\""));
        }
    }

    let mut plan: Plan =
        serde_json::from_value(payload).map_err(|e| format!("malformed plan: {e}"))?;

    if plan.workers.is_empty() {
        return Err("plan contains no workers".to_string());
    }
    plan.workers.truncate(max_workers);

    let mut seen = std::collections::HashSet::new();
    for worker in &plan.workers {
        if worker.id.trim().is_empty() {
            return Err("plan contains a worker without an id".to_string());
        }
        if worker.prompt.trim().is_empty() {
            return Err(format!("worker \"{}\" has an empty prompt", worker.id));
        }
        if !seen.insert(worker.id.clone()) {
            return Err(format!("duplicate worker id \"{}\"", worker.id));
        }
    }

    Ok(plan)
}

fn first_line(text: &str) -> String {
    let line = text.lines().next().unwrap_or("").trim();
    let mut line: String = line.chars().take(120).collect();
    if line.is_empty() {
        line.push_str("(empty response)");
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_plan_object() {
        let text = r#"{"type":"plan","summary":"s","sequential":true,"workers":[{"id":"w1","description":"d","prompt":"p"}]}"#;
        let plan = parse_plan(text, 10).unwrap();
        assert!(plan.sequential);
        assert_eq!(plan.workers.len(), 1);
        assert_eq!(plan.workers[0].id, "w1");
    }

    #[test]
    fn test_parse_fenced_plan() {
        let text = "Here is the plan:\n```json\n{\"type\":\"plan\",\"summary\":\"s\",\"workers\":[{\"id\":\"w1\",\"prompt\":\"p\"}]}\n```";
        // Prose before the fence defeats strategy 1; the brace-matching
        // fallback still finds the object.
        let plan = parse_plan(text, 10).unwrap();
        assert_eq!(plan.workers.len(), 1);
    }

    #[test]
    fn test_parse_failure_on_prose() {
        let err = parse_plan("Sorry, cannot plan.", 10).unwrap_err();
        assert!(err.contains("did not return JSON"));
    }

    #[test]
    fn test_plan_capped_at_max_workers() {
        let workers: Vec<String> = (0..15)
            .map(|i| format!(r#"{{"id":"w{i}","prompt":"p{i}"}}"#))
            .collect();
        let text = format!(
            r#"{{"type":"plan","summary":"big","workers":[{}]}}"#,
            workers.join(",")
        );
        let plan = parse_plan(&text, 10).unwrap();
        assert_eq!(plan.workers.len(), 10);
        // First ten by source order survive
        assert_eq!(plan.workers[0].id, "w0");
        assert_eq!(plan.workers[9].id, "w9");
    }

    #[test]
    fn test_empty_worker_id_rejected() {
        let text = r#"{"type":"plan","workers":[{"id":"  ","prompt":"p"}]}"#;
        assert!(parse_plan(text, 10).is_err());
    }

    #[test]
    fn test_empty_prompt_rejected() {
        let text = r#"{"type":"plan","workers":[{"id":"w1","prompt":""}]}"#;
        assert!(parse_plan(text, 10).is_err());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let text =
            r#"{"type":"plan","workers":[{"id":"w1","prompt":"p"},{"id":"w1","prompt":"q"}]}"#;
        assert!(parse_plan(text, 10).is_err());
    }

    #[test]
    fn test_no_workers_rejected() {
        let text = r#"{"type":"plan","summary":"s","workers":[]}"#;
        assert!(parse_plan(text, 10).is_err());
    }

    #[test]
    fn test_wrong_type_rejected() {
        let text = r#"{"type":"result","workers":[{"id":"w1","prompt":"p"}]}"#;
        assert!(parse_plan(text, 10).is_err());
    }

    #[test]
    fn test_depends_on_camel_case_accepted() {
        let text = r#"{"type":"plan","workers":[{"id":"a","prompt":"p"},{"id":"b","prompt":"p","dependsOn":["a"]}]}"#;
        let plan = parse_plan(text, 10).unwrap();
        assert_eq!(plan.workers[1].depends_on, vec!["a"]);
    }
}
