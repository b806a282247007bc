use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Role classification of an assistant call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Chat,
    Orchestrator,
    Worker,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Chat => write!(f, "chat"),
            Tier::Orchestrator => write!(f, "orchestrator"),
            Tier::Worker => write!(f, "worker"),
        }
    }
}

/// How quickly the user wants the work done. Quick requests get smaller plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Quick,
    #[default]
    Normal,
}

impl std::fmt::Display for Urgency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Urgency::Quick => write!(f, "quick"),
            Urgency::Normal => write!(f, "normal"),
        }
    }
}

/// A work request extracted from a chat reply's action block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkRequest {
    pub task: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub urgency: Urgency,
}

/// A single task within an orchestrator plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerTask {
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub prompt: String,
    /// Ids of workers whose results this task needs (parallel mode only).
    #[serde(default, alias = "dependsOn")]
    pub depends_on: Vec<String>,
}

/// The orchestrator's decomposition of a work request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub summary: String,
    pub workers: Vec<WorkerTask>,
    #[serde(default)]
    pub sequential: bool,
}

/// Outcome of one worker execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerResult {
    pub task_id: String,
    pub success: bool,
    pub result: String,
    pub cost_usd: Option<f64>,
    pub duration_ms: u64,
}

/// Final outcome of an orchestration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSummary {
    pub overall_success: bool,
    pub summary: String,
    pub worker_results: Vec<WorkerResult>,
    pub total_cost_usd: f64,
    pub needs_restart: bool,
}

impl OrchestratorSummary {
    /// One-line human rendering for terminal/status surfaces.
    pub fn headline(&self) -> String {
        let ok = self.worker_results.iter().filter(|r| r.success).count();
        let total = self.worker_results.len();
        let state = if self.overall_success { "done" } else { "failed" };
        format!(
            "{state}: {ok}/{total} workers succeeded (${:.4})",
            self.total_cost_usd
        )
    }
}

/// Kind of a status update pushed to the chat surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Status,
    PlanBreakdown,
    WorkerComplete,
}

/// A progress notification for the chat surface.
///
/// `important` updates must be delivered as new messages; the rest may be
/// coalesced or rendered as in-place edits by the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdate {
    #[serde(rename = "type")]
    pub kind: StatusKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
    #[serde(default)]
    pub important: bool,
}

impl StatusUpdate {
    pub fn status(message: impl Into<String>) -> Self {
        StatusUpdate {
            kind: StatusKind::Status,
            message: message.into(),
            progress: None,
            important: false,
        }
    }

    pub fn important(message: impl Into<String>) -> Self {
        StatusUpdate {
            important: true,
            ..StatusUpdate::status(message)
        }
    }
}

/// Token counts for one model within an invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelTokens {
    #[serde(default, alias = "inputTokens")]
    pub input_tokens: u64,
    #[serde(default, alias = "outputTokens")]
    pub output_tokens: u64,
    #[serde(default, alias = "cacheReadInputTokens")]
    pub cache_read_input_tokens: u64,
    #[serde(default, alias = "cacheCreationInputTokens")]
    pub cache_creation_input_tokens: u64,
}

/// One assistant call, as persisted by the invocation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationRecord {
    /// RFC 3339 UTC timestamp.
    pub timestamp: String,
    pub chat_id: String,
    pub tier: Tier,
    pub duration_ms: u64,
    #[serde(default)]
    pub duration_api_ms: u64,
    #[serde(default)]
    pub cost_usd: f64,
    #[serde(default)]
    pub num_turns: u64,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub is_error: bool,
    /// Per-model token counts, keyed by model name.
    #[serde(default)]
    pub model_usage: HashMap<String, ModelTokens>,
}

/// Where a memory note came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteSource {
    /// Emitted by the assistant in a memory block.
    Auto,
    /// Added explicitly by the user.
    Manual,
}

/// A durable per-chat fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryNote {
    pub id: String,
    pub chat_id: String,
    pub text: String,
    pub source: NoteSource,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_task_accepts_camel_case_depends_on() {
        let task: WorkerTask = serde_json::from_str(
            r#"{"id":"w1","description":"d","prompt":"p","dependsOn":["w0"]}"#,
        )
        .unwrap();
        assert_eq!(task.depends_on, vec!["w0"]);
    }

    #[test]
    fn test_worker_task_depends_on_defaults_empty() {
        let task: WorkerTask = serde_json::from_str(r#"{"id":"w1","prompt":"p"}"#).unwrap();
        assert!(task.depends_on.is_empty());
        assert!(task.description.is_empty());
    }

    #[test]
    fn test_urgency_defaults_to_normal() {
        let req: WorkRequest = serde_json::from_str(r#"{"task":"fix it"}"#).unwrap();
        assert_eq!(req.urgency, Urgency::Normal);
        assert!(req.context.is_empty());
    }

    #[test]
    fn test_status_update_serializes_kind_as_type() {
        let update = StatusUpdate::important("plan ready");
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["important"], true);
    }

    #[test]
    fn test_summary_headline() {
        let summary = OrchestratorSummary {
            overall_success: false,
            summary: String::new(),
            worker_results: vec![
                WorkerResult {
                    task_id: "a".into(),
                    success: true,
                    result: String::new(),
                    cost_usd: Some(0.01),
                    duration_ms: 5,
                },
                WorkerResult {
                    task_id: "b".into(),
                    success: false,
                    result: String::new(),
                    cost_usd: None,
                    duration_ms: 5,
                },
            ],
            total_cost_usd: 0.01,
            needs_restart: false,
        };
        assert!(summary.headline().starts_with("failed: 1/2"));
    }
}
